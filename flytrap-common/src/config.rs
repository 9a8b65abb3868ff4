use std::{path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
///
/// Every key carries a default, so an absent file (or any absent key) yields
/// a runnable configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub maxmind: MaxmindConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: the honeypot runs on defaults.
    ///
    /// # Errors
    /// If the file exists but cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if !path.as_ref().try_exists()? {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub listen_to: String,
    pub port: u16,
    pub secure_port: u16,
    pub server_name: String,
    pub read_timeout_secs: u64,
    pub max_client_connections: usize,
    pub tls: TlsKeyPaths,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen_to: "0.0.0.0".to_string(),
            port: 10025,
            secure_port: 10026,
            server_name: "localhost".to_string(),
            read_timeout_secs: 240,
            max_client_connections: 64000,
            tls: TlsKeyPaths::default(),
        }
    }
}

impl SmtpConfig {
    /// TLS is enabled only when both key material paths are configured.
    pub fn tls_enabled(&self) -> bool {
        !self.tls.public_key.is_empty() && !self.tls.private_key.is_empty()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_to, self.port)
    }

    pub fn secure_bind_address(&self) -> String {
        format!("{}:{}", self.listen_to, self.secure_port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsKeyPaths {
    pub public_key: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MaxmindConfig {
    pub db: MaxmindDb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaxmindDb {
    pub path: String,
}

impl Default for MaxmindDb {
    fn default() -> Self {
        Self {
            path: "GeoLite2-City.mmdb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "mail.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen_to: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_to: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl HttpConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_to, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.smtp.listen_to, "0.0.0.0");
        assert_eq!(config.smtp.port, 10025);
        assert_eq!(config.smtp.secure_port, 10026);
        assert_eq!(config.smtp.server_name, "localhost");
        assert_eq!(config.smtp.read_timeout_secs, 240);
        assert_eq!(config.smtp.max_client_connections, 64000);
        assert!(!config.smtp.tls_enabled());
        assert_eq!(config.maxmind.db.path, "GeoLite2-City.mmdb");
        assert_eq!(config.storage.path, "mail.db");
        assert_eq!(config.http.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let config: Config = toml::from_str(
            r#"
            [smtp]
            port = 2525
            server_name = "mx.example.com"

            [smtp.tls]
            public_key = "/etc/flytrap/cert.pem"
            private_key = "/etc/flytrap/key.pem"

            [maxmind.db]
            path = "/var/lib/geo/GeoLite2-City.mmdb"
            "#,
        )
        .unwrap();

        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.server_name, "mx.example.com");
        assert_eq!(config.smtp.listen_to, "0.0.0.0");
        assert!(config.smtp.tls_enabled());
        assert_eq!(config.maxmind.db.path, "/var/lib/geo/GeoLite2-City.mmdb");
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load("/nonexistent/flytrap.config.toml").unwrap();
        assert_eq!(config.smtp.port, 10025);
    }
}
