//! Geolocation resolution for captured envelopes.
//!
//! Wraps a prebuilt MaxMind GeoLite2 City database. The resolver is opened
//! once at startup (open failure is fatal) and shared process-wide; lookups
//! take `&self` and are safe for concurrent use.

use std::{net::IpAddr, path::Path};

use flytrap_common::envelope::GeoMark;
use maxminddb::geoip2;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Failed to open geolocation database: {0}")]
    Open(#[from] maxminddb::MaxMindDBError),
}

pub struct GeoResolver {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl GeoResolver {
    /// Load the `.mmdb` file into memory.
    ///
    /// # Errors
    /// If the file is missing or not a valid MaxMind database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GeoError> {
        Ok(Self {
            reader: maxminddb::Reader::open_readfile(path)?,
        })
    }

    /// Resolve an IP to a location mark.
    ///
    /// Lookup failures are benign: an address the database does not know
    /// (private ranges included) simply yields `None`.
    pub fn resolve(&self, ip: IpAddr) -> Option<GeoMark> {
        let city: geoip2::City = match self.reader.lookup(ip) {
            Ok(city) => city,
            Err(err) => {
                debug!("Geo lookup for {ip} failed: {err}");
                return None;
            }
        };

        let country = city
            .country
            .as_ref()
            .and_then(|country| country.names.as_ref())
            .and_then(|names| names.get("en"))
            .map(|name| (*name).to_string())
            .unwrap_or_default();

        let city_name = city
            .city
            .as_ref()
            .and_then(|city| city.names.as_ref())
            .and_then(|names| names.get("en"))
            .map(|name| (*name).to_string())
            .unwrap_or_default();

        let location = city.location.as_ref();
        let latitude = location.and_then(|location| location.latitude)?;
        let longitude = location.and_then(|location| location.longitude)?;

        Some(GeoMark {
            country,
            city: city_name,
            latitude,
            longitude,
        })
    }
}
