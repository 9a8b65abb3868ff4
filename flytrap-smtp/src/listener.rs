use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use flytrap_common::{envelope::Envelope, Signal};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
};
use tracing::{error, info, warn};

use crate::{
    connection::Connection,
    session::{Session, SessionConfig},
};

/// Process-wide table of live client connections, shared by every listener.
///
/// The mutex is held only across O(1) insert/remove/len, never across I/O.
/// The table (rather than a bare counter) exists so operator tooling can
/// enumerate who is currently connected.
pub struct ConnectionRegistry {
    max_connections: usize,
    live: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            max_connections,
            live: Mutex::new(HashMap::new()),
        })
    }

    /// Admit a connection, or refuse it if the cap is reached.
    ///
    /// The returned guard removes the entry on drop, whichever way the
    /// session ends.
    pub fn try_register(self: Arc<Self>, remote: String) -> Option<RegistrationGuard> {
        let mut live = self
            .live
            .lock()
            .expect("connection registry mutex poisoned");

        if live.len() >= self.max_connections {
            return None;
        }

        live.insert(remote.clone(), Utc::now());
        drop(live);

        Some(RegistrationGuard {
            registry: self,
            remote,
        })
    }

    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .expect("connection registry mutex poisoned")
            .len()
    }

    /// Snapshot of the currently connected peers.
    pub fn live_peers(&self) -> Vec<String> {
        self.live
            .lock()
            .expect("connection registry mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

/// Removes its registry entry when dropped.
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    remote: String,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry
            .live
            .lock()
            .expect("connection registry mutex poisoned")
            .remove(&self.remote);
    }
}

/// One SMTP accept loop. The binary runs one of these on the plain port
/// and, when TLS credentials are configured, a second with `implicit_tls`
/// on the secure port.
pub struct Listener {
    bind_address: String,
    session_config: SessionConfig,
    implicit_tls: bool,
    registry: Arc<ConnectionRegistry>,
    ingest: mpsc::Sender<Envelope>,
}

impl Listener {
    pub fn new(
        bind_address: impl Into<String>,
        session_config: SessionConfig,
        implicit_tls: bool,
        registry: Arc<ConnectionRegistry>,
        ingest: mpsc::Sender<Envelope>,
    ) -> Self {
        Self {
            bind_address: bind_address.into(),
            session_config,
            implicit_tls,
            registry,
            ingest,
        }
    }

    /// Bind and accept until the shutdown signal arrives. In-flight
    /// sessions are not interrupted; they end on their own deadlines.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;

        // The implicit-TLS acceptor shakes hands before any banner is sent,
        // so its key material has to be loadable up front.
        let acceptor = if self.implicit_tls {
            let tls_context = self
                .session_config
                .tls_context
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("implicit TLS listener without TLS key material"))?;
            Some(Connection::<TcpStream>::acceptor(tls_context)?)
        } else {
            None
        };

        info!(
            "Flytrap is listening on {}{}",
            self.bind_address,
            if self.implicit_tls { " (implicit TLS)" } else { "" }
        );

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(_)) {
                        info!(
                            "Listener {} received shutdown signal, no longer accepting",
                            self.bind_address
                        );
                        break;
                    }
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!("Accept failed: {err}");
                            continue;
                        }
                    };

                    let Some(guard) = Arc::clone(&self.registry).try_register(peer.to_string())
                    else {
                        // Dropping the socket closes it with no reply.
                        error!("Too many client connections; dropping {peer}");
                        continue;
                    };

                    info!("Client connections: {}", self.registry.live_count());

                    let session_config = self.session_config.clone();
                    let ingest = self.ingest.clone();
                    let acceptor = acceptor.clone();

                    tokio::spawn(async move {
                        // The guard lives exactly as long as the session.
                        let _guard = guard;

                        let result = match acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    Session::create_tls(tls_stream, peer, session_config, ingest)
                                        .run()
                                        .await
                                }
                                Err(err) => {
                                    warn!("Implicit TLS handshake with {peer} failed: {err}");
                                    return;
                                }
                            },
                            None => {
                                Session::create(stream, peer, session_config, ingest)
                                    .run()
                                    .await
                            }
                        };

                        if let Err(err) = result {
                            warn!("Session {peer} ended with error: {err}");
                        }
                    });
                }
            }
        }

        Ok(())
    }
}
