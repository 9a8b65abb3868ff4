use std::{net::IpAddr, sync::Arc};

use flytrap_common::envelope::Envelope;
use flytrap_geo::GeoResolver;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// The enrichment worker between the ingest and storage stages.
///
/// Single consumer of the ingest stage: looks up where each envelope's
/// sender connected from and forwards the envelope to storage. Runs until
/// the ingest stage closes, draining whatever is in flight.
pub struct ProcessorService {
    resolver: Option<Arc<GeoResolver>>,
}

impl ProcessorService {
    pub fn new(resolver: Option<Arc<GeoResolver>>) -> Self {
        Self { resolver }
    }

    pub async fn serve(&self, mut ingest: mpsc::Receiver<Envelope>, storage: mpsc::Sender<Envelope>) {
        info!("Enrichment worker started");

        while let Some(mut envelope) = ingest.recv().await {
            self.enrich(&mut envelope);

            // Rendezvous handoff: block here, not in a buffer, when the
            // storage stage is behind.
            if storage.send(envelope).await.is_err() {
                error!("Storage stage closed; envelope dropped");
                break;
            }
        }

        info!("Ingest stage closed, enrichment worker exiting");
    }

    /// Attach geolocation if the remote host resolves to one.
    ///
    /// Failures are benign: no retry, no blocking, `geo` just stays unset.
    fn enrich(&self, envelope: &mut Envelope) {
        let Some(resolver) = self.resolver.as_deref() else {
            return;
        };

        let Ok(ip) = envelope.remote_host().parse::<IpAddr>() else {
            warn!(
                "Remote address {} is not an IP; skipping enrichment",
                envelope.remote_address()
            );
            return;
        };

        if let Some(mark) = resolver.resolve(ip) {
            envelope.set_geo(mark);
        }
    }
}
