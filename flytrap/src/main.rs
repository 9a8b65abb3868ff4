use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use flytrap::processor::ProcessorService;
use flytrap_common::{config::Config, logging, Signal};
use flytrap_geo::GeoResolver;
use flytrap_smtp::{ConnectionRegistry, Listener, SessionConfig, TlsContext};
use flytrap_store::EnvelopeStore;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::load("./flytrap.config.toml").context("loading configuration")?;

    // Everything that has to be there at startup is opened before the first
    // socket: a honeypot that half-starts is worse than one that fails fast.
    let store = Arc::new(
        EnvelopeStore::open(&config.storage.path).context("opening envelope database")?,
    );
    let resolver = Arc::new(
        GeoResolver::open(&config.maxmind.db.path).context("opening geolocation database")?,
    );

    // The pipeline: session -> ingest -> enrichment -> storage. Capacity-1
    // stages so a stalled store is felt by the client, not by memory.
    let (ingest_tx, ingest_rx) = mpsc::channel(1);
    let (storage_tx, storage_rx) = mpsc::channel(1);

    let (shutdown_tx, _) = broadcast::channel::<Signal>(8);

    let storage_service = Arc::clone(&store);
    let storage_task = tokio::spawn(async move { storage_service.serve(storage_rx).await });

    let processor = ProcessorService::new(Some(resolver));
    let processor_task =
        tokio::spawn(async move { processor.serve(ingest_rx, storage_tx).await });

    let tls_context = config.smtp.tls_enabled().then(|| TlsContext {
        certificate: PathBuf::from(&config.smtp.tls.public_key),
        key: PathBuf::from(&config.smtp.tls.private_key),
    });

    let session_config = SessionConfig::builder()
        .with_server_name(&config.smtp.server_name)
        .with_tls_context(tls_context.clone())
        .with_read_timeout(config.smtp.read_timeout())
        .build();

    let registry = ConnectionRegistry::new(config.smtp.max_client_connections);

    let mut api_task = tokio::spawn(flytrap_api::serve(
        Arc::clone(&store),
        config.http.bind_address(),
        shutdown_tx.subscribe(),
    ));

    let serve_listeners = {
        let plain = Listener::new(
            config.smtp.bind_address(),
            session_config.clone(),
            false,
            Arc::clone(&registry),
            ingest_tx.clone(),
        );

        let secure = tls_context.is_some().then(|| {
            Listener::new(
                config.smtp.secure_bind_address(),
                session_config.clone(),
                true,
                Arc::clone(&registry),
                ingest_tx.clone(),
            )
        });

        let shutdown = shutdown_tx.clone();
        async move {
            let mut listeners = vec![plain.serve(shutdown.subscribe())];
            if let Some(secure) = secure.as_ref() {
                listeners.push(secure.serve(shutdown.subscribe()));
            }

            // Resolves on the first listener failure so a bad bind or dead
            // socket surfaces immediately.
            futures_util::future::try_join_all(listeners).await
        }
    };

    // The binary keeps no ingest handle of its own: once the listeners (and
    // their sessions) are gone, the pipeline stages close in order and each
    // worker drains before exiting.
    drop(ingest_tx);

    tokio::select! {
        results = serve_listeners => {
            // A listener only returns early when it could not bind or its
            // socket died. That is fatal.
            results.context("SMTP listener failed")?;
            anyhow::bail!("SMTP listeners exited unexpectedly");
        }

        api = &mut api_task => {
            api.context("API service panicked")??;
            anyhow::bail!("HTTP API exited unexpectedly");
        }

        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down ...");
            let _ = shutdown_tx.send(Signal::Shutdown);
        }
    }

    // Stage closure ripples through: ingest -> enrichment -> storage.
    processor_task.await.context("enrichment worker panicked")?;
    storage_task.await.context("storage service panicked")?;
    api_task.await.context("API service panicked")??;

    info!("Flytrap stopped");
    Ok(())
}
