//! In-process test harness for the honeypot.
//!
//! Starts the full capture path — listener, enrichment worker, storage
//! service — on a loopback port with a temporary database, plus a minimal
//! scripted SMTP client to talk to it. No geolocation database is loaded;
//! enrichment passes envelopes through untouched.

use std::{sync::Arc, time::Duration};

use flytrap::processor::ProcessorService;
use flytrap_common::{envelope::Envelope, Signal};
use flytrap_smtp::{ConnectionRegistry, Listener, SessionConfig};
use flytrap_store::EnvelopeStore;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::timeout,
};

pub struct Harness {
    smtp_address: String,
    store: Arc<EnvelopeStore>,
    shutdown_tx: broadcast::Sender<Signal>,
    listener_task: JoinHandle<anyhow::Result<()>>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub async fn start() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(EnvelopeStore::open(dir.path().join("mail.db"))?);

        let (ingest_tx, ingest_rx) = mpsc::channel(1);
        let (storage_tx, storage_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let storage_service = Arc::clone(&store);
        tokio::spawn(async move { storage_service.serve(storage_rx).await });

        let processor = ProcessorService::new(None);
        tokio::spawn(async move { processor.serve(ingest_rx, storage_tx).await });

        // Learn a free loopback port, then hand it to the listener.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let smtp_address = probe.local_addr()?.to_string();
        drop(probe);

        let listener = Listener::new(
            smtp_address.clone(),
            SessionConfig::builder()
                .with_server_name("honeypot.example")
                .with_read_timeout(Duration::from_secs(5))
                .build(),
            false,
            ConnectionRegistry::new(64),
            ingest_tx,
        );

        let listener_task = tokio::spawn(async move { listener.serve(shutdown_rx).await });

        // Give the accept loop a moment to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Ok(Self {
            smtp_address,
            store,
            shutdown_tx,
            listener_task,
            _dir: dir,
        })
    }

    pub async fn connect(&self) -> anyhow::Result<TestClient> {
        let stream = TcpStream::connect(&self.smtp_address).await?;
        Ok(TestClient {
            reader: BufReader::new(stream),
        })
    }

    pub fn store(&self) -> &EnvelopeStore {
        &self.store
    }

    /// Poll today's bucket until it holds `count` envelopes.
    pub async fn wait_for_stored(&self, count: usize, limit: Duration) -> anyhow::Result<Vec<Envelope>> {
        timeout(limit, async {
            loop {
                let envelopes = self.store.view_today_envelopes()?;
                if envelopes.len() >= count {
                    return Ok(envelopes);
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("Timed out waiting for {count} stored envelopes"))?
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(Signal::Shutdown);
        let _ = self.listener_task.await;
    }
}

/// A deliberately dumb SMTP client: one line out, one reply line in.
pub struct TestClient {
    reader: BufReader<TcpStream>,
}

impl TestClient {
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.reader
            .get_mut()
            .write_all(format!("{line}\r\n").as_bytes())
            .await?;
        Ok(())
    }

    /// Send raw bytes without any line ending added.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.reader.get_mut().write_all(bytes).await?;
        Ok(())
    }

    /// Read a single reply line; empty string at EOF.
    pub async fn read_reply(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        self.reader.read_line(&mut line).await?;
        Ok(line.trim_end().to_string())
    }

    /// Read a complete (possibly multi-line) reply, returning every line.
    /// The terminal line of a reply has a space after its code.
    pub async fn read_full_reply(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_reply().await?;
            let terminal = line.len() < 4 || line.as_bytes().get(3) == Some(&b' ');
            let done = terminal || line.is_empty();
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }
}
