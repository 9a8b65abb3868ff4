use std::path::Path;

use chrono::{NaiveDate, Utc};
use flytrap_common::envelope::Envelope;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{Result, StoreError};

/// The embedded envelope database.
///
/// Opened once at startup with sled's file lock held for the process
/// lifetime. One instance serves both the pipeline consumer and the
/// read-only query path.
pub struct EnvelopeStore {
    db: sled::Db,
}

impl EnvelopeStore {
    /// Open (or create) the database at `path` and restrict it to the
    /// owning user.
    ///
    /// # Errors
    /// If the database cannot be opened or locked.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(&path)
            .mode(sled::Mode::HighThroughput)
            .open()?;

        // Captured mail is nobody else's business. sled manages a
        // directory, so owner-only on the directory is the equivalent of
        // the classic 0600 database file.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(Self { db })
    }

    /// Consume the storage stage until it closes, persisting every
    /// envelope that arrives.
    ///
    /// A write failure drops the envelope after logging: honeypot data is
    /// best-effort, and a wedged database must not wedge the pipeline.
    pub async fn serve(&self, mut envelopes: mpsc::Receiver<Envelope>) {
        info!("Storage service started");

        while let Some(envelope) = envelopes.recv().await {
            let id = envelope.id().to_string();

            match self.store_envelope(&envelope) {
                Ok(()) => {
                    info!("Stored envelope {id} from {}", envelope.remote_address());
                }
                Err(err) => {
                    error!("Failed to store envelope {id}: {err}");
                    continue;
                }
            }

            if let Err(err) = self.db.flush_async().await {
                error!("Flush after envelope {id} failed: {err}");
            }
        }

        info!("Storage stage closed, storage service exiting");
    }

    /// Persist one envelope under its day bucket.
    ///
    /// # Errors
    /// If serialization or the database write fails.
    pub fn store_envelope(&self, envelope: &Envelope) -> Result<()> {
        let tree = self.db.open_tree(envelope.day_bucket())?;
        let record = serde_json::to_vec(envelope)?;
        tree.insert(envelope.id().to_string().as_bytes(), record)?;
        Ok(())
    }

    /// All envelopes captured on `day`.
    ///
    /// # Errors
    /// If the bucket cannot be read. Records that fail to decode are
    /// skipped, not fatal.
    pub fn view_envelopes_for(&self, day: NaiveDate) -> Result<Vec<Envelope>> {
        let bucket = day.format("%Y%m%d").to_string();

        // Don't create empty trees just by asking.
        if !self
            .db
            .tree_names()
            .iter()
            .any(|name| name.as_ref() == bucket.as_bytes())
        {
            return Ok(Vec::new());
        }

        let tree = self.db.open_tree(&bucket)?;
        let mut envelopes = Vec::with_capacity(tree.len());

        for record in tree.iter() {
            let (key, value) = record?;
            match serde_json::from_slice::<Envelope>(&value) {
                Ok(envelope) => envelopes.push(envelope),
                Err(err) => {
                    warn!(
                        "Skipping undecodable record {:?} in bucket {bucket}: {err}",
                        String::from_utf8_lossy(&key)
                    );
                }
            }
        }

        Ok(envelopes)
    }

    /// All envelopes captured between `from` and `to`, inclusive.
    ///
    /// # Errors
    /// If the range is inverted or a bucket cannot be read.
    pub fn view_envelopes_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Envelope>> {
        if from > to {
            return Err(StoreError::InvalidDay(format!(
                "Range {from} to {to} is inverted"
            )));
        }

        let mut envelopes = Vec::new();
        for day in from.iter_days().take_while(|day| *day <= to) {
            envelopes.extend(self.view_envelopes_for(day)?);
        }

        Ok(envelopes)
    }

    /// Today's capture, by the UTC calendar.
    ///
    /// # Errors
    /// If the bucket cannot be read.
    pub fn view_today_envelopes(&self) -> Result<Vec<Envelope>> {
        self.view_envelopes_for(Utc::now().date_naive())
    }
}

/// Parse a `YYYYMMDD` day argument.
///
/// # Errors
/// If the argument is not a calendar date in that format.
pub fn parse_day(day: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(day, "%Y%m%d").map_err(|_| StoreError::InvalidDay(day.to_string()))
}
