//! Best-effort capture of malformed and rejected gossip payloads.
//!
//! Raw bytes are handed to a writer task over a bounded channel and
//! land as `<unix_millis>_<reason>.ssz` under a per-kind directory.
//! Nothing here may block or fail the validation path: a full queue or
//! a broken disk only bumps a drop counter.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::gossipsub::topic::GossipKind;

const QUEUE_DEPTH: usize = 64;

#[derive(Debug)]
struct FailureRecord {
    kind: GossipKind,
    raw: Vec<u8>,
    context: String,
    reason: String,
}

pub struct DiagnosticSink {
    tx: Option<mpsc::Sender<FailureRecord>>,
    dropped: AtomicU64,
}

impl DiagnosticSink {
    /// A sink that discards everything. Used unless debug capture is
    /// explicitly enabled.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Capture failures under `dir`, keeping at most `max_files` files
    /// per message kind. Spawns the writer task on the current runtime.
    pub fn new(dir: PathBuf, max_files: u64) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(write_records(dir, max_files, rx));

        Arc::new(Self {
            tx: Some(tx),
            dropped: AtomicU64::new(0),
        })
    }

    /// Record a decode failure or rejected message. Never blocks.
    pub fn record_failure(&self, kind: GossipKind, raw: &[u8], context: &str, reason: &str) {
        let Some(tx) = &self.tx else {
            return;
        };

        let record = FailureRecord {
            kind,
            raw: raw.to_vec(),
            context: context.to_string(),
            reason: reason.to_string(),
        };
        if tx.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records lost to a full queue or a stopped writer.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn write_records(dir: PathBuf, max_files: u64, mut rx: mpsc::Receiver<FailureRecord>) {
    let mut written: u64 = 0;

    while let Some(record) = rx.recv().await {
        if written >= max_files {
            trace!(limit = max_files, "diagnostic capture limit reached");
            continue;
        }

        let kind_dir = dir.join(record.kind.as_str());
        if let Err(err) = tokio::fs::create_dir_all(&kind_dir).await {
            debug!(%err, dir = %kind_dir.display(), "failed to create diagnostic dir");
            continue;
        }

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let path = kind_dir.join(format!("{millis}_{}.ssz", sanitize(&record.reason)));

        match tokio::fs::write(&path, &record.raw).await {
            Ok(()) => {
                written += 1;
                trace!(
                    path = %path.display(),
                    context = %record.context,
                    "captured failed gossip payload"
                );
            }
            Err(err) => {
                debug!(%err, path = %path.display(), "failed to write diagnostic payload");
            }
        }
    }
}

fn sanitize(reason: &str) -> String {
    reason
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(48)
        .collect()
}
