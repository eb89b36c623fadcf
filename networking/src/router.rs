//! Worker pool that drains inbound gossip into topic handlers.
//!
//! The network event loop must never block on validation, so it hands
//! each raw message to the router and moves on. Workers resolve the
//! handler through the registry and report the verdict back through a
//! one-shot callback, which the event loop forwards to gossipsub.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::gossipsub::message::GossipMessage;
use crate::pipeline::Verdict;
use crate::registry::TopicRegistry;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Invoked exactly once with the final verdict for a message.
pub type VerdictCallback = Box<dyn FnOnce(Verdict) + Send>;

struct Job {
    message: GossipMessage,
    done: VerdictCallback,
}

pub struct GossipRouter {
    tx: mpsc::Sender<Job>,
    unknown_topics: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl GossipRouter {
    pub fn new(registry: Arc<TopicRegistry>, workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let unknown_topics = Arc::new(AtomicU64::new(0));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let registry = registry.clone();
                let unknown_topics = unknown_topics.clone();
                tokio::spawn(async move {
                    loop {
                        // The lock is held only across recv so workers
                        // take turns pulling jobs, not processing them.
                        let job = rx.lock().await.recv().await;
                        let Some(Job { message, done }) = job else {
                            break;
                        };

                        let verdict = match registry.resolve(&message.topic) {
                            Some(handler) => handler.handle(message).await,
                            None => {
                                // Stale subscription or peer noise; not
                                // worth a diagnostic artifact.
                                unknown_topics.fetch_add(1, Ordering::Relaxed);
                                debug!(topic = %message.topic, "no handler for gossip topic");
                                Verdict::Ignore
                            }
                        };
                        done(verdict);
                    }
                    debug!(worker, "gossip worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            unknown_topics,
            workers,
        }
    }

    /// Queue a message for validation. When the pool is saturated the
    /// message is shed and resolved as IGNORE so gossipsub neither
    /// forwards nor penalizes it.
    pub fn enqueue(&self, message: GossipMessage, done: VerdictCallback) {
        match self.tx.try_send(Job { message, done }) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                warn!(topic = %job.message.topic, "gossip queue full, shedding message");
                (job.done)(Verdict::Ignore);
            }
            Err(TrySendError::Closed(job)) => {
                (job.done)(Verdict::Ignore);
            }
        }
    }

    /// Messages that arrived on a topic with no registered handler.
    pub fn unknown_topic_count(&self) -> u64 {
        self.unknown_topics.load(Ordering::Relaxed)
    }

    /// Stop accepting work and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let Self { tx, workers, .. } = self;
        drop(tx);
        for worker in workers {
            let _ = worker.await;
        }
    }
}
