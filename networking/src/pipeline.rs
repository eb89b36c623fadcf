//! Validation pipeline: deduplicate, then delegate to the external
//! semantic validator.
//!
//! Fingerprint lookup is assumed much cheaper than validation, so the
//! seen-cache check always runs first. The check at entry and the
//! insert after validation form one atomic region per fingerprint: a
//! fingerprint also counts as "seen" while its first copy is still
//! being validated, so two concurrent duplicates can never both pass.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::gossipsub::message::Fingerprint;

/// Classification of an inbound message after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Propagate to the mesh and hand to consensus logic.
    Accept,
    /// Drop silently; no peer penalty.
    Ignore,
    /// Drop and penalize the originating peer.
    Reject(String),
    /// Valid-shaped but not yet actionable (e.g. a future slot).
    /// Buffering policy belongs to the external validator.
    SaveForFuture,
}

impl Verdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        Verdict::Reject(reason.into())
    }
}

/// Externally supplied semantic validator for one message type.
#[async_trait]
pub trait Validator<T>: Send + Sync {
    async fn validate(&self, message: &T) -> Verdict;
}

#[async_trait]
impl<T, F> Validator<T> for F
where
    T: Sync,
    F: Fn(&T) -> Verdict + Send + Sync,
{
    async fn validate(&self, message: &T) -> Verdict {
        self(message)
    }
}

/// Bounded per-message-type set of fingerprints already processed.
///
/// Eviction is count-bounded FIFO; it only exists to bound memory and
/// is never needed for correctness. The `in_flight` set extends the
/// "seen" property to fingerprints whose first copy is still under
/// validation.
pub struct SeenMessageCache {
    capacity: usize,
    inner: Mutex<SeenInner>,
}

#[derive(Default)]
struct SeenInner {
    seen: HashSet<Fingerprint>,
    order: VecDeque<Fingerprint>,
    in_flight: HashSet<Fingerprint>,
}

impl SeenMessageCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "seen cache capacity must be non-zero");
        Self {
            capacity,
            inner: Mutex::new(SeenInner::default()),
        }
    }

    /// Claim a fingerprint for validation. Returns `false` if it is
    /// already seen or another copy is mid-validation.
    fn claim(&self, fingerprint: Fingerprint) -> bool {
        let mut inner = self.inner.lock();
        if inner.seen.contains(&fingerprint) || inner.in_flight.contains(&fingerprint) {
            return false;
        }
        inner.in_flight.insert(fingerprint);
        true
    }

    /// Release a claimed fingerprint, remembering it if requested.
    fn release(&self, fingerprint: Fingerprint, remember: bool) {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(&fingerprint);

        if remember && inner.seen.insert(fingerprint) {
            inner.order.push_back(fingerprint);
            while inner.order.len() > self.capacity {
                if let Some(evicted) = inner.order.pop_front() {
                    inner.seen.remove(&evicted);
                }
            }
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock().seen.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ValidationPipeline<T> {
    seen: SeenMessageCache,
    validator: Arc<dyn Validator<T>>,
}

impl<T: Send + Sync> ValidationPipeline<T> {
    pub fn new(validator: Arc<dyn Validator<T>>, seen_capacity: usize) -> Self {
        Self {
            seen: SeenMessageCache::new(seen_capacity),
            validator,
        }
    }

    /// Produce a verdict for a decoded message.
    ///
    /// Accepted and ignored fingerprints are remembered so duplicates
    /// are never re-validated. Rejected fingerprints are not: a
    /// corrected copy arriving later must be re-checkable, rejection
    /// is not a permanent poison. The same goes for saved-for-future
    /// messages, which become actionable with time.
    pub async fn process(&self, fingerprint: Fingerprint, message: &T) -> Verdict {
        if !self.seen.claim(fingerprint) {
            return Verdict::Ignore;
        }

        let verdict = self.validator.validate(message).await;
        let remember = matches!(verdict, Verdict::Accept | Verdict::Ignore);
        self.seen.release(fingerprint, remember);
        verdict
    }

    pub fn seen(&self) -> &SeenMessageCache {
        &self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn fp(byte: u8) -> Fingerprint {
        [byte; 20]
    }

    /// Counts invocations and returns a fixed sequence of verdicts.
    struct ScriptedValidator {
        calls: AtomicUsize,
        verdicts: Vec<Verdict>,
    }

    impl ScriptedValidator {
        fn new(verdicts: Vec<Verdict>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                verdicts,
            }
        }
    }

    #[async_trait]
    impl Validator<u64> for ScriptedValidator {
        async fn validate(&self, _message: &u64) -> Verdict {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdicts[call.min(self.verdicts.len() - 1)].clone()
        }
    }

    #[tokio::test]
    async fn duplicate_of_accepted_message_is_ignored_without_revalidation() {
        let validator = Arc::new(ScriptedValidator::new(vec![Verdict::Accept]));
        let pipeline = ValidationPipeline::new(validator.clone(), 16);

        assert_eq!(pipeline.process(fp(1), &1).await, Verdict::Accept);
        assert_eq!(pipeline.process(fp(1), &1).await, Verdict::Ignore);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_of_ignored_message_is_not_revalidated() {
        let validator = Arc::new(ScriptedValidator::new(vec![Verdict::Ignore]));
        let pipeline = ValidationPipeline::new(validator.clone(), 16);

        assert_eq!(pipeline.process(fp(2), &2).await, Verdict::Ignore);
        assert_eq!(pipeline.process(fp(2), &2).await, Verdict::Ignore);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_message_is_revalidated_on_resubmission() {
        let validator = Arc::new(ScriptedValidator::new(vec![
            Verdict::reject("bad signature"),
            Verdict::Accept,
        ]));
        let pipeline = ValidationPipeline::new(validator.clone(), 16);

        assert_eq!(
            pipeline.process(fp(3), &3).await,
            Verdict::reject("bad signature")
        );
        // A corrected copy with the same fingerprint gets a fresh run.
        assert_eq!(pipeline.process(fp(3), &3).await, Verdict::Accept);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn save_for_future_is_revalidated_later() {
        let validator = Arc::new(ScriptedValidator::new(vec![
            Verdict::SaveForFuture,
            Verdict::Accept,
        ]));
        let pipeline = ValidationPipeline::new(validator.clone(), 16);

        assert_eq!(pipeline.process(fp(4), &4).await, Verdict::SaveForFuture);
        assert_eq!(pipeline.process(fp(4), &4).await, Verdict::Accept);
    }

    #[tokio::test]
    async fn concurrent_duplicates_never_both_accept() {
        struct BlockingValidator {
            started: Arc<Notify>,
            release: Arc<Notify>,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Validator<u64> for BlockingValidator {
            async fn validate(&self, _message: &u64) -> Verdict {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.started.notify_one();
                self.release.notified().await;
                Verdict::Accept
            }
        }

        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let validator = Arc::new(BlockingValidator {
            started: started.clone(),
            release: release.clone(),
            calls: AtomicUsize::new(0),
        });
        let pipeline = Arc::new(ValidationPipeline::new(
            validator.clone() as Arc<dyn Validator<u64>>,
            16,
        ));

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.process(fp(5), &5).await }
        });

        // Second copy arrives while the first is mid-validation.
        started.notified().await;
        assert_eq!(pipeline.process(fp(5), &5).await, Verdict::Ignore);

        release.notify_one();
        assert_eq!(first.await.unwrap(), Verdict::Accept);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_is_count_bounded() {
        let cache = SeenMessageCache::new(2);
        for byte in 0..4u8 {
            assert!(cache.claim(fp(byte)));
            cache.release(fp(byte), true);
        }

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&fp(0)));
        assert!(cache.contains(&fp(3)));
        // An evicted fingerprint may be validated again.
        assert!(cache.claim(fp(0)));
    }
}
