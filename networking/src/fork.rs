//! Fork schedule and fork digest resolution.
//!
//! A fork digest is the short identifier of the schema/protocol
//! version in force at a point in chain time. Topic names embed it, so
//! peers on different forks never exchange incompatible payloads.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use containers::{Epoch, ForkVersion, Root, Slot};

use crate::errors::ForkScheduleError;

/// First 4 bytes of the hash tree root of `ForkData`, rendered in topic
/// strings as 8 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForkDigest(pub [u8; 4]);

impl std::fmt::Display for ForkDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ForkDigest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|err| format!("invalid fork digest hex: {err}"))?;
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| format!("fork digest must be 4 bytes, got {:?}", s.len()))?;
        Ok(Self(bytes))
    }
}

/// One entry of the externally supplied fork schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fork {
    /// Epoch at which this fork activates.
    pub epoch: Epoch,
    /// Fork version mixed into the digest.
    #[serde(with = "serde_fork_version")]
    pub version: ForkVersion,
}

mod serde_fork_version {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as SerdeError};

    pub fn serialize<S>(value: &[u8; 4], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 4], D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let stripped = value.strip_prefix("0x").unwrap_or(&value);
        let bytes = hex::decode(stripped)
            .map_err(|err| SerdeError::custom(format!("invalid fork version: {err}")))?;
        bytes
            .try_into()
            .map_err(|_| SerdeError::custom("fork version must be 4 bytes"))
    }
}

/// Ordered list of forks, genesis first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForkSchedule {
    forks: Vec<Fork>,
}

impl ForkSchedule {
    pub fn new(forks: Vec<Fork>) -> Result<Self, ForkScheduleError> {
        let first = forks.first().ok_or(ForkScheduleError::Empty)?;
        if first.epoch != 0 {
            return Err(ForkScheduleError::MissingGenesisFork(first.epoch));
        }

        for pair in forks.windows(2) {
            if pair[1].epoch <= pair[0].epoch {
                return Err(ForkScheduleError::UnorderedForks(pair[1].epoch));
            }
        }

        Ok(Self { forks })
    }

    /// A schedule with a single genesis fork.
    pub fn only_genesis(version: ForkVersion) -> Self {
        Self {
            forks: vec![Fork { epoch: 0, version }],
        }
    }

    /// The fork in force at `epoch`.
    pub fn fork_at_epoch(&self, epoch: Epoch) -> &Fork {
        self.forks
            .iter()
            .rev()
            .find(|fork| fork.epoch <= epoch)
            .unwrap_or(&self.forks[0])
    }

    /// Scheduled fork boundaries strictly after `epoch`.
    pub fn next_boundary(&self, epoch: Epoch) -> Option<Epoch> {
        self.forks
            .iter()
            .map(|fork| fork.epoch)
            .find(|boundary| *boundary > epoch)
    }

    /// The boundary of the fork in force at `epoch`, i.e. when the
    /// previous fork ended. `None` while still on the genesis fork.
    pub fn previous_boundary(&self, epoch: Epoch) -> Option<Epoch> {
        let current = self.fork_at_epoch(epoch).epoch;
        (current > 0).then_some(current)
    }

    pub fn forks(&self) -> &[Fork] {
        &self.forks
    }
}

/// How long before/after a fork boundary both the outgoing and the
/// incoming topic stay subscribed. The gossip fork-transition window is
/// a policy constant of the network, so it is configurable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkTransitionWindow {
    /// Subscribe to the new digest this many epochs before the boundary.
    pub subscribe_before_epochs: u64,
    /// Unsubscribe the old digest this many epochs after the boundary.
    pub unsubscribe_after_epochs: u64,
}

impl Default for ForkTransitionWindow {
    fn default() -> Self {
        Self {
            subscribe_before_epochs: 1,
            unsubscribe_after_epochs: 1,
        }
    }
}

/// Source of the chain's current slot.
pub trait ChainTime: Send + Sync {
    fn current_slot(&self) -> Slot;
}

/// Wall-clock slot derivation from the genesis timestamp.
pub struct SystemClock {
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
}

impl ChainTime for SystemClock {
    fn current_slot(&self) -> Slot {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now.saturating_sub(self.genesis_time) / self.seconds_per_slot
    }
}

/// Maps chain time to the fork digest in force.
///
/// Digests are derived once per fork and cached; the cache is bounded
/// by the number of scheduled forks.
pub struct ForkDigestResolver {
    schedule: ForkSchedule,
    genesis_validators_root: Root,
    slots_per_epoch: u64,
    chain_time: Arc<dyn ChainTime>,
    // Keyed by fork activation epoch, not by queried epoch.
    cache: RwLock<HashMap<Epoch, ForkDigest>>,
}

impl ForkDigestResolver {
    pub fn new(
        schedule: ForkSchedule,
        genesis_validators_root: Root,
        slots_per_epoch: u64,
        chain_time: Arc<dyn ChainTime>,
    ) -> Self {
        assert!(slots_per_epoch > 0, "slots_per_epoch must be non-zero");
        Self {
            schedule,
            genesis_validators_root,
            slots_per_epoch,
            chain_time,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn schedule(&self) -> &ForkSchedule {
        &self.schedule
    }

    pub fn epoch_at_slot(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    pub fn current_epoch(&self) -> Epoch {
        self.epoch_at_slot(self.chain_time.current_slot())
    }

    /// Digest of the fork in force at `epoch`.
    ///
    /// Epoch-bearing inbound messages must be resolved through their
    /// own epoch, not the node's current one, so recently pre-fork
    /// messages still land on their original topic.
    pub fn digest_for_epoch(&self, epoch: Epoch) -> ForkDigest {
        let fork = self.schedule.fork_at_epoch(epoch);

        if let Some(digest) = self.cache.read().get(&fork.epoch) {
            return *digest;
        }

        let digest = compute_fork_digest(fork.version, self.genesis_validators_root);
        self.cache.write().insert(fork.epoch, digest);
        digest
    }

    pub fn digest_for_slot(&self, slot: Slot) -> ForkDigest {
        self.digest_for_epoch(self.epoch_at_slot(slot))
    }

    /// Digest of the fork in force right now.
    pub fn current_digest(&self) -> ForkDigest {
        self.digest_for_epoch(self.current_epoch())
    }

    /// All digests a channel should keep subscribed at `epoch`:
    /// the current fork's digest, the next fork's within the subscribe
    /// window, and the previous fork's within the unsubscribe window.
    pub fn active_digests(&self, epoch: Epoch, window: &ForkTransitionWindow) -> Vec<ForkDigest> {
        let mut digests = vec![self.digest_for_epoch(epoch)];

        if let Some(boundary) = self.schedule.previous_boundary(epoch)
            && epoch - boundary <= window.unsubscribe_after_epochs
        {
            let old = self.digest_for_epoch(boundary - 1);
            if !digests.contains(&old) {
                digests.push(old);
            }
        }

        if let Some(boundary) = self.schedule.next_boundary(epoch)
            && boundary - epoch <= window.subscribe_before_epochs
        {
            let next = self.digest_for_epoch(boundary);
            if !digests.contains(&next) {
                digests.push(next);
            }
        }

        digests
    }
}

/// `hash_tree_root(ForkData { current_version, genesis_validators_root })[..4]`.
///
/// ForkData has two leaves, so the root is one hash over the padded
/// version and the validators root.
pub fn compute_fork_digest(version: ForkVersion, genesis_validators_root: Root) -> ForkDigest {
    let mut version_leaf = [0u8; 32];
    version_leaf[..4].copy_from_slice(&version);

    let mut hasher = Sha256::new();
    hasher.update(version_leaf);
    hasher.update(genesis_validators_root);
    let hash = hasher.finalize();

    let mut digest = [0u8; 4];
    digest.copy_from_slice(&hash[..4]);
    ForkDigest(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    pub(crate) struct ManualClock(pub AtomicU64);

    impl ChainTime for ManualClock {
        fn current_slot(&self) -> Slot {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn two_fork_resolver(boundary: Epoch) -> ForkDigestResolver {
        let schedule = ForkSchedule::new(vec![
            Fork {
                epoch: 0,
                version: [0, 0, 0, 0],
            },
            Fork {
                epoch: boundary,
                version: [1, 0, 0, 0],
            },
        ])
        .unwrap();

        ForkDigestResolver::new(schedule, [0xab; 32], 32, Arc::new(ManualClock(AtomicU64::new(0))))
    }

    #[test]
    fn digest_is_deterministic_and_version_sensitive() {
        let root = [5; 32];
        let d0 = compute_fork_digest([0, 0, 0, 0], root);
        assert_eq!(d0, compute_fork_digest([0, 0, 0, 0], root));
        assert_ne!(d0, compute_fork_digest([1, 0, 0, 0], root));
        assert_ne!(d0, compute_fork_digest([0, 0, 0, 0], [6; 32]));
    }

    #[test]
    fn digest_hex_is_eight_lowercase_chars() {
        let digest = ForkDigest([0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(digest.to_string(), "aabbccdd");
        assert_eq!("aabbccdd".parse::<ForkDigest>().unwrap(), digest);
    }

    #[test]
    fn schedule_validation() {
        assert_eq!(
            ForkSchedule::new(Vec::new()).unwrap_err(),
            ForkScheduleError::Empty
        );
        assert_eq!(
            ForkSchedule::new(vec![Fork {
                epoch: 3,
                version: [0; 4]
            }])
            .unwrap_err(),
            ForkScheduleError::MissingGenesisFork(3)
        );
        assert_eq!(
            ForkSchedule::new(vec![
                Fork {
                    epoch: 0,
                    version: [0; 4]
                },
                Fork {
                    epoch: 5,
                    version: [1; 4]
                },
                Fork {
                    epoch: 5,
                    version: [2; 4]
                },
            ])
            .unwrap_err(),
            ForkScheduleError::UnorderedForks(5)
        );
    }

    #[test]
    fn digest_switches_exactly_at_boundary() {
        let resolver = two_fork_resolver(10);
        let old = resolver.digest_for_epoch(0);
        assert_eq!(resolver.digest_for_epoch(9), old);

        let new = resolver.digest_for_epoch(10);
        assert_ne!(old, new);
        assert_eq!(resolver.digest_for_epoch(11), new);
    }

    #[test]
    fn slot_to_epoch_uses_configured_slots_per_epoch() {
        let resolver = two_fork_resolver(10);
        assert_eq!(resolver.epoch_at_slot(0), 0);
        assert_eq!(resolver.epoch_at_slot(31), 0);
        assert_eq!(resolver.epoch_at_slot(32), 1);
        assert_eq!(resolver.digest_for_slot(9 * 32), resolver.digest_for_epoch(9));
    }

    #[test]
    fn active_digests_span_the_transition_window() {
        let resolver = two_fork_resolver(10);
        let window = ForkTransitionWindow::default();
        let old = resolver.digest_for_epoch(0);
        let new = resolver.digest_for_epoch(10);

        assert_eq!(resolver.active_digests(8, &window), vec![old]);
        // One epoch ahead of the boundary: both.
        assert_eq!(resolver.active_digests(9, &window), vec![old, new]);
        // At and one epoch past the boundary: both, new first.
        assert_eq!(resolver.active_digests(10, &window), vec![new, old]);
        assert_eq!(resolver.active_digests(11, &window), vec![new, old]);
        assert_eq!(resolver.active_digests(12, &window), vec![new]);
    }

    #[test]
    fn current_digest_follows_the_clock() {
        let clock = Arc::new(ManualClock(AtomicU64::new(0)));
        let schedule = ForkSchedule::new(vec![
            Fork {
                epoch: 0,
                version: [0; 4],
            },
            Fork {
                epoch: 2,
                version: [1, 0, 0, 0],
            },
        ])
        .unwrap();
        let resolver = ForkDigestResolver::new(schedule, [0; 32], 32, clock.clone());

        let genesis = resolver.current_digest();
        clock.0.store(2 * 32, Ordering::Relaxed);
        assert_ne!(resolver.current_digest(), genesis);
    }
}
