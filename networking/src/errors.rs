//! Error taxonomy for the gossip core.
//!
//! Per-message failures (malformed input, rejected validation) are
//! contained at the pipeline boundary and converted into verdicts or
//! diagnostics; only registry and startup errors are allowed to abort
//! anything.

use thiserror::Error;

/// Why an inbound payload could not be turned into a domain object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// Compressed payload exceeds the transport cap.
    OversizeCompressed { len: usize, max: usize },
    /// Decompressed payload would exceed the per-type cap. Detected
    /// from the snappy header before any decompression work is done.
    OversizeDecoded { len: usize, max: usize },
    /// Snappy decompression failed.
    Decompression(String),
    /// The payload did not match the expected schema shape.
    InvalidSsz(String),
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OversizeCompressed { len, max } => {
                write!(f, "compressed length {len} exceeds {max}")
            }
            Self::OversizeDecoded { len, max } => {
                write!(f, "decoded length {len} exceeds {max}")
            }
            Self::Decompression(err) => write!(f, "snappy decompression failed: {err}"),
            Self::InvalidSsz(err) => write!(f, "invalid ssz: {err}"),
        }
    }
}

/// Decode-time failure. Carries the offending bytes so they can be
/// handed to the diagnostic sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed gossip message ({reason}), {} raw bytes", raw.len())]
pub struct MalformedMessageError {
    pub reason: MalformedReason,
    pub raw: Vec<u8>,
}

impl MalformedMessageError {
    pub fn new(reason: MalformedReason, raw: &[u8]) -> Self {
        Self {
            reason,
            raw: raw.to_vec(),
        }
    }
}

/// A second handler was registered under an already-taken topic
/// string. This is a wiring bug and is fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("topic {topic} is already registered by the {existing} handler")]
pub struct DuplicateTopicError {
    pub topic: String,
    /// Name of the handler holding the registration.
    pub existing: String,
}

/// Outbound publish did not reach the pub/sub layer. Transient; the
/// caller owns any retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("publish to {topic} failed: {reason}")]
pub struct PublishFailed {
    pub topic: String,
    pub reason: String,
}

/// The externally supplied fork schedule is unusable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForkScheduleError {
    #[error("fork schedule is empty")]
    Empty,
    #[error("first fork must start at epoch 0, found epoch {0}")]
    MissingGenesisFork(u64),
    #[error("fork epochs must be strictly increasing, epoch {0} repeats or regresses")]
    UnorderedForks(u64),
}

/// Startup/lifecycle failures surfaced to the node's startup sequence.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error(transparent)]
    DuplicateTopic(#[from] DuplicateTopicError),
    #[error(transparent)]
    ForkSchedule(#[from] ForkScheduleError),
    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
}
