//! Gossip topic names.
//!
//! Topics follow the eth2 wire format and must stay bit-exact for
//! interoperability:
//!
//! ```text
//! /{prefix}/{fork_digest}/{message_type}/{encoding}
//!
//! Example: /eth2/aabbccdd/proposer_slashing/ssz_snappy
//! ```
//!
//! The fork digest is 8 lowercase hex characters with no `0x` prefix.
//! The string form is a pure function of `(kind, fork_digest)`; two
//! distinct pairs can never collide because the digest has a fixed
//! width and the message type names are distinct literals.

use libp2p::gossipsub::{IdentTopic, TopicHash};

use crate::fork::ForkDigest;

/// Network identifier prefixing every topic string.
pub const TOPIC_PREFIX: &str = "eth2";

/// Encoding suffix for SSZ with snappy compression. The only encoding
/// this node speaks.
pub const SSZ_SNAPPY_ENCODING_POSTFIX: &str = "ssz_snappy";

pub const BEACON_BLOCK_TOPIC: &str = "beacon_block";
pub const AGGREGATE_AND_PROOF_TOPIC: &str = "beacon_aggregate_and_proof";
pub const ATTESTATION_TOPIC: &str = "beacon_attestation";
pub const VOLUNTARY_EXIT_TOPIC: &str = "voluntary_exit";
pub const PROPOSER_SLASHING_TOPIC: &str = "proposer_slashing";
pub const ATTESTER_SLASHING_TOPIC: &str = "attester_slashing";

/// The kinds of domain objects gossiped by this node. Fixed at build
/// time; each kind owns one topic per fork digest.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq)]
pub enum GossipKind {
    BeaconBlock,
    AggregateAndProof,
    Attestation,
    VoluntaryExit,
    ProposerSlashing,
    AttesterSlashing,
}

impl GossipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GossipKind::BeaconBlock => BEACON_BLOCK_TOPIC,
            GossipKind::AggregateAndProof => AGGREGATE_AND_PROOF_TOPIC,
            GossipKind::Attestation => ATTESTATION_TOPIC,
            GossipKind::VoluntaryExit => VOLUNTARY_EXIT_TOPIC,
            GossipKind::ProposerSlashing => PROPOSER_SLASHING_TOPIC,
            GossipKind::AttesterSlashing => ATTESTER_SLASHING_TOPIC,
        }
    }

    pub fn from_topic_name(name: &str) -> Option<Self> {
        match name {
            BEACON_BLOCK_TOPIC => Some(GossipKind::BeaconBlock),
            AGGREGATE_AND_PROOF_TOPIC => Some(GossipKind::AggregateAndProof),
            ATTESTATION_TOPIC => Some(GossipKind::Attestation),
            VOLUNTARY_EXIT_TOPIC => Some(GossipKind::VoluntaryExit),
            PROPOSER_SLASHING_TOPIC => Some(GossipKind::ProposerSlashing),
            ATTESTER_SLASHING_TOPIC => Some(GossipKind::AttesterSlashing),
            _ => None,
        }
    }

    pub fn all() -> [GossipKind; 6] {
        [
            GossipKind::BeaconBlock,
            GossipKind::AggregateAndProof,
            GossipKind::Attestation,
            GossipKind::VoluntaryExit,
            GossipKind::ProposerSlashing,
            GossipKind::AttesterSlashing,
        ]
    }
}

impl std::fmt::Display for GossipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-qualified gossip topic: one message kind under one fork
/// digest.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct GossipTopic {
    pub fork_digest: ForkDigest,
    pub kind: GossipKind,
}

impl GossipTopic {
    pub fn new(fork_digest: ForkDigest, kind: GossipKind) -> Self {
        Self { fork_digest, kind }
    }

    /// Parse a canonical topic string.
    pub fn from_string(topic_str: &str) -> Result<Self, String> {
        let parts: Vec<&str> = topic_str.trim_start_matches('/').split('/').collect();
        if parts.len() != 4 {
            return Err(format!(
                "invalid topic format: expected 4 parts, got {}",
                parts.len()
            ));
        }

        if parts[0] != TOPIC_PREFIX {
            return Err(format!(
                "invalid prefix: expected '{TOPIC_PREFIX}', got '{}'",
                parts[0]
            ));
        }

        if parts[3] != SSZ_SNAPPY_ENCODING_POSTFIX {
            return Err(format!(
                "invalid encoding: expected '{SSZ_SNAPPY_ENCODING_POSTFIX}', got '{}'",
                parts[3]
            ));
        }

        let fork_digest = parts[1].parse::<ForkDigest>()?;
        let kind = GossipKind::from_topic_name(parts[2])
            .ok_or_else(|| format!("unknown topic name: '{}'", parts[2]))?;

        Ok(Self::new(fork_digest, kind))
    }

    pub fn decode(topic: &TopicHash) -> Result<Self, String> {
        Self::from_string(topic.as_str())
    }
}

impl std::fmt::Display for GossipTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "/{}/{}/{}/{}",
            TOPIC_PREFIX, self.fork_digest, self.kind, SSZ_SNAPPY_ENCODING_POSTFIX
        )
    }
}

impl From<GossipTopic> for IdentTopic {
    fn from(topic: GossipTopic) -> IdentTopic {
        IdentTopic::new(topic.to_string())
    }
}

impl From<GossipTopic> for String {
    fn from(topic: GossipTopic) -> Self {
        topic.to_string()
    }
}

impl From<GossipTopic> for TopicHash {
    fn from(topic: GossipTopic) -> Self {
        TopicHash::from_raw(topic.to_string())
    }
}

/// All topics under one fork digest.
pub fn get_topics(fork_digest: ForkDigest) -> Vec<GossipTopic> {
    GossipKind::all()
        .into_iter()
        .map(|kind| GossipTopic::new(fork_digest, kind))
        .collect()
}
