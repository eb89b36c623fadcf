//! Inbound gossip messages and their content fingerprints.

use std::time::Instant;

use libp2p::gossipsub::{Message, MessageId};
use libp2p_identity::PeerId;
use sha2::{Digest, Sha256};

/// 1-byte domain prepended to the fingerprint preimage when the
/// payload decompressed cleanly.
pub const MESSAGE_DOMAIN_VALID_SNAPPY: &[u8; 1] = &[0x01];

/// 1-byte domain for payloads whose snappy decompression failed, so
/// broken variants can never collide with the valid message.
pub const MESSAGE_DOMAIN_INVALID_SNAPPY: &[u8; 1] = &[0x00];

/// An inbound wire message with its receipt metadata. Transient:
/// consumed by the pipeline and dropped after a verdict is produced.
#[derive(Debug, Clone)]
pub struct GossipMessage {
    /// Canonical topic string the message arrived on.
    pub topic: String,
    /// Decompressed payload bytes.
    pub data: Vec<u8>,
    /// Originating peer, when the transport knows it.
    pub source: Option<PeerId>,
    pub received_at: Instant,
}

impl GossipMessage {
    pub fn new(topic: String, data: Vec<u8>, source: Option<PeerId>) -> Self {
        Self {
            topic,
            data,
            source,
            received_at: Instant::now(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.topic, &self.data)
    }
}

/// Content-derived identifier used for deduplication.
pub type Fingerprint = [u8; 20];

/// `SHA256(domain ++ u64_le(len(topic)) ++ topic ++ data)[..20]`.
///
/// Same function the pub/sub layer uses for message ids, computed here
/// over the decompressed payload (domain `0x01`).
pub fn fingerprint(topic: &str, data: &[u8]) -> Fingerprint {
    let topic_bytes = topic.as_bytes();

    let mut hasher = Sha256::new();
    hasher.update(MESSAGE_DOMAIN_VALID_SNAPPY);
    hasher.update((topic_bytes.len() as u64).to_le_bytes());
    hasher.update(topic_bytes);
    hasher.update(data);
    let hash = hasher.finalize();

    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[..20]);
    out
}

/// Message-id function handed to the gossipsub behaviour. Payloads
/// reaching it already went through the inbound snappy transform, so
/// the valid-snappy domain applies.
pub fn compute_message_id(message: &Message) -> MessageId {
    MessageId::from(&fingerprint(message.topic.as_str(), &message.data)[..])
}
