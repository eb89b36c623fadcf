pub mod codec;
pub mod config;
pub mod message;
pub mod topic;


use crate::compressor::Compressor;
use libp2p::gossipsub::{AllowAllSubscriptionFilter, Behaviour};

pub type GossipsubBehaviour = Behaviour<Compressor, AllowAllSubscriptionFilter>;

pub use codec::SszSnappyCodec;
pub use config::GossipsubConfig;
pub use message::{Fingerprint, GossipMessage, compute_message_id, fingerprint};
pub use topic::{GossipKind, GossipTopic, SSZ_SNAPPY_ENCODING_POSTFIX, TOPIC_PREFIX, get_topics};
