use std::time::Duration;

use libp2p::gossipsub::{Config, ConfigBuilder, ValidationMode};

use crate::gossipsub::message::compute_message_id;

/// Gossipsub behaviour parameters.
///
/// `.validate_messages()` puts the behaviour in manual-validation mode:
/// nothing is forwarded to the mesh until the validation pipeline
/// reports a verdict for the message id.
#[derive(Debug, Clone)]
pub struct GossipsubConfig {
    pub config: Config,
    /// How long the behaviour's own duplicate cache remembers ids.
    pub seen_ttl: Duration,
}

impl GossipsubConfig {
    pub fn new(seconds_per_slot: u64, slots_per_epoch: u64) -> Self {
        // Ids stay cached across a full epoch plus propagation slack.
        let seen_ttl = Duration::from_secs(seconds_per_slot * slots_per_epoch * 2);

        let config = ConfigBuilder::default()
            .heartbeat_interval(Duration::from_millis(700))
            .fanout_ttl(Duration::from_secs(60))
            .history_length(6)
            .history_gossip(3)
            .duplicate_cache_time(seen_ttl)
            .mesh_n(8)
            .mesh_n_low(6)
            .mesh_n_high(12)
            .gossip_lazy(6)
            .validation_mode(ValidationMode::Anonymous)
            .validate_messages()
            .message_id_fn(compute_message_id)
            .build()
            .expect("gossipsub config parameters are static and valid");

        GossipsubConfig { config, seen_ttl }
    }
}

impl Default for GossipsubConfig {
    fn default() -> Self {
        Self::new(12, 32)
    }
}
