use libp2p::{connection_limits, identify, swarm::NetworkBehaviour};

use crate::gossipsub::GossipsubBehaviour;

#[derive(NetworkBehaviour)]
pub struct BeaconNetworkBehaviour {
    pub identify: identify::Behaviour,
    pub gossipsub: GossipsubBehaviour,
    pub connection_limits: connection_limits::Behaviour,
}
