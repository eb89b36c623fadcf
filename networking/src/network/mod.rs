mod behaviour;
mod service;

pub use behaviour::{BeaconNetworkBehaviour, BeaconNetworkBehaviourEvent};
pub use service::{NetworkCommand, NetworkHandle, NetworkService, NetworkServiceConfig};
