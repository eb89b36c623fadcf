//! Boundary to the underlying publish/subscribe network.
//!
//! Channels talk to the transport only through this trait; the libp2p
//! swarm in `crate::network` implements it for production and tests
//! substitute recording fakes.

use crate::errors::{GossipError, PublishFailed};

pub trait GossipNetwork: Send + Sync {
    /// Join a topic. Messages arriving on it are delivered through the
    /// router to whatever handler the registry resolves.
    fn subscribe(&self, topic: &str) -> Result<(), GossipError>;

    /// Leave a topic. Best-effort; leaving an unknown topic is fine.
    fn unsubscribe(&self, topic: &str);

    /// Fire-and-forget publish of an encoded payload. An `Err` means
    /// the request never reached the pub/sub layer; delivery failures
    /// past that point are observed asynchronously and only logged.
    fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), PublishFailed>;
}
