//! Topic-to-handler dispatch table.
//!
//! `resolve` runs on every inbound message from many worker tasks;
//! `register`/`unregister` only happen at channel start/stop and fork
//! rollover. A read-write lock over the map keeps resolution wait-free
//! in the common no-writer case, and writers swap entries atomically
//! per key.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::DuplicateTopicError;
use crate::gossipsub::message::GossipMessage;
use crate::gossipsub::topic::GossipTopic;
use crate::pipeline::Verdict;

/// Consumer of inbound messages for one topic.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    /// Stable name used in logs and duplicate-registration errors.
    fn name(&self) -> &'static str;

    /// Decode, validate, and classify one inbound message.
    async fn handle(&self, message: GossipMessage) -> Verdict;
}

#[derive(Default)]
pub struct TopicRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TopicHandler>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under the topic's canonical string.
    ///
    /// Fails if the string is already taken; the existing registration
    /// stays untouched.
    pub fn register(
        &self,
        topic: &GossipTopic,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), DuplicateTopicError> {
        let key = topic.to_string();
        match self.handlers.write().entry(key.clone()) {
            Entry::Occupied(existing) => Err(DuplicateTopicError {
                topic: key,
                existing: existing.get().name().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Remove the handler for a topic string. Returns whether one was
    /// registered.
    pub fn unregister(&self, topic: &str) -> bool {
        self.handlers.write().remove(topic).is_some()
    }

    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn TopicHandler>> {
        self.handlers.read().get(topic).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
