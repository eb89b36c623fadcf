//! Per-message-type gossip channels.
//!
//! A channel owns the subscribe/publish lifecycle for one message
//! kind across fork transitions: it derives topic names through the
//! fork digest resolver, registers its handler in the topic registry,
//! and funnels inbound payloads through codec and validation pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use ssz::{Decode, Encode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use containers::{
    Attestation, AttesterSlashing, Epoch, ProposerSlashing, SignedAggregateAndProof,
    SignedBeaconBlock, SignedVoluntaryExit, Slot,
};

use crate::adapter::GossipNetwork;
use crate::diagnostics::DiagnosticSink;
use crate::errors::{GossipError, PublishFailed};
use crate::fork::{ForkDigest, ForkDigestResolver, ForkTransitionWindow};
use crate::gossipsub::codec::SszSnappyCodec;
use crate::gossipsub::message::GossipMessage;
use crate::gossipsub::topic::{GossipKind, GossipTopic};
use crate::pipeline::{ValidationPipeline, Validator, Verdict};
use crate::registry::{TopicHandler, TopicRegistry};
use crate::types::{AcceptedMessage, ChainMessage, OutboundGossipRequest};

/// Decoded-size cap for block payloads.
pub const MAX_BLOCK_MESSAGE_SIZE: usize = crate::compressor::MAX_GOSSIP_PAYLOAD;

/// Decoded-size cap for every non-block payload.
pub const MAX_OPERATION_MESSAGE_SIZE: usize = 1024 * 1024;

/// Static description of one gossiped message type.
///
/// One implementation exists per [`GossipKind`]; the channel is
/// monomorphized over it, so dispatch on the hot decode/validate path
/// is static.
pub trait TopicKind: Send + Sync + 'static {
    type Message: Encode + Decode + Clone + Send + Sync + 'static;

    const KIND: GossipKind;

    /// Cap on the decoded payload size for this type.
    const MAX_MESSAGE_SIZE: usize;

    /// Slot named by the message itself, when it carries one. Used to
    /// derive the topic from the message's own chain time.
    fn message_slot(message: &Self::Message) -> Option<Slot> {
        let _ = message;
        None
    }

    /// Epoch named by the message itself, for types that carry an
    /// epoch rather than a slot.
    fn message_epoch(message: &Self::Message) -> Option<Epoch> {
        let _ = message;
        None
    }

    fn into_chain_message(message: Self::Message) -> ChainMessage;
}

pub struct BeaconBlockKind;

impl TopicKind for BeaconBlockKind {
    type Message = SignedBeaconBlock;
    const KIND: GossipKind = GossipKind::BeaconBlock;
    const MAX_MESSAGE_SIZE: usize = MAX_BLOCK_MESSAGE_SIZE;

    fn message_slot(message: &Self::Message) -> Option<Slot> {
        Some(message.message.slot)
    }

    fn into_chain_message(message: Self::Message) -> ChainMessage {
        ChainMessage::Block(message)
    }
}

pub struct AggregateAndProofKind;

impl TopicKind for AggregateAndProofKind {
    type Message = SignedAggregateAndProof;
    const KIND: GossipKind = GossipKind::AggregateAndProof;
    const MAX_MESSAGE_SIZE: usize = MAX_OPERATION_MESSAGE_SIZE;

    fn message_slot(message: &Self::Message) -> Option<Slot> {
        Some(message.message.aggregate.data.slot)
    }

    fn into_chain_message(message: Self::Message) -> ChainMessage {
        ChainMessage::AggregateAndProof(message)
    }
}

pub struct AttestationKind;

impl TopicKind for AttestationKind {
    type Message = Attestation;
    const KIND: GossipKind = GossipKind::Attestation;
    const MAX_MESSAGE_SIZE: usize = MAX_OPERATION_MESSAGE_SIZE;

    fn message_slot(message: &Self::Message) -> Option<Slot> {
        Some(message.data.slot)
    }

    fn into_chain_message(message: Self::Message) -> ChainMessage {
        ChainMessage::Attestation(message)
    }
}

pub struct VoluntaryExitKind;

impl TopicKind for VoluntaryExitKind {
    type Message = SignedVoluntaryExit;
    const KIND: GossipKind = GossipKind::VoluntaryExit;
    const MAX_MESSAGE_SIZE: usize = MAX_OPERATION_MESSAGE_SIZE;

    fn message_epoch(message: &Self::Message) -> Option<Epoch> {
        Some(message.message.epoch)
    }

    fn into_chain_message(message: Self::Message) -> ChainMessage {
        ChainMessage::VoluntaryExit(message)
    }
}

pub struct ProposerSlashingKind;

impl TopicKind for ProposerSlashingKind {
    type Message = ProposerSlashing;
    const KIND: GossipKind = GossipKind::ProposerSlashing;
    const MAX_MESSAGE_SIZE: usize = MAX_OPERATION_MESSAGE_SIZE;

    fn message_slot(message: &Self::Message) -> Option<Slot> {
        Some(message.signed_header_1.message.slot)
    }

    fn into_chain_message(message: Self::Message) -> ChainMessage {
        ChainMessage::ProposerSlashing(message)
    }
}

pub struct AttesterSlashingKind;

impl TopicKind for AttesterSlashingKind {
    type Message = AttesterSlashing;
    const KIND: GossipKind = GossipKind::AttesterSlashing;
    const MAX_MESSAGE_SIZE: usize = MAX_OPERATION_MESSAGE_SIZE;

    fn message_slot(message: &Self::Message) -> Option<Slot> {
        Some(message.attestation_1.data.slot)
    }

    fn into_chain_message(message: Self::Message) -> ChainMessage {
        ChainMessage::AttesterSlashing(message)
    }
}

/// Shared collaborators handed to every channel.
#[derive(Clone)]
pub struct ChannelContext {
    pub resolver: Arc<ForkDigestResolver>,
    pub registry: Arc<TopicRegistry>,
    pub network: Arc<dyn GossipNetwork>,
    pub diagnostics: Arc<DiagnosticSink>,
    pub window: ForkTransitionWindow,
    /// Per-type seen-cache capacity.
    pub seen_capacity: usize,
}

/// Inbound side of a channel: registered in the topic registry and
/// invoked by router workers.
struct ChannelHandler<K: TopicKind> {
    codec: SszSnappyCodec,
    pipeline: ValidationPipeline<K::Message>,
    accepted: mpsc::UnboundedSender<AcceptedMessage>,
    diagnostics: Arc<DiagnosticSink>,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl<K: TopicKind> TopicHandler for ChannelHandler<K> {
    fn name(&self) -> &'static str {
        K::KIND.as_str()
    }

    async fn handle(&self, message: GossipMessage) -> Verdict {
        let decoded = match self.codec.decode::<K::Message>(&message.data) {
            Ok(decoded) => decoded,
            Err(err) => {
                debug!(topic = %message.topic, reason = %err.reason, "gossip decode failed");
                self.diagnostics.record_failure(
                    K::KIND,
                    &err.raw,
                    &message.topic,
                    "decode_failed",
                );
                return Verdict::reject("malformed message");
            }
        };

        let fingerprint = message.fingerprint();
        let verdict = self.pipeline.process(fingerprint, &decoded).await;

        // Results of validations that outlive the channel are dropped.
        if self.stopped.load(Ordering::Acquire) {
            return Verdict::Ignore;
        }

        match &verdict {
            Verdict::Accept => {
                let accepted = AcceptedMessage {
                    message: K::into_chain_message(decoded),
                    source: message.source,
                };
                if self.accepted.send(accepted).is_err() {
                    debug!(kind = %K::KIND, "accepted-message consumer is gone");
                }
            }
            Verdict::Reject(reason) => {
                debug!(topic = %message.topic, %reason, "gossip message rejected");
                self.diagnostics
                    .record_failure(K::KIND, &message.data, &message.topic, "rejected");
            }
            Verdict::Ignore | Verdict::SaveForFuture => {}
        }

        verdict
    }
}

/// Subscribe/publish lifecycle owner for one message kind.
pub struct GossipChannel<K: TopicKind> {
    resolver: Arc<ForkDigestResolver>,
    registry: Arc<TopicRegistry>,
    network: Arc<dyn GossipNetwork>,
    window: ForkTransitionWindow,
    handler: Arc<ChannelHandler<K>>,
    codec: SszSnappyCodec,
    // Guards subscription changes; one transition in flight at a time.
    active: Mutex<Vec<ForkDigest>>,
    stopped: Arc<AtomicBool>,
}

impl<K: TopicKind> GossipChannel<K> {
    pub fn new(
        ctx: &ChannelContext,
        validator: Arc<dyn Validator<K::Message>>,
        accepted: mpsc::UnboundedSender<AcceptedMessage>,
    ) -> Arc<Self> {
        let codec = SszSnappyCodec::new(K::MAX_MESSAGE_SIZE);
        let stopped = Arc::new(AtomicBool::new(false));

        let handler = Arc::new(ChannelHandler::<K> {
            codec,
            pipeline: ValidationPipeline::new(validator, ctx.seen_capacity),
            accepted,
            diagnostics: ctx.diagnostics.clone(),
            stopped: stopped.clone(),
        });

        Arc::new(Self {
            resolver: ctx.resolver.clone(),
            registry: ctx.registry.clone(),
            network: ctx.network.clone(),
            window: ctx.window,
            handler,
            codec,
            active: Mutex::new(Vec::new()),
            stopped,
        })
    }

    pub fn kind(&self) -> GossipKind {
        K::KIND
    }

    /// Subscribe to the topics active at the current epoch.
    pub fn start(&self) -> Result<(), GossipError> {
        self.stopped.store(false, Ordering::Release);
        self.update_subscriptions(self.resolver.current_epoch())
    }

    /// Reconcile subscriptions with the fork digests active at
    /// `epoch`. Around a fork boundary both the outgoing and incoming
    /// digest stay subscribed for the configured window, so there is
    /// no propagation gap. New topics are joined before old ones are
    /// left.
    pub fn update_subscriptions(&self, epoch: Epoch) -> Result<(), GossipError> {
        let mut active = self.active.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        let wanted = self.resolver.active_digests(epoch, &self.window);

        for digest in &wanted {
            if !active.contains(digest) {
                let topic = GossipTopic::new(*digest, K::KIND);
                self.registry
                    .register(&topic, self.handler.clone() as Arc<dyn TopicHandler>)?;
                self.network.subscribe(&topic.to_string())?;
                active.push(*digest);
                info!(topic = %topic, "subscribed to gossip topic");
            }
        }

        active.retain(|digest| {
            if wanted.contains(digest) {
                return true;
            }
            let topic = GossipTopic::new(*digest, K::KIND);
            self.network.unsubscribe(&topic.to_string());
            self.registry.unregister(&topic.to_string());
            info!(topic = %topic, "unsubscribed from gossip topic");
            false
        });

        Ok(())
    }

    /// Encode and publish a message on its current topic.
    ///
    /// The topic digest is derived from the message's own chain time
    /// when it names one, falling back to the node's current epoch.
    /// Failures are transient and not retried here; gossip payloads
    /// are re-derivable by the caller.
    pub fn publish(&self, message: &K::Message) -> Result<(), PublishFailed> {
        let epoch = K::message_epoch(message)
            .or_else(|| K::message_slot(message).map(|slot| self.resolver.epoch_at_slot(slot)))
            .unwrap_or_else(|| self.resolver.current_epoch());

        let digest = self.resolver.digest_for_epoch(epoch);
        let topic = GossipTopic::new(digest, K::KIND).to_string();
        let data = self.codec.encode(message);

        self.network.publish(&topic, data)
    }

    /// Unsubscribe everything this channel owns. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);

        let mut active = self.active.lock();
        for digest in active.drain(..) {
            let topic = GossipTopic::new(digest, K::KIND).to_string();
            self.network.unsubscribe(&topic);
            self.registry.unregister(&topic);
        }
    }

    /// Digests currently subscribed; test and introspection hook.
    pub fn active_digests(&self) -> Vec<ForkDigest> {
        self.active.lock().clone()
    }
}

/// Object-safe view of a channel for epoch ticks and shutdown.
pub trait ForkAware: Send + Sync {
    fn on_epoch(&self, epoch: Epoch);
    fn stop(&self);
}

impl<K: TopicKind> ForkAware for GossipChannel<K> {
    fn on_epoch(&self, epoch: Epoch) {
        if let Err(err) = self.update_subscriptions(epoch) {
            // Duplicate registration mid-run means channel wiring is
            // broken; surface loudly but keep the node up.
            warn!(kind = %K::KIND, %err, "fork-transition subscription update failed");
        }
    }

    fn stop(&self) {
        GossipChannel::stop(self);
    }
}

/// External validators, one per message kind.
pub struct Validators {
    pub block: Arc<dyn Validator<SignedBeaconBlock>>,
    pub aggregate_and_proof: Arc<dyn Validator<SignedAggregateAndProof>>,
    pub attestation: Arc<dyn Validator<Attestation>>,
    pub voluntary_exit: Arc<dyn Validator<SignedVoluntaryExit>>,
    pub proposer_slashing: Arc<dyn Validator<ProposerSlashing>>,
    pub attester_slashing: Arc<dyn Validator<AttesterSlashing>>,
}

impl Validators {
    /// Accept everything. Placeholder wiring for nodes that attach
    /// real chain validation elsewhere.
    pub fn accept_all() -> Self {
        Self {
            block: Arc::new(|_: &SignedBeaconBlock| Verdict::Accept),
            aggregate_and_proof: Arc::new(|_: &SignedAggregateAndProof| Verdict::Accept),
            attestation: Arc::new(|_: &Attestation| Verdict::Accept),
            voluntary_exit: Arc::new(|_: &SignedVoluntaryExit| Verdict::Accept),
            proposer_slashing: Arc::new(|_: &ProposerSlashing| Verdict::Accept),
            attester_slashing: Arc::new(|_: &AttesterSlashing| Verdict::Accept),
        }
    }
}

/// The full set of gossip channels for this node.
pub struct Channels {
    pub beacon_block: Arc<GossipChannel<BeaconBlockKind>>,
    pub aggregate_and_proof: Arc<GossipChannel<AggregateAndProofKind>>,
    pub attestation: Arc<GossipChannel<AttestationKind>>,
    pub voluntary_exit: Arc<GossipChannel<VoluntaryExitKind>>,
    pub proposer_slashing: Arc<GossipChannel<ProposerSlashingKind>>,
    pub attester_slashing: Arc<GossipChannel<AttesterSlashingKind>>,
}

impl Channels {
    pub fn new(
        ctx: &ChannelContext,
        validators: Validators,
        accepted: mpsc::UnboundedSender<AcceptedMessage>,
    ) -> Self {
        Self {
            beacon_block: GossipChannel::new(ctx, validators.block, accepted.clone()),
            aggregate_and_proof: GossipChannel::new(
                ctx,
                validators.aggregate_and_proof,
                accepted.clone(),
            ),
            attestation: GossipChannel::new(ctx, validators.attestation, accepted.clone()),
            voluntary_exit: GossipChannel::new(ctx, validators.voluntary_exit, accepted.clone()),
            proposer_slashing: GossipChannel::new(
                ctx,
                validators.proposer_slashing,
                accepted.clone(),
            ),
            attester_slashing: GossipChannel::new(ctx, validators.attester_slashing, accepted),
        }
    }

    /// Errors here are startup wiring bugs and abort the node.
    pub fn start(&self) -> Result<(), GossipError> {
        self.beacon_block.start()?;
        self.aggregate_and_proof.start()?;
        self.attestation.start()?;
        self.voluntary_exit.start()?;
        self.proposer_slashing.start()?;
        self.attester_slashing.start()?;
        Ok(())
    }

    pub fn stop(&self) {
        for channel in self.fork_aware() {
            channel.stop();
        }
    }

    pub fn fork_aware(&self) -> Vec<Arc<dyn ForkAware>> {
        vec![
            self.beacon_block.clone(),
            self.aggregate_and_proof.clone(),
            self.attestation.clone(),
            self.voluntary_exit.clone(),
            self.proposer_slashing.clone(),
            self.attester_slashing.clone(),
        ]
    }

    /// Route an outbound request to the owning channel.
    pub fn publish_request(&self, request: OutboundGossipRequest) -> Result<(), PublishFailed> {
        match request {
            OutboundGossipRequest::PublishBlock(block) => self.beacon_block.publish(&block),
            OutboundGossipRequest::PublishAggregateAndProof(aggregate) => {
                self.aggregate_and_proof.publish(&aggregate)
            }
            OutboundGossipRequest::PublishAttestation(attestation) => {
                self.attestation.publish(&attestation)
            }
            OutboundGossipRequest::PublishVoluntaryExit(exit) => {
                self.voluntary_exit.publish(&exit)
            }
            OutboundGossipRequest::PublishProposerSlashing(slashing) => {
                self.proposer_slashing.publish(&slashing)
            }
            OutboundGossipRequest::PublishAttesterSlashing(slashing) => {
                self.attester_slashing.publish(&slashing)
            }
        }
    }
}
