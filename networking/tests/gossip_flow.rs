//! End-to-end flow through channels, registry, router and pipeline,
//! with the libp2p swarm replaced by a recording fake.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use ssz::Encode;
use tokio::sync::{mpsc, oneshot};

use containers::{Attestation, AttestationData, Checkpoint, Epoch, Signature, Slot};

use networking::adapter::GossipNetwork;
use networking::channel::{ChannelContext, Channels, Validators};
use networking::diagnostics::DiagnosticSink;
use networking::errors::{GossipError, PublishFailed};
use networking::fork::{
    ChainTime, Fork, ForkDigestResolver, ForkSchedule, ForkTransitionWindow,
};
use networking::gossipsub::message::GossipMessage;
use networking::gossipsub::topic::{GossipKind, GossipTopic, get_topics};
use networking::pipeline::Verdict;
use networking::registry::TopicRegistry;
use networking::router::GossipRouter;
use networking::types::{AcceptedMessage, ChainMessage};

const SLOTS_PER_EPOCH: u64 = 8;
const FORK_BOUNDARY: Epoch = 10;

struct ManualClock(AtomicU64);

impl ManualClock {
    fn set_epoch(&self, epoch: Epoch) {
        self.0.store(epoch * SLOTS_PER_EPOCH, Ordering::Relaxed);
    }
}

impl ChainTime for ManualClock {
    fn current_slot(&self) -> Slot {
        self.0.load(Ordering::Relaxed)
    }
}

/// Records every transport interaction instead of talking to a swarm.
#[derive(Default)]
struct FakeNetwork {
    subscribed: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl GossipNetwork for FakeNetwork {
    fn subscribe(&self, topic: &str) -> Result<(), GossipError> {
        self.subscribed.lock().push(topic.to_owned());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) {
        self.unsubscribed.lock().push(topic.to_owned());
    }

    fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), PublishFailed> {
        self.published.lock().push((topic.to_owned(), data));
        Ok(())
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    resolver: Arc<ForkDigestResolver>,
    registry: Arc<TopicRegistry>,
    network: Arc<FakeNetwork>,
    accepted: mpsc::UnboundedReceiver<AcceptedMessage>,
    channels: Channels,
}

fn harness_with_validators(validators: Validators) -> Harness {
    let clock = Arc::new(ManualClock(AtomicU64::new(0)));
    let schedule = ForkSchedule::new(vec![
        Fork {
            epoch: 0,
            version: [0, 0, 0, 1],
        },
        Fork {
            epoch: FORK_BOUNDARY,
            version: [0, 0, 0, 2],
        },
    ])
    .expect("schedule is well-formed");

    let resolver = Arc::new(ForkDigestResolver::new(
        schedule,
        [0x42; 32],
        SLOTS_PER_EPOCH,
        clock.clone(),
    ));
    let registry = Arc::new(TopicRegistry::new());
    let network = Arc::new(FakeNetwork::default());

    let ctx = ChannelContext {
        resolver: resolver.clone(),
        registry: registry.clone(),
        network: network.clone(),
        diagnostics: Arc::new(DiagnosticSink::disabled()),
        window: ForkTransitionWindow::default(),
        seen_capacity: 128,
    };

    let (accepted_tx, accepted) = mpsc::unbounded_channel();
    let channels = Channels::new(&ctx, validators, accepted_tx);

    Harness {
        clock,
        resolver,
        registry,
        network,
        accepted,
        channels,
    }
}

fn harness() -> Harness {
    harness_with_validators(Validators::accept_all())
}

fn sample_attestation(slot: Slot) -> Attestation {
    Attestation {
        aggregation_bits: vec![0b101],
        data: AttestationData {
            slot,
            index: 1,
            beacon_block_root: [9; 32],
            source: Checkpoint {
                epoch: slot / SLOTS_PER_EPOCH - 1,
                root: [3; 32],
            },
            target: Checkpoint {
                epoch: slot / SLOTS_PER_EPOCH,
                root: [4; 32],
            },
        },
        signature: Signature([0x11; 96]),
    }
}

fn attestation_topic(harness: &Harness, epoch: Epoch) -> String {
    GossipTopic::new(
        harness.resolver.digest_for_epoch(epoch),
        GossipKind::Attestation,
    )
    .to_string()
}

async fn route(router: &GossipRouter, message: GossipMessage) -> Verdict {
    let (tx, rx) = oneshot::channel();
    router.enqueue(
        message,
        Box::new(move |verdict| {
            let _ = tx.send(verdict);
        }),
    );
    rx.await.expect("verdict callback fired")
}

#[tokio::test]
async fn start_subscribes_to_canonical_topics() {
    let harness = harness();
    harness.channels.start().expect("fresh channels start");

    let digest = harness.resolver.digest_for_epoch(0);
    let subscribed = harness.network.subscribed.lock().clone();

    assert_eq!(subscribed.len(), 6);
    for topic in get_topics(digest) {
        let expected = format!("/eth2/{digest}/{}/ssz_snappy", topic.kind);
        assert!(subscribed.contains(&expected), "{expected}");
    }
    assert_eq!(harness.registry.len(), 6);
}

#[tokio::test]
async fn publish_derives_topic_from_message_own_slot() {
    let harness = harness();
    // Node clock is two epochs past the fork; the attestation is from
    // before it and must go out on the pre-fork topic.
    harness.clock.set_epoch(FORK_BOUNDARY + 2);
    harness.channels.start().expect("fresh channels start");

    let attestation = sample_attestation((FORK_BOUNDARY - 1) * SLOTS_PER_EPOCH);
    harness
        .channels
        .attestation
        .publish(&attestation)
        .expect("fake network never fails");

    let published = harness.network.published.lock().clone();
    let (topic, data) = published.last().expect("one publish recorded");

    assert_eq!(*topic, attestation_topic(&harness, FORK_BOUNDARY - 1));
    assert_eq!(*data, attestation.as_ssz_bytes());
}

#[tokio::test]
async fn fork_transition_overlaps_subscriptions() {
    let harness = harness();
    harness.clock.set_epoch(FORK_BOUNDARY - 2);
    harness.channels.start().expect("fresh channels start");

    let old_topic = attestation_topic(&harness, FORK_BOUNDARY - 1);
    let new_topic = attestation_topic(&harness, FORK_BOUNDARY);

    // One epoch before the boundary the new topic joins.
    for channel in harness.channels.fork_aware() {
        channel.on_epoch(FORK_BOUNDARY - 1);
    }
    let subscribed = harness.network.subscribed.lock().clone();
    assert!(subscribed.contains(&new_topic));
    assert!(harness.network.unsubscribed.lock().is_empty());

    // Through the boundary and one epoch past it the old topic stays,
    // and both topic strings keep resolving to a handler.
    for epoch in [FORK_BOUNDARY, FORK_BOUNDARY + 1] {
        for channel in harness.channels.fork_aware() {
            channel.on_epoch(epoch);
        }
        assert!(!harness.network.unsubscribed.lock().contains(&old_topic));
        assert!(harness.registry.resolve(&old_topic).is_some());
        assert!(harness.registry.resolve(&new_topic).is_some());
    }

    // Two epochs past the boundary it is dropped.
    for channel in harness.channels.fork_aware() {
        channel.on_epoch(FORK_BOUNDARY + 2);
    }
    assert!(harness.network.unsubscribed.lock().contains(&old_topic));
    assert_eq!(
        harness.channels.attestation.active_digests(),
        vec![harness.resolver.digest_for_epoch(FORK_BOUNDARY)]
    );
}

#[tokio::test]
async fn duplicate_messages_validate_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut validators = Validators::accept_all();
    validators.attestation = Arc::new(move |_: &Attestation| {
        counter.fetch_add(1, Ordering::SeqCst);
        Verdict::Accept
    });

    let mut harness = harness_with_validators(validators);
    harness.channels.start().expect("fresh channels start");
    let router = GossipRouter::new(harness.registry.clone(), 2, 16);

    let topic = attestation_topic(&harness, 0);
    let data = sample_attestation(SLOTS_PER_EPOCH).as_ssz_bytes();

    let first = route(&router, GossipMessage::new(topic.clone(), data.clone(), None)).await;
    let second = route(&router, GossipMessage::new(topic, data, None)).await;

    assert_eq!(first, Verdict::Accept);
    assert_eq!(second, Verdict::Ignore);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Only the first copy reaches consensus logic.
    let delivered = harness.accepted.recv().await.expect("one accepted message");
    assert!(matches!(delivered.message, ChainMessage::Attestation(_)));
    assert!(harness.accepted.try_recv().is_err());

    router.shutdown().await;
}

#[tokio::test]
async fn rejected_messages_are_revalidated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut validators = Validators::accept_all();
    validators.attestation = Arc::new(move |_: &Attestation| {
        counter.fetch_add(1, Ordering::SeqCst);
        Verdict::reject("bad signature")
    });

    let harness = harness_with_validators(validators);
    harness.channels.start().expect("fresh channels start");
    let router = GossipRouter::new(harness.registry.clone(), 1, 16);

    let topic = attestation_topic(&harness, 0);
    let data = sample_attestation(SLOTS_PER_EPOCH).as_ssz_bytes();

    for _ in 0..2 {
        let verdict = route(&router, GossipMessage::new(topic.clone(), data.clone(), None)).await;
        assert!(matches!(verdict, Verdict::Reject(_)));
    }

    // REJECT is not remembered, so the second copy was validated again.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    router.shutdown().await;
}

#[tokio::test]
async fn malformed_payload_is_rejected_without_validation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut validators = Validators::accept_all();
    validators.attestation = Arc::new(move |_: &Attestation| {
        counter.fetch_add(1, Ordering::SeqCst);
        Verdict::Accept
    });

    let harness = harness_with_validators(validators);
    harness.channels.start().expect("fresh channels start");
    let router = GossipRouter::new(harness.registry.clone(), 1, 16);

    let topic = attestation_topic(&harness, 0);
    let verdict = route(&router, GossipMessage::new(topic, vec![0xff; 3], None)).await;

    assert!(matches!(verdict, Verdict::Reject(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    router.shutdown().await;
}

#[tokio::test]
async fn unknown_topic_is_counted_not_dispatched() {
    let harness = harness();
    harness.channels.start().expect("fresh channels start");
    let router = GossipRouter::new(harness.registry.clone(), 1, 16);

    let verdict = route(
        &router,
        GossipMessage::new("/eth2/00000000/shard_block/ssz_snappy".to_owned(), vec![1], None),
    )
    .await;

    assert_eq!(verdict, Verdict::Ignore);
    assert_eq!(router.unknown_topic_count(), 1);
    router.shutdown().await;
}

#[tokio::test]
async fn verdicts_after_stop_are_discarded() {
    let mut harness = harness();
    harness.channels.start().expect("fresh channels start");

    let topic = attestation_topic(&harness, 0);
    let data = sample_attestation(SLOTS_PER_EPOCH).as_ssz_bytes();

    // The handler reference outlives its registration, like a worker
    // mid-validation while the node shuts down.
    let handler = harness.registry.resolve(&topic).expect("registered");
    harness.channels.stop();

    let verdict = handler.handle(GossipMessage::new(topic, data, None)).await;

    assert_eq!(verdict, Verdict::Ignore);
    assert!(harness.accepted.try_recv().is_err());
}

#[tokio::test]
async fn stop_unsubscribes_everything_once() {
    let harness = harness();
    harness.channels.start().expect("fresh channels start");

    harness.channels.stop();
    harness.channels.stop();

    assert_eq!(harness.network.unsubscribed.lock().len(), 6);
    assert_eq!(harness.registry.len(), 0);
}
