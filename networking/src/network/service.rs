use std::{
    collections::HashMap,
    fs::File,
    net::IpAddr,
    num::{NonZeroU8, NonZeroUsize},
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Result, anyhow};
use futures::StreamExt;
use libp2p::{
    Multiaddr, SwarmBuilder,
    connection_limits::{self, ConnectionLimits},
    gossipsub::{Event, IdentTopic, MessageAcceptance, MessageAuthenticity, MessageId},
    identify,
    multiaddr::Protocol,
    swarm::{Config, Swarm, SwarmEvent},
};
use libp2p_identity::{Keypair, PeerId};
use parking_lot::Mutex;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, trace, warn};

use containers::Epoch;

use crate::{
    adapter::GossipNetwork,
    channel::ForkAware,
    compressor::Compressor,
    errors::{GossipError, PublishFailed},
    fork::ForkDigestResolver,
    gossipsub::{GossipsubBehaviour, config::GossipsubConfig, message::GossipMessage},
    network::behaviour::{BeaconNetworkBehaviour, BeaconNetworkBehaviourEvent},
    pipeline::Verdict,
    router::GossipRouter,
    types::ConnectionState,
};

#[derive(Debug, Clone)]
pub struct NetworkServiceConfig {
    pub gossipsub_config: GossipsubConfig,
    pub socket_address: IpAddr,
    pub socket_port: u16,
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
    bootnodes: Vec<Multiaddr>,
}

fn parse_bootnode_argument(arg: &str) -> Vec<Multiaddr> {
    if let Ok(addr) = arg.parse::<Multiaddr>() {
        return vec![addr];
    }

    let Ok(file) = File::open(arg) else {
        warn!(
            "value {arg:?} provided as bootnode is not recognized - it is not a valid multiaddr nor a path to a file containing bootnodes."
        );

        return Vec::new();
    };

    let bootnodes: Vec<Multiaddr> = match serde_yaml::from_reader(file) {
        Ok(value) => value,
        Err(err) => {
            warn!("failed to read bootnodes from {arg:?}: {err:?}");

            return Vec::new();
        }
    };

    if bootnodes.is_empty() {
        warn!("provided file with bootnodes {arg:?} is empty");
    }

    bootnodes
}

impl NetworkServiceConfig {
    pub fn new(
        gossipsub_config: GossipsubConfig,
        socket_address: IpAddr,
        socket_port: u16,
        seconds_per_slot: u64,
        slots_per_epoch: u64,
        bootnodes: Vec<String>,
    ) -> Self {
        let bootnodes = bootnodes
            .iter()
            .flat_map(|addr_str| parse_bootnode_argument(addr_str))
            .collect();

        NetworkServiceConfig {
            gossipsub_config,
            socket_address,
            socket_port,
            seconds_per_slot,
            slots_per_epoch,
            bootnodes,
        }
    }
}

/// Instruction sent from channels to the swarm task.
#[derive(Debug)]
pub enum NetworkCommand {
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, data: Vec<u8> },
}

/// Cheap cloneable front half of the network service. Channels hold
/// this as `Arc<dyn GossipNetwork>` and never touch the swarm
/// directly.
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    tx: mpsc::UnboundedSender<NetworkCommand>,
}

impl NetworkHandle {
    /// Create a handle together with the receiving end for the
    /// service. Commands queue until the service loop starts.
    pub fn new_pair() -> (Self, mpsc::UnboundedReceiver<NetworkCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl GossipNetwork for NetworkHandle {
    fn subscribe(&self, topic: &str) -> Result<(), GossipError> {
        self.tx
            .send(NetworkCommand::Subscribe(topic.to_owned()))
            .map_err(|_| GossipError::SubscribeFailed {
                topic: topic.to_owned(),
                reason: "network service stopped".to_owned(),
            })
    }

    fn unsubscribe(&self, topic: &str) {
        let _ = self.tx.send(NetworkCommand::Unsubscribe(topic.to_owned()));
    }

    fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), PublishFailed> {
        self.tx
            .send(NetworkCommand::Publish {
                topic: topic.to_owned(),
                data,
            })
            .map_err(|_| PublishFailed {
                topic: topic.to_owned(),
                reason: "network service stopped".to_owned(),
            })
    }
}

/// Validation verdict travelling back from router workers to the
/// swarm task, which is the only place gossipsub can be told.
struct ValidationOutcome {
    message_id: MessageId,
    propagation_source: PeerId,
    verdict: Verdict,
}

fn acceptance_for(verdict: &Verdict) -> MessageAcceptance {
    match verdict {
        Verdict::Accept => MessageAcceptance::Accept,
        // SAVE_FOR_FUTURE keeps the message out of the mesh without
        // penalizing the sender, same as IGNORE.
        Verdict::Ignore | Verdict::SaveForFuture => MessageAcceptance::Ignore,
        Verdict::Reject(_) => MessageAcceptance::Reject,
    }
}

pub struct NetworkService {
    network_config: Arc<NetworkServiceConfig>,
    swarm: Swarm<BeaconNetworkBehaviour>,
    peer_table: Arc<Mutex<HashMap<PeerId, ConnectionState>>>,
    peer_count: Arc<AtomicU64>,
    resolver: Arc<ForkDigestResolver>,
    router: Arc<GossipRouter>,
    fork_aware: Vec<Arc<dyn ForkAware>>,
    commands: mpsc::UnboundedReceiver<NetworkCommand>,
    outcome_tx: mpsc::UnboundedSender<ValidationOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<ValidationOutcome>,
}

impl NetworkService {
    pub fn new(
        network_config: Arc<NetworkServiceConfig>,
        resolver: Arc<ForkDigestResolver>,
        router: Arc<GossipRouter>,
        fork_aware: Vec<Arc<dyn ForkAware>>,
        commands: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<Self> {
        let local_key = Keypair::generate_secp256k1();
        Self::new_with_keypair(
            network_config,
            resolver,
            router,
            fork_aware,
            commands,
            local_key,
        )
    }

    pub fn new_with_keypair(
        network_config: Arc<NetworkServiceConfig>,
        resolver: Arc<ForkDigestResolver>,
        router: Arc<GossipRouter>,
        fork_aware: Vec<Arc<dyn ForkAware>>,
        commands: mpsc::UnboundedReceiver<NetworkCommand>,
        local_key: Keypair,
    ) -> Result<Self> {
        let behaviour = Self::build_behaviour(&local_key, &network_config)?;

        let config = Config::with_tokio_executor()
            .with_notify_handler_buffer_size(
                NonZeroUsize::new(7).ok_or_else(|| anyhow!("buffer size must be non-zero"))?,
            )
            .with_per_connection_event_buffer_size(4)
            .with_dial_concurrency_factor(
                NonZeroU8::new(1).ok_or_else(|| anyhow!("dial concurrency must be non-zero"))?,
            );

        let multiaddr = Self::multiaddr(&network_config);
        let swarm = SwarmBuilder::with_existing_identity(local_key)
            .with_tokio()
            .with_quic()
            .with_behaviour(|_| behaviour)?
            .with_swarm_config(|_| config)
            .build();

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let mut service = Self {
            network_config,
            swarm,
            peer_table: Arc::new(Mutex::new(HashMap::new())),
            peer_count: Arc::new(AtomicU64::new(0)),
            resolver,
            router,
            fork_aware,
            commands,
            outcome_tx,
            outcome_rx,
        };

        service.listen(&multiaddr)?;

        Ok(service)
    }

    pub async fn start(&mut self) -> Result<()> {
        // Periodic reconnect attempts to bootnodes
        let mut reconnect_interval = interval(Duration::from_secs(30));
        reconnect_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The epoch boundary is checked once a second; a coarser tick
        // could drift past a fork transition.
        let mut epoch_interval = interval(Duration::from_secs(1));
        epoch_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_epoch: Option<Epoch> = None;

        loop {
            select! {
                _ = reconnect_interval.tick() => {
                    self.connect_to_peers(self.network_config.bootnodes.clone());
                }
                _ = epoch_interval.tick() => {
                    let epoch = self.resolver.current_epoch();
                    if last_epoch != Some(epoch) {
                        last_epoch = Some(epoch);
                        for channel in &self.fork_aware {
                            channel.on_epoch(epoch);
                        }
                    }
                }
                command = self.commands.recv() => {
                    if let Some(command) = command {
                        self.apply_command(command);
                    }
                }
                outcome = self.outcome_rx.recv() => {
                    if let Some(outcome) = outcome {
                        self.report_outcome(outcome);
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.parse_swarm_event(event);
                }
            }
        }
    }

    fn apply_command(&mut self, command: NetworkCommand) {
        match command {
            NetworkCommand::Subscribe(topic) => {
                match self.swarm.behaviour_mut().gossipsub.subscribe(&IdentTopic::new(&topic)) {
                    Ok(_) => info!(topic = %topic, "Subscribed to topic"),
                    Err(err) => warn!(topic = %topic, ?err, "Subscribe failed"),
                }
            }
            NetworkCommand::Unsubscribe(topic) => {
                let _ = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .unsubscribe(&IdentTopic::new(&topic));
                info!(topic = %topic, "Unsubscribed from topic");
            }
            NetworkCommand::Publish { topic, data } => {
                match self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(IdentTopic::new(&topic), data)
                {
                    Ok(_) => debug!(topic = %topic, "Published gossip message"),
                    Err(err) => {
                        // Duplicate errors are expected - we receive our own
                        // messages back from peers.
                        let err_str = format!("{err:?}");
                        if !err_str.contains("Duplicate") {
                            warn!(topic = %topic, ?err, "Publish failed");
                        }
                    }
                }
            }
        }
    }

    fn report_outcome(&mut self, outcome: ValidationOutcome) {
        let acceptance = acceptance_for(&outcome.verdict);
        let _ = self
            .swarm
            .behaviour_mut()
            .gossipsub
            .report_message_validation_result(
                &outcome.message_id,
                &outcome.propagation_source,
                acceptance,
            );
    }

    fn parse_swarm_event(&mut self, event: SwarmEvent<BeaconNetworkBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(BeaconNetworkBehaviourEvent::Gossipsub(event)) => {
                self.handle_gossipsub_event(event);
            }
            SwarmEvent::Behaviour(BeaconNetworkBehaviourEvent::Identify(event)) => {
                self.handle_identify_event(event);
            }
            SwarmEvent::Behaviour(_) => {
                // ConnectionLimits behaviour has no events
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                self.peer_table
                    .lock()
                    .insert(peer_id, ConnectionState::Connected);

                let connected = self.connected_peer_count();
                self.peer_count.store(connected, Ordering::Relaxed);

                info!(peer = %peer_id, "Connected to peer (total: {})", connected);
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                self.peer_table
                    .lock()
                    .insert(peer_id, ConnectionState::Disconnected);

                let connected = self.connected_peer_count();
                self.peer_count.store(connected, Ordering::Relaxed);

                info!(peer = %peer_id, "Disconnected from peer (total: {})", connected);
            }
            SwarmEvent::IncomingConnection { local_addr, .. } => {
                info!(?local_addr, "Incoming connection");
            }
            SwarmEvent::Dialing { peer_id, .. } => {
                info!(?peer_id, "Dialing peer");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!(?peer_id, ?error, "Failed to connect to peer");
            }
            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } => {
                info!(?listener_id, ?address, "New listen address");
            }
            SwarmEvent::NewExternalAddrCandidate { address } => {
                info!(?address, "New external address candidate");
                self.swarm.add_external_address(address);
            }
            SwarmEvent::ExternalAddrConfirmed { address } => {
                info!(?address, "External address confirmed");
            }
            SwarmEvent::ExternalAddrExpired { address } => {
                info!(?address, "External address expired");
            }
            _ => {
                trace!(?event, "Unhandled swarm event");
            }
        }
    }

    fn handle_gossipsub_event(&mut self, event: Event) {
        match event {
            Event::Subscribed { peer_id, topic } => {
                info!(peer = %peer_id, topic = %topic, "A peer subscribed to topic");
            }
            Event::Unsubscribed { peer_id, topic } => {
                info!(peer = %peer_id, topic = %topic, "A peer unsubscribed from topic");
            }
            Event::Message {
                propagation_source,
                message_id,
                message,
            } => {
                // The compressor transform already decompressed the
                // payload; hand it to a worker and report the verdict
                // back once validation finishes.
                let gossip_message = GossipMessage::new(
                    message.topic.as_str().to_owned(),
                    message.data,
                    message.source,
                );

                let outcome_tx = self.outcome_tx.clone();
                self.router.enqueue(
                    gossip_message,
                    Box::new(move |verdict| {
                        let _ = outcome_tx.send(ValidationOutcome {
                            message_id,
                            propagation_source,
                            verdict,
                        });
                    }),
                );
            }
            _ => {
                debug!(?event, "Unhandled gossipsub event");
            }
        }
    }

    fn handle_identify_event(&mut self, event: identify::Event) {
        match event {
            identify::Event::Received { peer_id, info, .. } => {
                info!(
                    peer = %peer_id,
                    agent_version = %info.agent_version,
                    protocol_version = %info.protocol_version,
                    listen_addrs = info.listen_addrs.len(),
                    protocols = info.protocols.len(),
                    "Received peer info"
                );
            }
            identify::Event::Sent { peer_id, .. } => {
                info!(peer = %peer_id, "Sent identify info");
            }
            identify::Event::Pushed { peer_id, .. } => {
                info!(peer = %peer_id, "Pushed identify update");
            }
            identify::Event::Error { peer_id, error, .. } => {
                warn!(peer = %peer_id, ?error, "Identify error");
            }
        }
    }

    fn connect_to_peers(&mut self, peers: Vec<Multiaddr>) {
        for peer in peers {
            if let Some(Protocol::P2p(peer_id)) = peer
                .iter()
                .find(|protocol| matches!(protocol, Protocol::P2p(_)))
                && peer_id != self.local_peer_id()
            {
                let current_state = self.peer_table.lock().get(&peer_id).copied();
                if !matches!(
                    current_state,
                    Some(ConnectionState::Disconnected) | None
                ) {
                    trace!(?peer_id, "Already connected or connecting");
                    continue;
                }

                if let Err(err) = self.swarm.dial(peer.clone()) {
                    warn!(?err, "Failed to dial peer");
                    continue;
                }

                info!(peer = %peer_id, "Dialing peer");
                self.peer_table
                    .lock()
                    .insert(peer_id, ConnectionState::Connecting);
            }
        }
    }

    fn connected_peer_count(&self) -> u64 {
        self.peer_table
            .lock()
            .values()
            .filter(|state| **state == ConnectionState::Connected)
            .count() as u64
    }

    pub fn peer_table(&self) -> Arc<Mutex<HashMap<PeerId, ConnectionState>>> {
        self.peer_table.clone()
    }

    pub fn peer_count(&self) -> Arc<AtomicU64> {
        self.peer_count.clone()
    }

    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    fn build_behaviour(
        local_key: &Keypair,
        cfg: &NetworkServiceConfig,
    ) -> Result<BeaconNetworkBehaviour> {
        let identify = Self::build_identify(local_key);
        let gossipsub = GossipsubBehaviour::new_with_transform(
            MessageAuthenticity::Anonymous,
            cfg.gossipsub_config.config.clone(),
            Compressor::default(),
        )
        .map_err(|err| anyhow!("Failed to create gossipsub behaviour: {err:?}"))?;

        let connection_limits = connection_limits::Behaviour::new(
            ConnectionLimits::default()
                .with_max_pending_incoming(Some(5))
                .with_max_pending_outgoing(Some(16))
                .with_max_established_per_peer(Some(2)),
        );

        Ok(BeaconNetworkBehaviour {
            identify,
            gossipsub,
            connection_limits,
        })
    }

    fn build_identify(local_key: &Keypair) -> identify::Behaviour {
        let local_public_key = local_key.public();
        let identify_config = identify::Config::new("eth2/1.0.0".into(), local_public_key)
            .with_agent_version("beacon_client/0.1.0".to_string())
            .with_cache_size(0);

        identify::Behaviour::new(identify_config)
    }

    fn multiaddr(cfg: &NetworkServiceConfig) -> Multiaddr {
        let mut addr: Multiaddr = cfg.socket_address.into();
        addr.push(Protocol::Udp(cfg.socket_port));
        addr.push(Protocol::QuicV1);
        addr
    }

    fn listen(&mut self, addr: &Multiaddr) -> Result<()> {
        self.swarm
            .listen_on(addr.clone())
            .map_err(|e| anyhow!("Failed to listen on {addr:?}: {e:?}"))?;
        info!(?addr, "Listening on");
        Ok(())
    }
}
