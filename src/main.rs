use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tokio::{sync::mpsc, task};
use tracing::info;

use networking::channel::{ChannelContext, Channels, Validators};
use networking::diagnostics::DiagnosticSink;
use networking::fork::{Fork, ForkDigestResolver, ForkSchedule, ForkTransitionWindow, SystemClock};
use networking::gossipsub::config::GossipsubConfig;
use networking::network::{NetworkHandle, NetworkService, NetworkServiceConfig};
use networking::registry::TopicRegistry;
use networking::router::{DEFAULT_QUEUE_DEPTH, GossipRouter};

mod peer;

#[derive(Parser, Debug)]
#[command(name = "beacon_client", about = "Gossip-layer beacon node")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the node's network identity.
    Peer(peer::PeerCommand),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(short, long, default_value = "127.0.0.1")]
    address: IpAddr,

    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    #[arg(short, long)]
    bootnodes: Vec<String>,

    /// YAML file listing scheduled forks (epoch and version pairs).
    #[arg(long)]
    fork_schedule: Option<PathBuf>,

    /// Hex-encoded genesis validators root.
    #[arg(
        long,
        default_value = "0x0000000000000000000000000000000000000000000000000000000000000000"
    )]
    genesis_validators_root: String,

    #[arg(long, default_value_t = 0)]
    genesis_time: u64,

    #[arg(long, default_value_t = 12)]
    seconds_per_slot: u64,

    #[arg(long, default_value_t = 32)]
    slots_per_epoch: u64,

    /// Directory for failed-message artifacts; disabled when unset.
    #[arg(long)]
    debug_data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 4)]
    gossip_workers: usize,

    /// Identity file from `peer generate`; a fresh ephemeral identity
    /// is used when unset.
    #[arg(long)]
    network_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Peer(command)) => peer::run(command),
        None => run(cli.run).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let schedule = load_fork_schedule(&args)?;
    let genesis_validators_root = parse_root(&args.genesis_validators_root)?;

    let clock = Arc::new(SystemClock {
        genesis_time: args.genesis_time,
        seconds_per_slot: args.seconds_per_slot,
    });
    let resolver = Arc::new(ForkDigestResolver::new(
        schedule,
        genesis_validators_root,
        args.slots_per_epoch,
        clock,
    ));

    let registry = Arc::new(TopicRegistry::new());
    let diagnostics = match &args.debug_data_dir {
        Some(dir) => DiagnosticSink::new(dir.clone(), 1000),
        None => Arc::new(DiagnosticSink::disabled()),
    };

    let (network_handle, command_rx) = NetworkHandle::new_pair();
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();

    let ctx = ChannelContext {
        resolver: resolver.clone(),
        registry: registry.clone(),
        network: Arc::new(network_handle),
        diagnostics,
        window: ForkTransitionWindow::default(),
        seen_capacity: 4096,
    };
    let channels = Channels::new(&ctx, Validators::accept_all(), accepted_tx);
    channels.start()?;

    let router = Arc::new(GossipRouter::new(
        registry,
        args.gossip_workers,
        DEFAULT_QUEUE_DEPTH,
    ));

    let gossipsub_config = GossipsubConfig::new(args.seconds_per_slot, args.slots_per_epoch);
    let network_service_config = Arc::new(NetworkServiceConfig::new(
        gossipsub_config,
        args.address,
        args.port,
        args.seconds_per_slot,
        args.slots_per_epoch,
        args.bootnodes,
    ));

    let mut network_service = match &args.network_key {
        Some(path) => NetworkService::new_with_keypair(
            network_service_config,
            resolver,
            router,
            channels.fork_aware(),
            command_rx,
            peer::load_keypair(path)?,
        )?,
        None => NetworkService::new(
            network_service_config,
            resolver,
            router,
            channels.fork_aware(),
            command_rx,
        )?,
    };

    info!(peer_id = %network_service.local_peer_id(), "Node identity ready");

    // Until chain processing is wired in, accepted messages are logged
    // and dropped here.
    task::spawn(async move {
        while let Some(accepted) = accepted_rx.recv().await {
            info!(message = %accepted.message, "Accepted gossip message");
        }
    });

    network_service.start().await
}

fn load_fork_schedule(args: &RunArgs) -> Result<ForkSchedule> {
    match &args.fork_schedule {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open fork schedule {}", path.display()))?;
            let forks: Vec<Fork> =
                serde_yaml::from_reader(file).context("fork schedule is not valid YAML")?;
            Ok(ForkSchedule::new(forks)?)
        }
        None => Ok(ForkSchedule::only_genesis([0; 4])),
    }
}

fn parse_root(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .context("genesis validators root is not valid hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("genesis validators root must be 32 bytes"))
}
