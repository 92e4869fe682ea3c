//! Rollcall simulator.
//!
//! Runs a group of registries against an in-memory coordination store:
//! registers `--nodes` servers of one type, lets `--observers` watch them,
//! then stops the elected master and reports the failover.
//!
//! Configuration is layered like a real deployment: defaults, then TOML
//! (`--config`, `ROLLCALL_CONFIG` or `./rollcall.toml`), then `ROLLCALL_*`
//! environment variables, then CLI flags.
//!
//! # Usage
//!
//! ```bash
//! rollcall-sim --nodes 3 --server-type echo-server --zone 1
//! rollcall-sim --mode master_master --observers 2
//! RUST_LOG=rollcall_registry=debug rollcall-sim
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use rollcall_core::StoreConnector;
use rollcall_registry::NodeConfig;
use rollcall_registry::NodeMode;
use rollcall_registry::NodeState;
use rollcall_registry::Registry;
use rollcall_registry::RegistryConfig;
use rollcall_registry::ServerId;
use rollcall_registry::WatchConfig;
use rollcall_registry::Zone;
use rollcall_testing::InMemoryEnsemble;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Upper bound on simulated processes of each kind.
const MAX_SIM_NODES: u32 = 64;

/// Server type used when neither config nor CLI names one.
const DEFAULT_SERVER_TYPE: &str = "echo-server";

/// Server type the observers register under.
const OBSERVER_TYPE: &str = "observer";

#[derive(Parser, Debug)]
#[command(name = "rollcall-sim", about = "Simulate rollcall election and discovery in memory")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of servers competing for the leader marker.
    #[arg(long, default_value_t = 3)]
    nodes: u32,

    /// Server type of the competing servers.
    #[arg(long)]
    server_type: Option<String>,

    /// Zone of the competing servers.
    #[arg(long, allow_hyphen_values = true)]
    zone: Option<Zone>,

    /// Leadership mode: `master_slave` or `master_master`.
    #[arg(long)]
    mode: Option<String>,

    /// Number of processes watching the servers.
    #[arg(long, default_value_t = 1)]
    observers: u32,

    /// How long to wait for each expected notification, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,
}

#[derive(Debug)]
enum Observed {
    Added {
        observer: u32,
        zone: Zone,
        server_id: ServerId,
        info: String,
    },
    Removed {
        observer: u32,
        server_id: ServerId,
    },
}

/// A registry running on its own task.
struct SimNode {
    server_id: ServerId,
    state_rx: watch::Receiver<NodeState>,
    cancel: CancellationToken,
    task: JoinHandle<Registry>,
}

impl SimNode {
    fn spawn(mut registry: Registry) -> Result<Self> {
        let server_id = registry.server_id().cloned().context("registry started without a server id")?;
        let state_rx = registry.subscribe_state();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            registry.run(token).await;
            registry
        });
        Ok(Self {
            server_id,
            state_rx,
            cancel,
            task,
        })
    }

    fn state(&self) -> NodeState {
        *self.state_rx.borrow()
    }

    async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        let mut registry = self.task.await.context("registry task failed")?;
        registry.stop();
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

/// Layer CLI flags over the file and environment configuration.
fn load_config(args: &Args) -> Result<RegistryConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = RegistryConfig::from_toml_file(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => RegistryConfig::load_with_layers()?,
    };

    if let Some(server_type) = &args.server_type {
        config.node.server_type = Some(server_type.clone());
    }
    if config.node.server_type.is_none() {
        config.node.server_type = Some(DEFAULT_SERVER_TYPE.to_string());
    }
    if let Some(zone) = args.zone {
        config.node.zone = zone;
    }
    if let Some(mode) = &args.mode {
        config.node.mode = NodeMode::parse(mode).with_context(|| format!("unknown mode '{mode}'"))?;
    }
    config.validate()?;
    Ok(config)
}

async fn expect_events(rx: &mut mpsc::UnboundedReceiver<Observed>, count: usize, timeout: Duration) -> Result<()> {
    for _ in 0..count {
        let event = tokio::time::timeout(timeout, rx.recv())
            .await
            .context("timed out waiting for discovery events")?
            .context("discovery channel closed")?;
        match event {
            Observed::Added {
                observer,
                zone,
                server_id,
                info,
            } => println!("observer {observer}: + {server_id} (zone {zone}, info '{info}')"),
            Observed::Removed { observer, server_id } => println!("observer {observer}: - {server_id}"),
        }
    }
    Ok(())
}

async fn wait_for_master(nodes: &[SimNode], timeout: Duration) -> Result<ServerId> {
    let mut waiters = JoinSet::new();
    for node in nodes {
        let mut rx = node.state_rx.clone();
        let server_id = node.server_id.clone();
        waiters.spawn(async move { rx.wait_for(NodeState::is_master).await.ok().map(|_| server_id) });
    }

    let winner = tokio::time::timeout(timeout, async {
        while let Some(joined) = waiters.join_next().await {
            if let Ok(Some(server_id)) = joined {
                return Some(server_id);
            }
        }
        None
    })
    .await
    .context("timed out waiting for failover")?;
    winner.context("no server took over the leader marker")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    anyhow::ensure!(
        (1..=MAX_SIM_NODES).contains(&args.nodes),
        "--nodes must be between 1 and {MAX_SIM_NODES}"
    );
    anyhow::ensure!(args.observers <= MAX_SIM_NODES, "--observers must be at most {MAX_SIM_NODES}");

    let config = load_config(&args)?;
    let server_type = config.server_type()?.context("no server type configured")?;
    let timeout = Duration::from_millis(args.timeout_ms);
    info!(
        server_type = %server_type,
        zone = config.node.zone,
        mode = config.node.mode.as_str(),
        nodes = args.nodes,
        observers = args.observers,
        "starting simulation"
    );

    let ensemble = InMemoryEnsemble::new();
    let connector: Arc<dyn StoreConnector> = Arc::new(ensemble);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let mut observers = Vec::new();
    for observer in 0..args.observers {
        let mut observer_config = config.clone();
        observer_config.node = NodeConfig {
            server_type: Some(OBSERVER_TYPE.to_string()),
            zone: config.node.zone,
            mode: NodeMode::MasterMaster,
        };
        observer_config.watch = vec![WatchConfig {
            server_type: server_type.as_str().to_string(),
            zone: None,
        }];

        let mut registry = Registry::from_config(connector.clone(), &observer_config)?;
        let tx = events_tx.clone();
        registry.set_add_server_handler(move |_, zone, server_id, info| {
            let _ = tx.send(Observed::Added {
                observer,
                zone,
                server_id: server_id.clone(),
                info: info.to_string(),
            });
        });
        let tx = events_tx.clone();
        registry.set_del_server_handler(move |server_id| {
            let _ = tx.send(Observed::Removed {
                observer,
                server_id: server_id.clone(),
            });
        });
        registry.start().with_context(|| format!("observer {observer} failed to start"))?;
        observers.push(SimNode::spawn(registry)?);
    }
    drop(events_tx);

    let mut nodes = Vec::new();
    for index in 0..args.nodes {
        let mut registry = Registry::from_config(connector.clone(), &config)?;
        registry.set_server_info_handler(move || format!("sim-node-{index}"));
        registry.start().with_context(|| format!("server {index} failed to start"))?;
        let node = SimNode::spawn(registry)?;
        println!("registered {} as {}", node.server_id, node.state());
        nodes.push(node);
    }

    let per_observer = args.nodes as usize;
    expect_events(&mut events_rx, per_observer * args.observers as usize, timeout).await?;

    let masters: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.state().is_master())
        .map(|(i, _)| i)
        .collect();
    match config.node.mode {
        NodeMode::MasterMaster => {
            println!("master_master: {} of {} servers are master", masters.len(), nodes.len());
        }
        NodeMode::MasterSlave => {
            anyhow::ensure!(masters.len() == 1, "expected exactly one master, found {}", masters.len());
            let old_master = nodes.remove(masters[0]);
            println!("elected {}; stopping it", old_master.server_id);
            old_master.shutdown().await?;

            if !nodes.is_empty() {
                let new_master = wait_for_master(&nodes, timeout).await?;
                println!("failover: {new_master} took over");
            }
            expect_events(&mut events_rx, args.observers as usize, timeout).await?;
        }
    }

    for node in nodes.into_iter().chain(observers) {
        node.shutdown().await?;
    }
    info!("simulation finished");
    Ok(())
}
