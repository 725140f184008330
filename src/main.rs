use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use hierarchical_lb::domain::client::{Client, ClientConfig};
use hierarchical_lb::domain::controller::{ControllerConfig, NodeController, NodeLauncher, discover_public_ip};
use hierarchical_lb::domain::log_sink::LogSink;
use hierarchical_lb::domain::model::NodeInfo;
use hierarchical_lb::domain::node::Node;
use hierarchical_lb::domain::utils::statistics::StatsCollector;
use hierarchical_lb::loader::config::{DEFAULT_CONTROLLER_PORT, DEFAULT_LOG_SINK_PORT, NodeConfig};
use hierarchical_lb::logger::{self, LoggerConfig};

/// Hierarchical self-organizing load balancer.
#[derive(Debug, Parser)]
#[command(name = "hierarchical_lb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a worker node. Normally started by a controller, configured through the environment.
    Node,

    /// Run a node controller that spawns and kills nodes on this machine.
    Controller {
        #[arg(long, default_value_t = DEFAULT_CONTROLLER_PORT)]
        port: u16,
        /// Address advertised for the spawned nodes.
        #[arg(long, default_value = "localhost")]
        address: String,
        /// Discover and advertise this machine's public IP instead of `--address`.
        #[arg(long)]
        public_ip: bool,
        /// Forward the nodes' logs to a log sink on this port.
        #[arg(long)]
        log_sink_port: Option<u16>,
        /// JSON file with balancer tuning, handed to every node.
        #[arg(long, value_name = "FILE")]
        balancer_config: Option<PathBuf>,
        #[arg(long, default_value_t = 30)]
        spawn_timeout_secs: u64,
    },

    /// Spin up a cluster, build its hierarchy and feed it work.
    Client {
        /// Controller endpoint as `host:port`; may be repeated.
        #[arg(long = "controller", value_parser = parse_endpoint, default_value = "localhost:35991")]
        controllers: Vec<NodeInfo>,
        #[arg(long, default_value_t = 4)]
        nodes_per_controller: usize,
        #[arg(long, default_value_t = 2)]
        branching_factor: usize,
    },

    /// Print the logs forwarded by the nodes.
    LogSink {
        #[arg(long, default_value_t = DEFAULT_LOG_SINK_PORT)]
        port: u16,
    },
}

fn parse_endpoint(value: &str) -> std::result::Result<NodeInfo, String> {
    let (host, port) = value.rsplit_once(':').ok_or_else(|| format!("expected host:port, got {:?}", value))?;
    let port = port.parse::<u16>().map_err(|e| format!("invalid port in {:?}: {}", value, e))?;
    Ok(NodeInfo::new(NodeInfo::UNKNOWN_ID, host, port))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Node => run_node().await,
        Command::Controller { port, address, public_ip, log_sink_port, balancer_config, spawn_timeout_secs } => {
            logger::init(LoggerConfig::local("controller"));

            let address = if public_ip {
                log::info!("Fetching IP address...");
                discover_public_ip().await.context("Public IP discovery failed")?
            } else {
                address
            };

            let mut config = ControllerConfig::new(address, NodeLauncher::current_exe().context("Cannot locate the node executable")?);
            config.port = Some(port);
            config.log_sink_port = log_sink_port;
            config.balancer_config = balancer_config;
            config.spawn_timeout = Duration::from_secs(spawn_timeout_secs);

            let shutdown = CancellationToken::new();
            let controller = NodeController::start(config, shutdown.clone()).await.with_context(|| format!("Cannot listen on port {}", port))?;

            tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
            controller.kill_nodes();
            shutdown.cancel();
            Ok(())
        }
        Command::Client { controllers, nodes_per_controller, branching_factor } => {
            logger::init(LoggerConfig::local("client"));

            let mut config = ClientConfig::new(controllers);
            config.nodes_per_controller = nodes_per_controller;
            config.branching_factor = branching_factor;

            Client::new(config).run().await.context("Client run aborted")
        }
        Command::LogSink { port } => {
            logger::init(LoggerConfig::local("log-sink"));

            let shutdown = CancellationToken::new();
            LogSink::start(Some(port), shutdown.clone()).await.with_context(|| format!("Cannot listen on port {}", port))?;

            tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
            shutdown.cancel();
            Ok(())
        }
    }
}

async fn run_node() -> Result<()> {
    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            logger::init(LoggerConfig::local("node"));
            log::error!("Cannot start node: {}", e);
            bail!("Invalid node environment: {}", e);
        }
    };

    logger::init(LoggerConfig::for_node(config.node_id, config.log_sink_port));

    let stats = config.stats_file.clone().map(|path| StatsCollector::init(Some(path)));
    let node = Node::start(config, stats.clone()).await.context("Failed to start the node")?;

    let signals = node.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signals.stop();
        }
    });

    node.run().await;

    if let Some(stats) = stats {
        stats.shutdown();
    }
    Ok(())
}
