use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::api::message::Message;
use crate::domain::model::NodeInfo;
use crate::domain::sync::collector::ListCollector;
use crate::domain::sync::lock;
use crate::error::Result;
use crate::loader::config::DEFAULT_CONTROLLER_PORT;
use crate::net::{MessageHandler, MessageServer, Responder};

const PUBLIC_IP_URL: &str = "https://checkip.amazonaws.com";
const BUSY: &str = "Controller is spawning nodes. Please, wait until it finishes.";

/// How a controller starts one node process.
#[derive(Debug, Clone)]
pub struct NodeLauncher {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl NodeLauncher {
    /// Runs the `node` subcommand of the current executable.
    pub fn current_exe() -> Result<Self> {
        Ok(NodeLauncher { program: std::env::current_exe()?, args: vec![OsString::from("node")] })
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Port to listen on; `None` picks a free one.
    pub port: Option<u16>,
    /// Address reported for every spawned node.
    pub address: String,
    pub launcher: NodeLauncher,
    /// How long a spin-up waits for its nodes to come online.
    pub spawn_timeout: Duration,
    pub log_sink_port: Option<u16>,
    pub balancer_config: Option<PathBuf>,
}

impl ControllerConfig {
    pub fn new(address: impl Into<String>, launcher: NodeLauncher) -> Self {
        ControllerConfig {
            port: Some(DEFAULT_CONTROLLER_PORT),
            address: address.into(),
            launcher,
            spawn_timeout: Duration::from_secs(30),
            log_sink_port: None,
            balancer_config: None,
        }
    }
}

/// Starts and stops node processes on one machine on behalf of the client.
///
/// Spawned nodes announce themselves with `NodeOnline`; the controller answers the spin-up
/// request once all of them did, or once the spawn timeout ran out.
pub struct NodeController {
    config: ControllerConfig,
    port: u16,
    children: Mutex<Vec<Child>>,
    spin_up: Mutex<Option<Arc<ListCollector<NodeInfo>>>>,
    next_node_id: AtomicI32,
}

impl NodeController {
    pub async fn start(config: ControllerConfig, shutdown: CancellationToken) -> Result<Arc<NodeController>> {
        let server = MessageServer::bind(config.port).await?;
        let controller = Arc::new(NodeController {
            port: server.local_port(),
            config,
            children: Mutex::new(Vec::new()),
            spin_up: Mutex::new(None),
            next_node_id: AtomicI32::new(0),
        });

        log::info!("Node controller listening on port {}, advertising {}", controller.port, controller.config.address);
        tokio::spawn(server.serve(controller.clone(), shutdown));
        Ok(controller)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True while a spin-up waits for its nodes.
    pub fn is_spawning(&self) -> bool {
        lock(&self.spin_up).as_ref().is_some_and(|c| c.is_working())
    }

    pub fn child_count(&self) -> usize {
        lock(&self.children).len()
    }

    async fn spin_up_nodes(&self, node_count: usize) -> Message {
        let collector = {
            let mut current = lock(&self.spin_up);
            if current.as_ref().is_some_and(|c| c.is_working()) {
                log::warn!("Refusing to spin up {} nodes, a spin-up is in flight", node_count);
                return Message::ResponseMessage { text: BUSY.to_string() };
            }
            let collector = Arc::new(ListCollector::new(node_count));
            *current = Some(collector.clone());
            collector
        };

        log::info!("Spinning up {} nodes", node_count);
        for _ in 0..node_count {
            if let Err(e) = self.spawn_node() {
                log::error!("Failed to spawn a node process: {}", e);
                break;
            }
        }

        let nodes = match collector.wait_timeout(self.config.spawn_timeout).await {
            Some(nodes) => nodes,
            None => {
                let nodes = collector.snapshot();
                log::warn!("Only {} of {} nodes came online within {:?}", nodes.len(), node_count, self.config.spawn_timeout);
                *lock(&self.spin_up) = None;
                nodes
            }
        };

        log::info!("Spawned nodes: {:?}", nodes.iter().map(|n| n.to_string()).collect::<Vec<_>>());
        Message::NodesSpawned { nodes }
    }

    fn spawn_node(&self) -> Result<()> {
        let node_id = self.next_node_id.fetch_add(1, Ordering::SeqCst);
        let launcher = &self.config.launcher;

        let mut command = Command::new(&launcher.program);
        command
            .args(&launcher.args)
            .env("CONTROLLER_PORT", self.port.to_string())
            .env("NODE_ID", node_id.to_string())
            .env("NODE_ADDRESS", &self.config.address)
            .kill_on_drop(true);
        if let Some(port) = self.config.log_sink_port {
            command.env("LOG_SINK_PORT", port.to_string());
        }
        if let Some(path) = &self.config.balancer_config {
            command.env("BALANCER_CONFIG", path);
        }

        let child = command.spawn()?;
        log::debug!("Started node {} as process {:?}", node_id, child.id());
        lock(&self.children).push(child);
        Ok(())
    }

    fn node_online(&self, node_id: i32, port: u16) {
        let node = NodeInfo::new(node_id, self.config.address.clone(), port);
        let collector = lock(&self.spin_up).clone();
        match collector {
            Some(collector) if collector.add(node.clone()) => log::debug!("{} is online", node),
            _ => log::warn!("{} came online outside of a spin-up", node),
        }
    }

    /// Kills every spawned node process.
    pub fn kill_nodes(&self) {
        let mut children = lock(&self.children);
        log::info!("Killing {} nodes", children.len());
        for child in children.iter_mut() {
            if let Err(e) = child.start_kill() {
                log::warn!("Failed to kill process {:?}: {}", child.id(), e);
            }
        }
        children.clear();
        *lock(&self.spin_up) = None;
    }
}

#[async_trait]
impl MessageHandler for NodeController {
    async fn handle(&self, message: Message, responder: Responder) {
        match message {
            Message::SpinUpNodes { node_count } => {
                let reply = self.spin_up_nodes(node_count).await;
                responder.respond(reply).await;
            }
            Message::KillNodes => {
                if self.is_spawning() {
                    responder.respond(Message::ResponseMessage { text: BUSY.to_string() }).await;
                } else {
                    self.kill_nodes();
                    responder.close();
                }
            }
            Message::NodeOnline { node_id, port } => {
                responder.close();
                self.node_online(node_id, port);
            }
            other => {
                log::warn!("Controller does not handle {} messages", other.kind());
                responder.close();
            }
        }
    }
}

/// Asks an external service for this machine's public address.
pub async fn discover_public_ip() -> Result<String> {
    let address = reqwest::get(PUBLIC_IP_URL).await?.error_for_status()?.text().await?;
    Ok(address.trim().to_string())
}
