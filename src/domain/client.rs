use colored::Colorize;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::api::hierarchy_dto::TreeNodeDto;
use crate::api::message::Message;
use crate::domain::model::{Job, JobKind, NodeInfo};
use crate::domain::sync::collector::ListCollector;
use crate::error::{Error, Result};
use crate::net::Transport;
use crate::net::transport::ReplyCallback;

/// Nodes the workload is skewed towards, by position in the sorted node list.
const SKEWED_TARGETS: [usize; 2] = [0, 2];

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub controllers: Vec<NodeInfo>,
    pub nodes_per_controller: usize,
    pub branching_factor: usize,
    /// Pause between building the hierarchy and starting the workload.
    pub warmup: Duration,
    pub spin_up_timeout: Duration,
}

impl ClientConfig {
    pub fn new(controllers: Vec<NodeInfo>) -> Self {
        ClientConfig { controllers, nodes_per_controller: 4, branching_factor: 2, warmup: Duration::from_secs(2), spin_up_timeout: Duration::from_secs(60) }
    }
}

/// Drives one run: spin up the cluster, build its hierarchy, feed it work until told to quit.
pub struct Client {
    config: ClientConfig,
    transport: Transport,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let transport = Transport::new(Duration::from_secs(5), config.spin_up_timeout);
        Client { config, transport }
    }

    pub async fn run(&self) -> Result<()> {
        let nodes = self.spin_up_nodes().await?;
        if nodes.is_empty() {
            self.teardown().await;
            return Err(Error::MissingResponse { expected: "NodesSpawned", context: "spinning up nodes: no node came online".to_string() });
        }
        log::info!("Nodes: {:?}", nodes.iter().map(|n| n.to_string()).collect::<Vec<_>>());

        match self.build_hierarchy(&nodes).await {
            Ok(hierarchy) => println!("{}", render_hierarchy(&hierarchy)),
            Err(e) => {
                self.teardown().await;
                return Err(e);
            }
        }

        tokio::time::sleep(self.config.warmup).await;

        let workload = Arc::new(WorkloadController::new(nodes, self.transport));
        let generator = tokio::spawn(workload.clone().run());
        read_commands(&workload).await;
        workload.stop();
        if let Err(e) = generator.await {
            log::error!("Workload generator failed: {}", e);
        }

        self.teardown().await;
        Ok(())
    }

    /// Asks every controller for nodes and returns all of them, sorted by address and port.
    pub async fn spin_up_nodes(&self) -> Result<Vec<NodeInfo>> {
        log::info!("Controller count: {}", self.config.controllers.len());
        let collector = Arc::new(ListCollector::<Vec<NodeInfo>>::new(self.config.controllers.len()));

        for controller in &self.config.controllers {
            log::info!("Sending spin up command to controller {}", controller);
            let replies = collector.clone();
            let origin = controller.clone();
            let callback: ReplyCallback = Box::new(move |reply: Message| match reply {
                Message::NodesSpawned { nodes } => {
                    log::debug!("{} spawned {} nodes", origin, nodes.len());
                    replies.add(nodes);
                }
                other => {
                    log::warn!("{} answered the spin up with {:?}", origin, other);
                    replies.add(Vec::new());
                }
            });
            let request = Message::SpinUpNodes { node_count: self.config.nodes_per_controller };
            self.transport.send_async(request, &controller.address, controller.port, Some(callback));
        }

        let spawned = match collector.wait_timeout(self.config.spin_up_timeout).await {
            Some(spawned) => spawned,
            None => {
                log::warn!("Not every controller answered within {:?}", self.config.spin_up_timeout);
                collector.snapshot()
            }
        };

        let mut nodes: Vec<NodeInfo> = spawned.into_iter().flatten().collect();
        nodes.sort_by(|a, b| (&a.address, a.port).cmp(&(&b.address, b.port)));
        Ok(nodes)
    }

    /// Has the first node arrange `nodes` into a tree and returns that tree.
    pub async fn build_hierarchy(&self, nodes: &[NodeInfo]) -> Result<TreeNodeDto> {
        let Some(coordinator) = nodes.first() else {
            return Err(Error::EmptyHierarchy);
        };
        log::info!("Asking {} to build the hierarchy", coordinator);

        let request = Message::BuildHierarchy { branching_factor: self.config.branching_factor, nodes: nodes.to_vec() };
        match self.transport.send(request, &coordinator.address, coordinator.port).await {
            Some(Message::Hierarchy { hierarchy }) => Ok(hierarchy),
            other => Err(Error::MissingResponse { expected: "Hierarchy", context: format!("building the hierarchy on {} (got {:?})", coordinator, other) }),
        }
    }

    pub async fn teardown(&self) {
        log::info!("Tearing down nodes");
        for controller in &self.config.controllers {
            if let Some(reply) = self.transport.send(Message::KillNodes, &controller.address, controller.port).await {
                log::warn!("{} answered the kill request with {:?}", controller, reply);
            }
        }
    }
}

/// Indented, coloured rendering of a hierarchy.
pub fn render_hierarchy(root: &TreeNodeDto) -> String {
    let mut out = String::new();
    render_node(root, 0, &mut out);
    out
}

fn render_node(node: &TreeNodeDto, depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);
    let label = node.node.to_string();
    let label = if depth == 0 { label.as_str().green().bold() } else if node.children.is_empty() { label.as_str().normal() } else { label.as_str().cyan() };
    let parent = node.parent.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "none".to_string());
    let parent = format!("(parent: {})", parent);

    out.push_str(&format!("{}{} {}\n", indent, label, parent.as_str().dimmed()));
    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}

//---------------------
// --- Workload ---
//---------------------

/// A live tuning command read from stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadCommand {
    Quit,
    Periodicity(u64),
    Size(u32),
    Variability(u32),
}

impl WorkloadCommand {
    /// Parses `Q`, `P <ms>`, `S <size>` or `V <variability>`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next()?;
        let argument = tokens.next();

        match command {
            "Q" => Some(WorkloadCommand::Quit),
            "P" => argument?.parse().ok().map(WorkloadCommand::Periodicity),
            "S" => argument?.parse().ok().map(WorkloadCommand::Size),
            "V" => argument?.parse().ok().map(WorkloadCommand::Variability),
            _ => None,
        }
    }
}

/// Sends `SquareSum` jobs to a skewed subset of the nodes at a tunable pace.
pub struct WorkloadController {
    nodes: Vec<NodeInfo>,
    transport: Transport,
    /// Milliseconds between two jobs.
    periodicity: AtomicU64,
    /// Base input of a job; a `SquareSum` runs about one millisecond per unit.
    job_size: AtomicU32,
    /// Upper bound of the random amount added to `job_size`.
    variability: AtomicU32,
    running: CancellationToken,
}

impl WorkloadController {
    pub fn new(nodes: Vec<NodeInfo>, transport: Transport) -> Self {
        WorkloadController { nodes, transport, periodicity: AtomicU64::new(100), job_size: AtomicU32::new(300), variability: AtomicU32::new(100), running: CancellationToken::new() }
    }

    /// Applies a tuning command. False for `Quit`.
    pub fn apply(&self, command: WorkloadCommand) -> bool {
        match command {
            WorkloadCommand::Quit => return false,
            WorkloadCommand::Periodicity(ms) => self.periodicity.store(ms, Ordering::SeqCst),
            WorkloadCommand::Size(size) => self.job_size.store(size, Ordering::SeqCst),
            WorkloadCommand::Variability(v) => self.variability.store(v, Ordering::SeqCst),
        }
        log::info!("Workload now: one job every {} ms, size {} + up to {}", self.periodicity.load(Ordering::SeqCst), self.job_size.load(Ordering::SeqCst), self.variability.load(Ordering::SeqCst));
        true
    }

    /// The nodes jobs are sent to.
    pub fn targets(&self) -> Vec<&NodeInfo> {
        let skewed: Vec<&NodeInfo> = SKEWED_TARGETS.iter().filter_map(|&i| self.nodes.get(i)).collect();
        if skewed.len() == SKEWED_TARGETS.len() { skewed } else { self.nodes.iter().collect() }
    }

    pub fn next_job(&self) -> Job {
        let size = self.job_size.load(Ordering::SeqCst);
        let variability = self.variability.load(Ordering::SeqCst);
        let input = size + rand::rng().random_range(0..=variability);
        Job::new(JobKind::SquareSum, input)
    }

    pub async fn run(self: Arc<Self>) {
        let targets: Vec<NodeInfo> = self.targets().into_iter().cloned().collect();
        if targets.is_empty() {
            return;
        }
        log::info!("Workload started on {} nodes", targets.len());

        while !self.running.is_cancelled() {
            let node = &targets[rand::rng().random_range(0..targets.len())];
            let job = self.next_job();
            log::trace!("Sending {} to {}", job, node);
            self.transport.send_async(Message::DoWork { job }, &node.address, node.port, None);

            let pause = Duration::from_millis(self.periodicity.load(Ordering::SeqCst));
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.running.cancelled() => {}
            }
        }
        log::info!("Workload stopped");
    }

    pub fn stop(&self) {
        self.running.cancel();
    }
}

async fn read_commands(workload: &WorkloadController) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match WorkloadCommand::parse(&line) {
                Some(command) => {
                    if !workload.apply(command) {
                        return;
                    }
                }
                None => println!("Unrecognized command"),
            },
            Ok(None) => return,
            Err(e) => {
                log::error!("Failed to read from stdin: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: u16) -> Vec<NodeInfo> {
        (0..n).map(|i| NodeInfo::new(i as i32, "localhost", 9000 + i)).collect()
    }

    #[test]
    fn commands_parse() {
        assert_eq!(WorkloadCommand::parse("Q"), Some(WorkloadCommand::Quit));
        assert_eq!(WorkloadCommand::parse("P 250"), Some(WorkloadCommand::Periodicity(250)));
        assert_eq!(WorkloadCommand::parse("S 12"), Some(WorkloadCommand::Size(12)));
        assert_eq!(WorkloadCommand::parse(" V 4 "), Some(WorkloadCommand::Variability(4)));
        assert_eq!(WorkloadCommand::parse("P"), None);
        assert_eq!(WorkloadCommand::parse("S many"), None);
        assert_eq!(WorkloadCommand::parse("X 1"), None);
        assert_eq!(WorkloadCommand::parse(""), None);
    }

    #[test]
    fn workload_is_skewed_when_possible() {
        let workload = WorkloadController::new(nodes(5), Transport::default());
        let ports: Vec<u16> = workload.targets().iter().map(|n| n.port).collect();
        assert_eq!(ports, vec![9000, 9002]);

        let small = WorkloadController::new(nodes(2), Transport::default());
        assert_eq!(small.targets().len(), 2);
    }

    #[test]
    fn default_jobs_outlast_their_arrival_interval() {
        let workload = WorkloadController::new(nodes(3), Transport::default());
        let interval = Duration::from_millis(workload.periodicity.load(Ordering::SeqCst)) * workload.targets().len() as u32;

        for _ in 0..20 {
            let job = workload.next_job();
            assert!((300..=400).contains(&job.input));
            assert!(crate::domain::model::job::SQUARE_SUM_UNIT * job.input > interval);
        }
    }

    #[test]
    fn job_sizes_follow_the_tuning() {
        let workload = WorkloadController::new(nodes(3), Transport::default());
        assert!(workload.apply(WorkloadCommand::Size(20)));
        assert!(workload.apply(WorkloadCommand::Variability(3)));
        assert!(!workload.apply(WorkloadCommand::Quit));

        for _ in 0..50 {
            let job = workload.next_job();
            assert_eq!(job.kind, JobKind::SquareSum);
            assert!((20..=23).contains(&job.input));
        }
    }

    #[test]
    fn hierarchy_rendering_indents_children() {
        let leaf = |i: u16| TreeNodeDto { node: NodeInfo::new(i as i32, "localhost", 9000 + i), parent: Some(NodeInfo::new(0, "localhost", 9000)), children: vec![] };
        let root = TreeNodeDto { node: NodeInfo::new(0, "localhost", 9000), parent: None, children: vec![leaf(1), leaf(2)] };

        let rendered = render_hierarchy(&root);
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("localhost:9000"));
        assert!(lines[1].starts_with("    "));
        assert!(lines[2].contains("localhost:9002"));
    }
}
