mod handler;
mod rebalance;
mod worker;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

use crate::api::message::Message;
use crate::domain::hierarchy::{Hierarchy, Topology};
use crate::domain::load::LoadTracker;
use crate::domain::model::{Job, JobInfo, NodeInfo};
use crate::domain::sync::lock;
use crate::domain::utils::clock::{SharedClock, SystemClock};
use crate::domain::utils::id::JobId;
use crate::domain::utils::statistics::{StatParameter, StatisticEvent, StatsCollector};
use crate::error::Result;
use crate::loader::config::NodeConfig;
use crate::net::{MessageServer, Transport};

pub use rebalance::{CollectionSession, JobCollection};

/// Lifecycle of a node process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodePhase {
    Initializing,
    AwaitingHierarchy,
    Running,
    Stopped,
}

/// State guarded by the node's main lock. Never held across an `.await`.
#[derive(Debug, Default)]
struct NodeState {
    queue: VecDeque<Job>,
    topology: Option<Topology>,
}

/// One worker of the cluster.
///
/// Owns a job queue, serves the protocol on its own port and, once a hierarchy is installed, keeps
/// its share of the tree balanced together with its parent and children.
pub struct Node {
    config: NodeConfig,
    me: NodeInfo,
    transport: Transport,
    state: Mutex<NodeState>,
    phase: watch::Sender<NodePhase>,
    /// Set while a rebalance involving this node is in flight; the worker pulls no jobs.
    balancing: AtomicBool,
    resumed: Notify,
    work_available: Notify,
    /// Job exchanges of the current rebalance still outstanding. May dip below zero when a
    /// request arrives before this node planned its own share.
    pending_operations: AtomicI64,
    session: Mutex<Option<Arc<CollectionSession>>>,
    load_tracker: LoadTracker,
    stats: Option<StatsCollector>,
    shutdown: CancellationToken,
}

impl Node {
    /// Binds the listener, starts serving and announces the node to its controller.
    pub async fn start(config: NodeConfig, stats: Option<StatsCollector>) -> Result<Arc<Node>> {
        Self::start_with_clock(config, stats, SystemClock::shared()).await
    }

    pub async fn start_with_clock(config: NodeConfig, stats: Option<StatsCollector>, clock: SharedClock) -> Result<Arc<Node>> {
        let server = MessageServer::bind(None).await?;
        let me = NodeInfo::new(config.node_id, config.address.clone(), server.local_port());
        let (phase, _) = watch::channel(NodePhase::Initializing);

        let node = Arc::new(Node {
            transport: Transport::from_config(&config.balancer),
            config,
            me,
            state: Mutex::new(NodeState::default()),
            phase,
            balancing: AtomicBool::new(false),
            resumed: Notify::new(),
            work_available: Notify::new(),
            pending_operations: AtomicI64::new(0),
            session: Mutex::new(None),
            load_tracker: LoadTracker::new(clock),
            stats,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(server.serve(node.clone(), node.shutdown.clone()));
        node.phase.send_replace(NodePhase::AwaitingHierarchy);
        log::info!("{} is up, waiting for a hierarchy", node.me);

        if let Some(controller_port) = node.config.controller_port {
            let online = Message::NodeOnline { node_id: node.me.id, port: node.me.port };
            if !node.transport.deliver(online, "localhost", controller_port).await {
                log::warn!("{} could not reach its controller on port {}", node.me, controller_port);
            }
        }

        Ok(node)
    }

    pub fn me(&self) -> &NodeInfo {
        &self.me
    }

    pub fn phase(&self) -> NodePhase {
        *self.phase.borrow()
    }

    /// Waits until a hierarchy is installed. False if the node stopped first.
    pub async fn wait_for_hierarchy(&self) -> bool {
        let mut phase = self.phase.subscribe();
        match phase.wait_for(|p| *p >= NodePhase::Running).await {
            Ok(p) => *p == NodePhase::Running,
            Err(_) => false,
        }
    }

    /// Stops the worker loop and the server.
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.resumed.notify_waiters();
        self.work_available.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    //---------------------
    // --- Queue ---
    //---------------------
    pub fn enqueue(&self, job: Job) {
        lock(&self.state).queue.push_back(job);
        self.work_available.notify_one();
    }

    fn enqueue_all(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        lock(&self.state).queue.extend(jobs);
        self.work_available.notify_one();
    }

    pub fn queued_jobs(&self) -> Vec<Job> {
        lock(&self.state).queue.iter().cloned().collect()
    }

    /// Removes the queued jobs with the given ids, in queue order.
    fn take_jobs(&self, ids: &[JobId]) -> Vec<Job> {
        let mut state = lock(&self.state);
        let (taken, kept): (VecDeque<Job>, VecDeque<Job>) = state.queue.drain(..).partition(|job| ids.contains(&job.id));
        state.queue = kept;
        taken.into_iter().collect()
    }

    fn snapshot(&self) -> Vec<JobInfo> {
        lock(&self.state).queue.iter().map(|job| job.info(&self.me)).collect()
    }

    //---------------------
    // --- Hierarchy ---
    //---------------------
    /// Installs `hierarchy` and hands every owned node its own subtree.
    fn install_hierarchy(&self, hierarchy: Hierarchy) {
        if hierarchy.owner() != &self.me {
            log::warn!("{} received a hierarchy owned by {}", self.me, hierarchy.owner());
        }

        for level in hierarchy.owned_level_positions() {
            for position in level {
                let Some(subtree) = hierarchy.subtree(position) else {
                    continue;
                };
                let node = subtree.owner().clone();
                if node != self.me {
                    log::debug!("{} is sending the hierarchy to {}", self.me, node);
                    self.transport.send_async(Message::Hierarchy { hierarchy: subtree.to_dto() }, &node.address, node.port, None);
                }
            }
        }

        let topology = Topology::new(hierarchy);
        log::info!("{} installed its hierarchy: {} owned levels, parent {:?}", self.me, topology.levels().len(), topology.parent().map(|p| p.to_string()));
        lock(&self.state).topology = Some(topology);
        self.phase.send_replace(NodePhase::Running);
    }

    /// Owned levels of the installed hierarchy, empty for leaves and before installation.
    pub fn levels(&self) -> Vec<Vec<NodeInfo>> {
        lock(&self.state).topology.as_ref().map(|t| t.levels().to_vec()).unwrap_or_default()
    }

    pub fn parent(&self) -> Option<NodeInfo> {
        lock(&self.state).topology.as_ref().and_then(|t| t.parent().cloned())
    }

    //---------------------
    // --- Suspension ---
    //---------------------
    pub fn is_balancing(&self) -> bool {
        self.balancing.load(Ordering::SeqCst)
    }

    /// Enters the suspended state. Set under the queue lock so no dequeue interleaves with a snapshot.
    fn suspend(&self) {
        let _state = lock(&self.state);
        self.balancing.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        {
            let _state = lock(&self.state);
            self.balancing.store(false, Ordering::SeqCst);
        }
        self.resumed.notify_waiters();
        self.work_available.notify_one();

        let queued = self.queued_jobs().len();
        log::info!("{} resumed work with {} queued jobs", self.me, queued);
        self.record("Resumed", |e| {
            e.set(StatParameter::NumberOfJobs, queued);
        });
        if let Some(stats) = &self.stats {
            stats.flush();
        }
    }

    /// Waits until no rebalance involving this node is in flight, or the node stops.
    pub async fn wait_until_resumed(&self) {
        loop {
            let notified = self.resumed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_balancing() || self.shutdown.is_cancelled() {
                return;
            }

            tokio::select! {
                _ = notified => {}
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    /// Registers `count` outstanding job exchanges; resumes if they were already settled.
    fn begin_operations(&self, count: usize) {
        let count = count as i64;
        let previous = self.pending_operations.fetch_add(count, Ordering::SeqCst);
        if previous + count == 0 {
            self.resume();
        }
    }

    /// Settles `count` job exchanges; resumes once none are left.
    fn finish_operations(&self, count: usize) {
        let count = count as i64;
        let previous = self.pending_operations.fetch_sub(count, Ordering::SeqCst);
        if previous - count == 0 {
            self.resume();
        }
    }

    fn record(&self, event_name: &str, fill: impl FnOnce(&mut StatisticEvent)) {
        if let Some(stats) = &self.stats {
            let mut event = StatisticEvent::new();
            event.set(StatParameter::NodeName, self.me.to_string()).set(StatParameter::Event, event_name);
            fill(&mut event);
            stats.add_event(event);
        }
    }
}
