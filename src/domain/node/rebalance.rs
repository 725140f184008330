use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::api::message::Message;
use crate::domain::balancer::{LevelInventory, plan_round, transfers_involving};
use crate::domain::load::LoadWindow;
use crate::domain::model::{Job, JobInfo, JobTransfer, NodeInfo};
use crate::domain::node::Node;
use crate::domain::sync::collector::MappingCollector;
use crate::domain::sync::lock;
use crate::domain::utils::id::{BalanceId, JobId};
use crate::domain::utils::statistics::{ANALYTICS_TARGET, StatParameter};
use crate::error::Error;

/// Collection state of one rebalance operation on one node.
///
/// Installed before any `CollectJobs` goes out so that every `JobInfoList` finds its collector.
/// After collection it keeps the level snapshots until the node's transfers arrive.
#[derive(Debug)]
pub struct CollectionSession {
    operation: BalanceId,
    collectors: Vec<MappingCollector<NodeInfo, Vec<JobInfo>>>,
    inventories: Mutex<Option<Vec<LevelInventory>>>,
}

impl CollectionSession {
    fn new(operation: BalanceId, levels: &[Vec<NodeInfo>]) -> Self {
        let collectors = levels.iter().map(|level| MappingCollector::new(level.len())).collect();
        CollectionSession { operation, collectors, inventories: Mutex::new(None) }
    }

    pub fn operation(&self) -> BalanceId {
        self.operation
    }

    /// Files `jobs` under `level`. False if that level already had all its lists.
    fn add(&self, level: usize, sender: NodeInfo, jobs: Vec<JobInfo>) -> bool {
        match self.collectors.get(level) {
            Some(collector) => collector.add((sender, jobs)),
            None => false,
        }
    }
}

/// Outcome of a job collection: one snapshot per owned level plus the merged subtree inventory.
#[derive(Debug, Clone)]
pub struct JobCollection {
    pub levels: Vec<LevelInventory>,
    /// Every job in this node's subtree.
    pub jobs: Vec<JobInfo>,
}

impl JobCollection {
    /// Jobs per level-0 entry; a leaf maps only itself.
    pub fn by_node(&self, me: &NodeInfo) -> HashMap<NodeInfo, Vec<JobInfo>> {
        match self.levels.first() {
            Some(top) => top.entries().iter().cloned().collect(),
            None => HashMap::from([(me.clone(), self.jobs.clone())]),
        }
    }
}

impl Node {
    /// Starts a rebalance of this node's whole hierarchy. Returns once this node's own job
    /// exchanges are under way; the node resumes when they are settled.
    pub async fn rebalance(&self) {
        let operation = BalanceId::new();
        self.suspend();

        tracing::info!(target: ANALYTICS_TARGET, node = %self.me, operation = %operation, "Rebalance triggered");
        let load = self.load_tracker.get_load(LoadWindow::Trailing(self.config.balancer.load_window));
        self.record("RebalanceTriggered", |e| {
            e.set(StatParameter::Operation, operation.to_string()).set(StatParameter::Load, load);
        });

        let collection = self.collect_job_infos(operation).await;
        self.take_inventories(operation);
        log::info!("{} collected {} jobs for operation {}", self.me, collection.jobs.len(), operation);

        self.propagate(operation, &collection.levels, Vec::new()).await;
    }

    /// Level-synchronized snapshot of every job in this node's subtree.
    ///
    /// Asks every owned node for its subtree's jobs, then folds the levels bottom-up: the merged
    /// result of a level becomes this node's entry one level higher.
    pub async fn collect_job_infos(&self, operation: BalanceId) -> JobCollection {
        let levels = self.levels();
        let session = Arc::new(CollectionSession::new(operation, &levels));
        *lock(&self.session) = Some(session.clone());

        for node in levels.iter().flatten().filter(|n| **n != self.me) {
            log::debug!("{} requests the jobs of {}", self.me, node);
            self.transport.send_async(Message::CollectJobs { operation }, &node.address, node.port, None);
        }

        let mut jobs = self.snapshot();
        let mut inventories = Vec::with_capacity(levels.len());
        for (index, level) in levels.iter().enumerate().rev() {
            session.add(index, self.me.clone(), jobs);
            let collected = session.collectors[index].wait().await;
            let inventory = LevelInventory::new(level, collected);
            jobs = inventory.merged_jobs();
            inventories.push(inventory);
        }
        inventories.reverse();

        *lock(&session.inventories) = Some(inventories.clone());
        JobCollection { levels: inventories, jobs }
    }

    /// Drops the session of `operation` and returns its level snapshots.
    pub(super) fn take_inventories(&self, operation: BalanceId) -> Option<Vec<LevelInventory>> {
        let mut current = lock(&self.session);
        let current_operation = current.as_ref().map(|s| s.operation);

        match current_operation {
            Some(op) if op == operation => {
                let session = current.take()?;
                let inventories = lock(&session.inventories).take();
                inventories
            }
            Some(op) => {
                log::warn!("{} has no snapshot for operation {}, current is {}", self.me, operation, op);
                None
            }
            None => {
                log::warn!("{} has no snapshot for operation {}", self.me, operation);
                None
            }
        }
    }

    pub(super) fn file_job_list(&self, operation: BalanceId, sender: NodeInfo, jobs: Vec<JobInfo>) {
        let session = lock(&self.session).clone();
        let Some(session) = session.filter(|s| s.operation == operation) else {
            log::warn!("{} dropped the job list of {} for unknown operation {}", self.me, sender, operation);
            return;
        };

        let level = lock(&self.state).topology.as_ref().and_then(|t| t.level_of(&sender));
        match level {
            Some(level) => {
                if !session.add(level, sender.clone(), jobs) {
                    log::warn!("{} already had every job list of level {}, ignoring {}", self.me, level, sender);
                }
            }
            None => log::warn!("{} got a job list from {}, which it does not own", self.me, sender),
        }
    }

    /// Drives the propagation rounds over `levels`, starting from the transfers the parent assigned.
    pub(super) async fn propagate(&self, operation: BalanceId, levels: &[LevelInventory], incoming: Vec<JobTransfer>) {
        let mut share = incoming;

        for (round, level) in levels.iter().enumerate() {
            let planned = plan_round(&self.me, level, &share).unwrap_or_else(|e| {
                log::error!("{} could not plan round {} of operation {}: {}", self.me, round, operation, e);
                Vec::new()
            });

            tracing::info!(target: ANALYTICS_TARGET, node = %self.me, operation = %operation, round, transfers = planned.len(), "Round planned");
            self.record("RoundPlanned", |e| {
                e.set(StatParameter::Operation, operation.to_string())
                    .set(StatParameter::Round, round)
                    .set(StatParameter::NumberOfTransfers, planned.len())
                    .set(StatParameter::NumberOfJobs, level.total_jobs());
            });

            for node in level.nodes().filter(|n| **n != self.me) {
                let transfers = transfers_involving(&planned, node);
                let result = Message::LoadBalancingResult { operation, transfers };
                if !self.transport.deliver(result, &node.address, node.port).await {
                    log::warn!("{} could not hand round {} results to {}", self.me, round, node);
                }
            }

            share = transfers_involving(&planned, &self.me);
        }

        self.execute_transfers(operation, share).await;
    }

    /// Moves the jobs of this node's final share: pulls every received job from the node holding it.
    async fn execute_transfers(&self, operation: BalanceId, share: Vec<JobTransfer>) {
        let donated = share.iter().filter(|t| t.donor == self.me).count();

        let mut requests: Vec<(NodeInfo, Vec<JobId>)> = Vec::new();
        for transfer in share.iter().filter(|t| t.recipient == self.me) {
            match requests.iter_mut().find(|(owner, _)| *owner == transfer.job.owner) {
                Some((_, ids)) => ids.push(transfer.job.job_id),
                None => requests.push((transfer.job.owner.clone(), vec![transfer.job.job_id])),
            }
        }
        let received: usize = requests.iter().map(|(_, ids)| ids.len()).sum();

        log::info!("{} gives away {} and receives {} jobs in operation {}", self.me, donated, received, operation);
        self.record("TransfersStarted", |e| {
            e.set(StatParameter::Operation, operation.to_string()).set(StatParameter::NumberOfTransfers, donated + received);
        });

        self.begin_operations(donated + received);
        futures::future::join_all(requests.into_iter().map(|(owner, ids)| self.fetch_jobs(owner, ids))).await;
    }

    async fn fetch_jobs(&self, owner: NodeInfo, ids: Vec<JobId>) {
        let count = ids.len();
        let request = Message::JobTransferRequest { requester: self.me.clone(), job_ids: ids };

        match self.transport.send(request, &owner.address, owner.port).await {
            Some(Message::TransferredJobs { jobs }) => {
                if jobs.len() != count {
                    log::warn!("{} asked {} for {} jobs but got {}", self.me, owner, count, jobs.len());
                }
                self.record("JobsReceived", |e| {
                    e.set(StatParameter::NumberOfJobs, jobs.len()).set(StatParameter::AverageWeight, average_weight(&jobs));
                });
                self.enqueue_all(jobs);
            }
            other => {
                let error = Error::MissingResponse { expected: "TransferredJobs", context: format!("pulling {} jobs from {}", count, owner) };
                log::error!("{}: {} (got {:?})", self.me, error, other.map(|m| m.kind()));
            }
        }

        self.finish_operations(count);
    }

    /// Serves a `JobTransferRequest`: hands out exactly the requested jobs still in the queue.
    pub(super) fn give_jobs(&self, requester: &NodeInfo, ids: &[JobId]) -> Vec<Job> {
        let jobs = self.take_jobs(ids);
        if jobs.len() != ids.len() {
            log::warn!("{} was asked for {} jobs by {} but only holds {}", self.me, ids.len(), requester, jobs.len());
        }
        log::debug!("{} hands {} jobs to {}", self.me, jobs.len(), requester);
        jobs
    }
}

fn average_weight(jobs: &[Job]) -> f64 {
    if jobs.is_empty() {
        return 0.0;
    }
    jobs.iter().map(Job::weight).sum::<u64>() as f64 / jobs.len() as f64
}
