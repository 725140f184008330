use std::collections::{HashMap, HashSet};

use crate::domain::balancer::greedy::load_balance;
use crate::domain::balancer::transfer_container::TransferContainer;
use crate::domain::model::{JobInfo, JobTransfer, NodeInfo};
use crate::domain::utils::id::JobId;
use crate::error::{Error, Result};

/// Snapshot of one owned level taken during job collection.
///
/// Entries follow hierarchy order; the owner's own entry holds everything collected from its
/// deeper levels.
#[derive(Debug, Clone, Default)]
pub struct LevelInventory {
    entries: Vec<(NodeInfo, Vec<JobInfo>)>,
    entry_of_job: HashMap<JobId, NodeInfo>,
}

impl LevelInventory {
    /// Orders `collected` by `level`. Nodes that reported nothing get an empty entry.
    pub fn new(level: &[NodeInfo], mut collected: HashMap<NodeInfo, Vec<JobInfo>>) -> Self {
        let mut entries = Vec::with_capacity(level.len());
        let mut entry_of_job = HashMap::new();

        for node in level {
            let jobs = collected.remove(node).unwrap_or_default();
            for job in &jobs {
                entry_of_job.insert(job.job_id, node.clone());
            }
            entries.push((node.clone(), jobs));
        }

        if !collected.is_empty() {
            log::warn!("Ignoring job lists from {} nodes outside of the level", collected.len());
        }

        LevelInventory { entries, entry_of_job }
    }

    pub fn entries(&self) -> &[(NodeInfo, Vec<JobInfo>)] {
        &self.entries
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.entries.iter().map(|(node, _)| node)
    }

    /// The level entry `job` was collected from.
    pub fn entry_of(&self, job: &JobId) -> Option<&NodeInfo> {
        self.entry_of_job.get(job)
    }

    /// Every job of the level in one list, as reported upwards.
    pub fn merged_jobs(&self) -> Vec<JobInfo> {
        self.entries.iter().flat_map(|(_, jobs)| jobs.iter().cloned()).collect()
    }

    pub fn total_jobs(&self) -> usize {
        self.entry_of_job.len()
    }
}

/// Plans one propagation round over `level`.
///
/// `incoming` are the transfers the level above assigned to `me` as an aggregate. Donations are
/// pinned to the entry that holds the job, received jobs are placed on the lightest entries, and
/// the remaining imbalance is settled by a greedy pass. A job appears at most once in the result.
pub fn plan_round(me: &NodeInfo, level: &LevelInventory, incoming: &[JobTransfer]) -> Result<Vec<JobTransfer>> {
    let mut donated = Vec::new();
    let mut received = Vec::new();
    let mut blacklist = HashSet::new();

    for transfer in incoming {
        if &transfer.donor == me {
            let entry = level.entry_of(&transfer.job.job_id).ok_or_else(|| {
                Error::InconsistentInventory(format!("{} donated job {} it never collected", me, transfer.job.job_id))
            })?;
            blacklist.insert(transfer.job.job_id);
            donated.push(transfer.replacing(me, entry));
        } else if &transfer.recipient == me {
            received.push(transfer);
        }
    }

    let mut containers: Vec<TransferContainer> = level
        .entries()
        .iter()
        .map(|(node, jobs)| TransferContainer::new(node.clone(), jobs.iter().filter(|j| !blacklist.contains(&j.job_id)).cloned().collect()))
        .collect();

    let mut reassigned = Vec::with_capacity(received.len());
    for transfer in received {
        containers.sort_by(|a, b| b.weight().cmp(&a.weight()));
        let Some(target) = containers.last_mut() else {
            return Err(Error::InconsistentInventory(format!("{} received job {} without a level to place it", me, transfer.job.job_id)));
        };
        target.assign_job(transfer.job.clone());
        reassigned.push(transfer.replacing(me, target.node()));
    }

    let greedy = load_balance(&mut containers);

    let mut merged = TransferSet::default();
    greedy.into_iter().for_each(|t| merged.upsert(t));
    reassigned.into_iter().for_each(|t| merged.upsert(t));
    donated.into_iter().for_each(|t| merged.upsert(t));

    Ok(merged.into_vec())
}

/// Transfers where `node` gives or receives.
pub fn transfers_involving(transfers: &[JobTransfer], node: &NodeInfo) -> Vec<JobTransfer> {
    transfers.iter().filter(|t| &t.donor == node || &t.recipient == node).cloned().collect()
}

/// Insertion-ordered transfers, at most one per job. Later inserts replace earlier ones.
#[derive(Debug, Default)]
struct TransferSet {
    transfers: Vec<JobTransfer>,
    index: HashMap<JobId, usize>,
}

impl TransferSet {
    fn upsert(&mut self, transfer: JobTransfer) {
        match self.index.get(&transfer.job.job_id) {
            Some(&i) => self.transfers[i] = transfer,
            None => {
                self.index.insert(transfer.job.job_id, self.transfers.len());
                self.transfers.push(transfer);
            }
        }
    }

    fn into_vec(self) -> Vec<JobTransfer> {
        self.transfers
    }
}
