use std::collections::VecDeque;

use crate::domain::balancer::transfer_container::TransferContainer;
use crate::domain::model::JobTransfer;

/// Greedy pass moving jobs from containers above the average weight to the ones below it.
///
/// `containers` is left sorted by descending starting weight. A container is either donor or
/// recipient for the whole pass. Donors give until they drop to the average, recipients take until
/// they exceed it, and neither rejoins once it crossed the line.
pub fn load_balance(containers: &mut [TransferContainer]) -> Vec<JobTransfer> {
    let mut transfers = Vec::new();
    if containers.is_empty() {
        return transfers;
    }

    let total: u64 = containers.iter().map(|c| c.weight()).sum();
    let average = total / containers.len() as u64;

    containers.sort_by(|a, b| b.weight().cmp(&a.weight()));
    let mut active: VecDeque<usize> = (0..containers.len()).collect();

    while transfers_available(containers, &active, average) {
        let Some(&donor) = active.front() else {
            break;
        };

        while containers[donor].weight() > average {
            let Some(&recipient) = active.back() else {
                break;
            };
            if recipient == donor {
                break;
            }

            let slack = average.saturating_sub(containers[recipient].weight());
            let Some(job) = containers[donor].take_job_just_under(slack) else {
                log::debug!("{} is above average but has nothing left to give", containers[donor].node());
                break;
            };

            containers[recipient].assign_job(job.clone());
            transfers.push(JobTransfer::new(job, containers[donor].node().clone(), containers[recipient].node().clone()));

            if containers[recipient].weight() > average {
                active.pop_back();
            }
        }

        active.pop_front();
    }

    log::debug!("Balancing pass over {} containers (average {}) produced {} transfers", containers.len(), average, transfers.len());
    transfers
}

/// Exactly one of the busiest and idlest active containers sits above the average.
fn transfers_available(containers: &[TransferContainer], active: &VecDeque<usize>, average: u64) -> bool {
    match (active.front(), active.back()) {
        (Some(&first), Some(&last)) => (containers[first].weight() > average) != (containers[last].weight() > average),
        _ => false,
    }
}
