use crate::domain::model::{JobInfo, NodeInfo};

/// Working set of one node (or one aggregated subtree) during a balancing pass.
///
/// Jobs the node started with can be given away; jobs assigned during the pass only add weight.
#[derive(Debug, Clone)]
pub struct TransferContainer {
    node: NodeInfo,
    /// Heaviest first. Taken jobs leave a `None` behind.
    jobs_by_weight: Vec<Option<JobInfo>>,
    remaining_weight: u64,
    added: Vec<JobInfo>,
    added_weight: u64,
}

impl TransferContainer {
    pub fn new(node: NodeInfo, mut jobs: Vec<JobInfo>) -> Self {
        jobs.sort_by(|a, b| b.weight.cmp(&a.weight));
        let remaining_weight = jobs.iter().map(|j| j.weight).sum();

        TransferContainer { node, jobs_by_weight: jobs.into_iter().map(Some).collect(), remaining_weight, added: Vec::new(), added_weight: 0 }
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub fn weight(&self) -> u64 {
        self.remaining_weight + self.added_weight
    }

    pub fn added(&self) -> &[JobInfo] {
        &self.added
    }

    pub fn remaining_jobs(&self) -> impl Iterator<Item = &JobInfo> {
        self.jobs_by_weight.iter().flatten()
    }

    /// Takes the heaviest job that still fits into `slack`.
    ///
    /// When nothing fits, the lightest remaining job is taken instead. `None` once every original
    /// job is gone.
    pub fn take_job_just_under(&mut self, slack: u64) -> Option<JobInfo> {
        let index = self
            .jobs_by_weight
            .iter()
            .position(|j| j.as_ref().is_some_and(|j| j.weight <= slack))
            .or_else(|| self.jobs_by_weight.iter().rposition(Option::is_some))?;

        let job = self.jobs_by_weight[index].take()?;
        self.remaining_weight -= job.weight;
        Some(job)
    }

    pub fn assign_job(&mut self, job: JobInfo) {
        self.added_weight += job.weight;
        self.added.push(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::utils::id::JobId;

    fn container(weights: &[u64]) -> TransferContainer {
        let node = NodeInfo::new(0, "localhost", 1);
        let jobs = weights.iter().map(|&weight| JobInfo { job_id: JobId::new(), weight, owner: node.clone() }).collect();
        TransferContainer::new(node, jobs)
    }

    #[test]
    fn takes_the_heaviest_job_that_fits() {
        let mut c = container(&[2, 6, 4]);

        assert_eq!(c.take_job_just_under(5).map(|j| j.weight), Some(4));
        assert_eq!(c.take_job_just_under(6).map(|j| j.weight), Some(6));
        assert_eq!(c.weight(), 2);
    }

    #[test]
    fn falls_back_to_the_lightest_remaining_job() {
        let mut c = container(&[6, 4, 2]);

        assert_eq!(c.take_job_just_under(1).map(|j| j.weight), Some(2));
        assert_eq!(c.take_job_just_under(1).map(|j| j.weight), Some(4));
        assert_eq!(c.take_job_just_under(1).map(|j| j.weight), Some(6));
        assert_eq!(c.take_job_just_under(100), None);
        assert_eq!(c.weight(), 0);
    }

    #[test]
    fn assigned_jobs_count_but_cannot_be_taken() {
        let mut c = container(&[]);
        let extra = JobInfo { job_id: JobId::new(), weight: 7, owner: NodeInfo::new(1, "localhost", 2) };

        c.assign_job(extra);

        assert_eq!(c.weight(), 7);
        assert_eq!(c.added().len(), 1);
        assert_eq!(c.take_job_just_under(10), None);
    }
}
