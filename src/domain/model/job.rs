use serde::{Deserialize, Serialize};
use std::fmt;
use std::hint::black_box;
use std::time::{Duration, Instant};

use crate::domain::model::node_info::NodeInfo;
use crate::domain::utils::id::JobId;

/// The computations a node knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Fibonacci,
    Eratosthenes,
    SquareSum,
}

/// A unit of work sitting in some node's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub input: u32,
}

impl Job {
    pub fn new(kind: JobKind, input: u32) -> Self {
        Job { id: JobId::new(), kind, input }
    }

    /// Balancing cost estimate. Monotonic in `input`, never measured.
    pub fn weight(&self) -> u64 {
        let n = self.input as u64;
        match self.kind {
            JobKind::Fibonacci => n.saturating_sub(1),
            JobKind::Eratosthenes => {
                if n <= 1 {
                    0
                } else {
                    let n = n as f64;
                    (n * n.ln()).ceil() as u64
                }
            }
            JobKind::SquareSum => n,
        }
    }

    pub fn info(&self, owner: &NodeInfo) -> JobInfo {
        JobInfo { job_id: self.id, weight: self.weight(), owner: owner.clone() }
    }

    /// Runs the computation to completion. Blocking and CPU-bound.
    pub fn execute(&self) -> u64 {
        match self.kind {
            JobKind::Fibonacci => fibonacci(self.input),
            JobKind::Eratosthenes => count_primes(self.input),
            JobKind::SquareSum => square_sum(self.input),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}) [{}]", self.kind, self.input, self.id)
    }
}

fn fibonacci(nth: u32) -> u64 {
    let (mut f1, mut f2) = (0u64, 1u64);
    for _ in 2..nth {
        let next = f1.wrapping_add(f2);
        f1 = f2;
        f2 = next;
    }
    if nth == 0 { f1 } else { f2 }
}

fn count_primes(n: u32) -> u64 {
    let n = n as usize;
    if n < 2 {
        return 0;
    }

    let mut field = vec![true; n + 1];
    field[0] = false;
    field[1] = false;

    let mut i = 2;
    while i * i <= n {
        if field[i] {
            for j in (i * i..=n).step_by(i) {
                field[j] = false;
            }
        }
        i += 1;
    }

    field.iter().filter(|&&p| p).count() as u64
}

/// CPU time a `SquareSum` job burns per unit of input.
pub const SQUARE_SUM_UNIT: Duration = Duration::from_millis(1);

/// Sum of the squares below `n`, spinning [`SQUARE_SUM_UNIT`] per term so the runtime is linear in `n`.
fn square_sum(n: u32) -> u64 {
    let mut result = 0u64;
    for i in 0..n as u64 {
        let until = Instant::now() + SQUARE_SUM_UNIT;
        while Instant::now() < until {
            black_box(i * i);
        }
        result = result.wrapping_add(i * i);
    }
    result
}

/// Projection of a queued [`Job`] used while planning transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: JobId,
    pub weight: u64,
    /// Node whose queue physically holds the job.
    pub owner: NodeInfo,
}

/// Move `job` from `donor` to `recipient`.
///
/// Donor and recipient may be aggregates (a whole subtree represented by its owner) until
/// the transfer has been pushed down to the leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTransfer {
    pub job: JobInfo,
    pub donor: NodeInfo,
    pub recipient: NodeInfo,
}

impl JobTransfer {
    pub fn new(job: JobInfo, donor: NodeInfo, recipient: NodeInfo) -> Self {
        JobTransfer { job, donor, recipient }
    }

    /// Copy with every endpoint equal to `old` swapped for `new`.
    pub fn replacing(&self, old: &NodeInfo, new: &NodeInfo) -> JobTransfer {
        let swap = |n: &NodeInfo| if n == old { new.clone() } else { n.clone() };
        JobTransfer { job: self.job.clone(), donor: swap(&self.donor), recipient: swap(&self.recipient) }
    }
}

impl fmt::Display for JobTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (weight {}, job {})", self.donor, self.recipient, self.job.weight, self.job.job_id)
    }
}
