pub mod job;
pub mod node_info;

pub use job::{Job, JobInfo, JobKind, JobTransfer};
pub use node_info::NodeInfo;
