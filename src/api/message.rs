use serde::{Deserialize, Serialize};

use crate::api::hierarchy_dto::TreeNodeDto;
use crate::domain::model::{Job, JobInfo, JobTransfer, NodeInfo};
use crate::domain::utils::id::{BalanceId, JobId};

/// Everything that travels between client, controllers, nodes and the log sink.
///
/// One connection carries one message, optionally followed by one reply on the same socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    //--- Controller ---
    /// Client to controller: start `node_count` node processes.
    SpinUpNodes { node_count: usize },
    /// Client to controller: stop every node it spawned.
    KillNodes,
    /// Node to controller once its listener is bound.
    NodeOnline { node_id: i32, port: u16 },
    /// Controller's reply to `SpinUpNodes`.
    NodesSpawned { nodes: Vec<NodeInfo> },
    /// Free-form reply, e.g. a busy controller.
    ResponseMessage { text: String },

    //--- Hierarchy ---
    /// Client to the first node: arrange `nodes` into a tree.
    BuildHierarchy { branching_factor: usize, nodes: Vec<NodeInfo> },
    /// Reply to `BuildHierarchy`, and the subtree handed to each node.
    Hierarchy { hierarchy: TreeNodeDto },

    //--- Work & load ---
    DoWork { job: Job },
    /// Child to parent: aggregated load of the child's subtree.
    LoadInfo { node: NodeInfo, load: f64 },

    //--- Rebalancing ---
    /// Parent to child: suspend and report every job in your subtree.
    CollectJobs { operation: BalanceId },
    JobInfoList { operation: BalanceId, sender: NodeInfo, jobs: Vec<JobInfo> },
    /// Parent to child: the transfers of one round that involve the child.
    LoadBalancingResult { operation: BalanceId, transfers: Vec<JobTransfer> },
    /// Recipient to the node physically holding the jobs.
    JobTransferRequest { requester: NodeInfo, job_ids: Vec<JobId> },
    /// Reply to `JobTransferRequest`.
    TransferredJobs { jobs: Vec<Job> },

    //--- Logging ---
    LogMessage { node: i32, level: String, text: String },
}

impl Message {
    /// Variant name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SpinUpNodes { .. } => "spin_up_nodes",
            Message::KillNodes => "kill_nodes",
            Message::NodeOnline { .. } => "node_online",
            Message::NodesSpawned { .. } => "nodes_spawned",
            Message::ResponseMessage { .. } => "response_message",
            Message::BuildHierarchy { .. } => "build_hierarchy",
            Message::Hierarchy { .. } => "hierarchy",
            Message::DoWork { .. } => "do_work",
            Message::LoadInfo { .. } => "load_info",
            Message::CollectJobs { .. } => "collect_jobs",
            Message::JobInfoList { .. } => "job_info_list",
            Message::LoadBalancingResult { .. } => "load_balancing_result",
            Message::JobTransferRequest { .. } => "job_transfer_request",
            Message::TransferredJobs { .. } => "transferred_jobs",
            Message::LogMessage { .. } => "log_message",
        }
    }
}
