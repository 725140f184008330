#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hierarchical_lb::api::hierarchy_dto::TreeNodeDto;
use hierarchical_lb::api::message::Message;
use hierarchical_lb::domain::model::{Job, NodeInfo};
use hierarchical_lb::domain::node::Node;
use hierarchical_lb::loader::config::{BalancerConfig, NodeConfig};
use hierarchical_lb::net::Transport;

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Balancer settings for in-process clusters: short timeouts and no automatic rebalancing.
pub fn test_balancer_config() -> BalancerConfig {
    BalancerConfig {
        imbalance_threshold: 0.1,
        cooldown: Duration::from_secs(3600),
        load_window: Duration::from_secs(2),
        idle_wait: Duration::from_millis(20),
        response_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
    }
}

/// A set of in-process nodes with an installed hierarchy. Worker loops are not started, so
/// queues only change through balancing.
pub struct Cluster {
    pub nodes: Vec<Arc<Node>>,
    pub hierarchy: TreeNodeDto,
}

impl Cluster {
    pub async fn start(node_count: usize, branching_factor: usize) -> Cluster {
        let mut nodes = Vec::with_capacity(node_count);
        for id in 0..node_count {
            let config = NodeConfig::standalone(id as i32, test_balancer_config());
            nodes.push(Node::start(config, None).await.expect("node should start"));
        }

        let infos: Vec<NodeInfo> = nodes.iter().map(|n| n.me().clone()).collect();
        let transport = Transport::from_config(&test_balancer_config());
        let request = Message::BuildHierarchy { branching_factor, nodes: infos };
        let reply = transport.send(request, &nodes[0].me().address, nodes[0].me().port).await;
        let Some(Message::Hierarchy { hierarchy }) = reply else {
            panic!("expected a hierarchy, got {:?}", reply);
        };

        for node in &nodes {
            let installed = tokio::time::timeout(SETTLE_TIMEOUT, node.wait_for_hierarchy()).await;
            assert_eq!(installed, Ok(true), "{} never received its hierarchy", node.me());
        }

        Cluster { nodes, hierarchy }
    }

    pub fn infos(&self) -> Vec<NodeInfo> {
        self.nodes.iter().map(|n| n.me().clone()).collect()
    }

    pub fn total_jobs(&self) -> Vec<Job> {
        self.nodes.iter().flat_map(|n| n.queued_jobs()).collect()
    }

    /// Waits until no node is suspended by a rebalance.
    pub async fn settle(&self) {
        for node in &self.nodes {
            let resumed = tokio::time::timeout(SETTLE_TIMEOUT, node.wait_until_resumed()).await;
            assert!(resumed.is_ok(), "{} is still balancing", node.me());
        }
    }

    pub fn stop(&self) {
        for node in &self.nodes {
            node.stop();
        }
    }
}
