mod common;

use std::time::Duration;

use hierarchical_lb::domain::node::Node;
use hierarchical_lb::domain::utils::statistics::{StatParameter, StatsCollector};
use hierarchical_lb::loader::config::NodeConfig;

/// Reads the statistics file until a row contains `needle`; the writer thread runs behind the node.
async fn wait_for_row(path: &std::path::Path, needle: &str) -> Vec<Vec<String>> {
    for _ in 0..100 {
        if let Ok(content) = std::fs::read_to_string(path) {
            if content.contains(needle) {
                return content.lines().map(|line| line.split(';').map(str::to_string).collect()).collect();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no {} row was flushed to {:?}", needle, path);
}

#[tokio::test]
async fn resuming_flushes_the_rebalance_rows() {
    let path = std::env::temp_dir().join(format!("lb-stats-{}.csv", std::process::id()));
    let stats = StatsCollector::init(Some(path.clone()));
    let node = Node::start(NodeConfig::standalone(0, common::test_balancer_config()), Some(stats.clone())).await.unwrap();

    // No hierarchy: the rebalance settles immediately and the node resumes.
    node.rebalance().await;
    assert!(!node.is_balancing());

    let rows = wait_for_row(&path, "Resumed").await;
    let headers = StatParameter::headers();
    assert_eq!(rows[0], headers);

    let column = |name: &str| headers.iter().position(|h| *h == name).unwrap();
    let triggered = rows.iter().find(|row| row[column("Event")] == "RebalanceTriggered").expect("trigger row");
    let load: f64 = triggered[column("Load")].parse().expect("the load is recorded");
    assert!((0.0..=1.0).contains(&load));

    stats.shutdown();
    node.stop();
    let _ = std::fs::remove_file(path);
}
