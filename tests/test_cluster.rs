mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::Cluster;
use hierarchical_lb::api::message::Message;
use hierarchical_lb::domain::model::{Job, JobKind};
use hierarchical_lb::domain::utils::id::{BalanceId, JobId};
use hierarchical_lb::net::Transport;

#[tokio::test]
async fn collection_over_three_levels_returns_every_queued_job_once() {
    let cluster = Cluster::start(7, 2).await;

    let mut expected = HashSet::new();
    for (i, node) in cluster.nodes.iter().enumerate() {
        for input in 0..=i as u32 {
            let job = Job::new(JobKind::Fibonacci, 10 + input);
            expected.insert(job.id);
            node.enqueue(job);
        }
    }

    let root = &cluster.nodes[0];
    let collection = root.collect_job_infos(BalanceId::new()).await;

    let collected: Vec<JobId> = collection.jobs.iter().map(|info| info.job_id).collect();
    let unique: HashSet<JobId> = collected.iter().copied().collect();
    assert_eq!(collected.len(), unique.len(), "a job was reported twice");
    assert_eq!(unique, expected);

    // Every job is reported with the node that physically holds it.
    for info in &collection.jobs {
        let holder = cluster.nodes.iter().find(|n| n.queued_jobs().iter().any(|job| job.id == info.job_id)).unwrap();
        assert_eq!(&info.owner, holder.me());
    }

    // Level 0 splits the tree into the root's and its first child's subtrees.
    let by_node = collection.by_node(root.me());
    assert_eq!(by_node.len(), 2);
    assert_eq!(by_node.values().map(Vec::len).sum::<usize>(), expected.len());

    cluster.stop();
}

#[tokio::test]
async fn one_rebalance_spreads_a_grandchild_backlog() {
    let cluster = Cluster::start(7, 2).await;
    let overloaded = &cluster.nodes[5];

    let mut expected = HashSet::new();
    for _ in 0..8 {
        let job = Job::new(JobKind::SquareSum, 10);
        expected.insert(job.id);
        overloaded.enqueue(job);
    }

    cluster.nodes[0].rebalance().await;
    cluster.settle().await;

    let jobs = cluster.total_jobs();
    let ids: HashSet<JobId> = jobs.iter().map(|job| job.id).collect();
    assert_eq!(jobs.len(), 8, "a job was lost or duplicated");
    assert_eq!(ids, expected);

    let weights: Vec<u64> = cluster.nodes.iter().map(|n| n.queued_jobs().iter().map(Job::weight).sum()).collect();
    let total = weights.iter().sum::<u64>() as f64;
    let average = total / weights.len() as f64;
    assert!((weights[5] as f64 - average).abs() <= 10.0, "node 5 still holds {} against an average of {}", weights[5], average);

    // Shares of the cluster weight live on the same [0,1] scale as loads: node 5 started at 1.0.
    let threshold = common::test_balancer_config().imbalance_threshold;
    let share = |weight: u64| weight as f64 / total;
    assert!(share(80) - 1.0 / 7.0 > threshold);
    assert!((share(weights[5]) - 1.0 / 7.0).abs() <= threshold, "node 5 holds a share of {:.3}", share(weights[5]));
    assert!(weights.iter().filter(|&&w| w > 0).count() >= 6, "jobs were not spread: {:?}", weights);

    assert!(cluster.nodes.iter().all(|n| !n.is_balancing()));
    cluster.stop();
}

#[tokio::test]
async fn rebalancing_a_balanced_cluster_moves_nothing() {
    // Two equal subtrees of two equal nodes each.
    let cluster = Cluster::start(4, 2).await;
    for node in &cluster.nodes {
        node.enqueue(Job::new(JobKind::SquareSum, 10));
    }
    let before: Vec<Vec<Job>> = cluster.nodes.iter().map(|n| n.queued_jobs()).collect();

    cluster.nodes[0].rebalance().await;
    cluster.settle().await;

    let after: Vec<Vec<Job>> = cluster.nodes.iter().map(|n| n.queued_jobs()).collect();
    assert_eq!(before, after);
    assert!(cluster.nodes.iter().all(|n| !n.is_balancing()));
    cluster.stop();
}

#[tokio::test]
async fn collect_request_to_the_root_leaves_it_running() {
    let cluster = Cluster::start(3, 2).await;
    let root = &cluster.nodes[0];
    root.enqueue(Job::new(JobKind::SquareSum, 10));

    let transport = Transport::from_config(&common::test_balancer_config());
    assert!(transport.deliver(Message::CollectJobs { operation: BalanceId::new() }, &root.me().address, root.me().port).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!root.is_balancing(), "a node without a parent must not suspend for a collection");
    assert_eq!(root.queued_jobs().len(), 1);
    cluster.stop();
}
