mod common;

use std::collections::HashSet;

use common::Cluster;
use hierarchical_lb::api::hierarchy_dto::TreeNodeDto;
use hierarchical_lb::api::message::Message;
use hierarchical_lb::domain::node::NodePhase;
use hierarchical_lb::net::Transport;

fn owners(dto: &TreeNodeDto, out: &mut HashSet<u16>) {
    out.insert(dto.node.port);
    for child in &dto.children {
        owners(child, out);
    }
}

#[tokio::test]
async fn seven_nodes_receive_their_subtrees() {
    let cluster = Cluster::start(7, 2).await;
    let n = cluster.infos();

    assert_eq!(cluster.hierarchy.node, n[0]);
    let mut seen = HashSet::new();
    owners(&cluster.hierarchy, &mut seen);
    assert_eq!(seen.len(), 7);

    let levels: Vec<_> = cluster.nodes.iter().map(|node| node.levels()).collect();
    assert_eq!(levels[0], vec![vec![n[0].clone(), n[1].clone()], vec![n[0].clone(), n[2].clone()], vec![n[0].clone(), n[4].clone()]]);
    assert_eq!(levels[1], vec![vec![n[1].clone(), n[3].clone()], vec![n[1].clone(), n[6].clone()]]);
    assert_eq!(levels[2], vec![vec![n[2].clone(), n[5].clone()]]);
    for leaf in [3, 4, 5, 6] {
        assert!(levels[leaf].is_empty(), "{} should be a leaf", n[leaf]);
    }

    let parents: Vec<_> = cluster.nodes.iter().map(|node| node.parent().map(|p| p.port)).collect();
    assert_eq!(parents, vec![None, Some(n[0].port), Some(n[0].port), Some(n[1].port), Some(n[0].port), Some(n[2].port), Some(n[1].port)]);

    assert!(cluster.nodes.iter().all(|node| node.phase() == NodePhase::Running));
    cluster.stop();
}

#[tokio::test]
async fn invalid_branching_factor_is_answered_with_an_error() {
    let cluster = Cluster::start(1, 2).await;
    let root = cluster.nodes[0].me().clone();

    let request = Message::BuildHierarchy { branching_factor: 1, nodes: vec![root.clone()] };
    let reply = Transport::default().send(request, &root.address, root.port).await;

    match reply {
        Some(Message::ResponseMessage { text }) => assert!(text.contains("Branching factor")),
        other => panic!("unexpected reply {:?}", other),
    }
    cluster.stop();
}
