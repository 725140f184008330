use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use hierarchical_lb::api::message::Message;
use hierarchical_lb::domain::controller::{ControllerConfig, NodeController, NodeLauncher};
use hierarchical_lb::net::Transport;

/// A launcher whose "nodes" just sleep; the test announces them by hand.
fn sleeping_launcher() -> NodeLauncher {
    NodeLauncher { program: PathBuf::from("sleep"), args: vec![OsString::from("30")] }
}

async fn start_controller() -> (Arc<NodeController>, CancellationToken) {
    let mut config = ControllerConfig::new("10.0.0.7", sleeping_launcher());
    config.port = None;
    config.spawn_timeout = Duration::from_secs(10);

    let shutdown = CancellationToken::new();
    let controller = NodeController::start(config, shutdown.clone()).await.unwrap();
    (controller, shutdown)
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

#[tokio::test]
async fn spin_up_reports_announced_nodes_and_refuses_concurrent_requests() {
    let (controller, shutdown) = start_controller().await;
    let port = controller.port();
    let transport = Transport::default();

    let spin_up = tokio::spawn(async move { Transport::default().send(Message::SpinUpNodes { node_count: 2 }, "localhost", port).await });
    wait_until(|| controller.is_spawning()).await;
    assert_eq!(controller.child_count(), 2);

    let busy = transport.send(Message::SpinUpNodes { node_count: 1 }, "localhost", port).await;
    assert!(matches!(busy, Some(Message::ResponseMessage { .. })), "got {:?}", busy);

    assert!(transport.deliver(Message::NodeOnline { node_id: 0, port: 40001 }, "localhost", port).await);
    assert!(transport.deliver(Message::NodeOnline { node_id: 1, port: 40002 }, "localhost", port).await);

    match spin_up.await.unwrap() {
        Some(Message::NodesSpawned { mut nodes }) => {
            nodes.sort_by_key(|n| n.port);
            assert_eq!(nodes.len(), 2);
            assert!(nodes.iter().all(|n| n.address == "10.0.0.7"));
            assert_eq!(nodes.iter().map(|n| n.port).collect::<Vec<_>>(), vec![40001, 40002]);
        }
        other => panic!("expected the spawned nodes, got {:?}", other),
    }
    assert!(!controller.is_spawning());

    assert!(transport.deliver(Message::KillNodes, "localhost", port).await);
    wait_until(|| controller.child_count() == 0).await;
    shutdown.cancel();
}

#[tokio::test]
async fn late_announcements_are_ignored() {
    let (controller, shutdown) = start_controller().await;

    assert!(Transport::default().deliver(Message::NodeOnline { node_id: 9, port: 40009 }, "localhost", controller.port()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!controller.is_spawning());
    assert_eq!(controller.child_count(), 0);
    shutdown.cancel();
}
