//! Two-node end-to-end tests over loopback multicast discovery.
//!
//! These exercise the full path: discovery, availability probing, pinned
//! TLS, and the bridged rooms. They need a network stack that loops
//! multicast back to local receivers; each test probes for that first and
//! skips gracefully when unavailable.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use huddle_core::api::MessageContent;
use huddle_core::config::NodeOptions;
use huddle_core::Key;
use huddle_rooms::{LocalRoom, Room};
use huddled::NodeManager;

async fn multicast_available() -> Option<String> {
    let probe = huddle_discovery::socket::bind("224.0.0.1:0".parse().ok()?).ok()?;
    let port = probe.local_addr().ok()?.port();
    let addr: std::net::SocketAddr = format!("224.0.0.1:{port}").parse().ok()?;

    let receiver = huddle_discovery::socket::bind(addr).ok()?;
    let sender = huddle_discovery::socket::dial(addr).ok()?;
    sender.send(b"probe\n").await.ok()?;
    let mut buf = [0u8; 16];
    timeout(Duration::from_millis(500), receiver.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;

    // a second fresh group for the test itself
    let probe = huddle_discovery::socket::bind("224.0.0.1:0".parse().ok()?).ok()?;
    let port = probe.local_addr().ok()?.port();
    Some(format!("224.0.0.1:{port}"))
}

async fn start_node(name: &str, pin: &str, discovery_addr: &str) -> NodeManager {
    let options = NodeOptions {
        name: name.to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
        discovery_addr: discovery_addr.to_string(),
    };
    let mut manager = NodeManager::new(options, Key::from(pin)).unwrap();
    manager.start().await.unwrap();
    manager
}

async fn wait_for_link(a: &Arc<LocalRoom>, b: &Arc<LocalRoom>, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if a.upstream().await.is_some() || b.upstream().await.is_some() {
            return true;
        }
        sleep(Duration::from_millis(200)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_nodes_bridge_and_converge() {
    let Some(addr) = multicast_available().await else {
        eprintln!("SKIP: loopback multicast not available");
        return;
    };

    let alice = start_node("alice", "7134", &addr).await;
    let bob = start_node("bob", "7134", &addr).await;

    assert!(
        wait_for_link(&alice.room(), &bob.room(), Duration::from_secs(10)).await,
        "nodes never linked"
    );

    let mut bob_ui = bob.room().listen(None).await.unwrap();

    // drain whatever membership traffic is in flight, then speak
    sleep(Duration::from_millis(500)).await;
    while matches!(
        timeout(Duration::from_millis(100), bob_ui.recv()).await,
        Ok(Some(_))
    ) {}

    let mut msg = huddle_core::api::Message::text(alice.owner().clone(), "hello");
    alice.room().create_message(&mut msg).await.unwrap();

    let mut deliveries = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match timeout(Duration::from_millis(300), bob_ui.recv()).await {
            Ok(Some(received)) => {
                if let MessageContent::Text(text) = &received.content {
                    if text.content == "hello" {
                        assert_eq!(received.from.uid, alice.owner().uid);
                        deliveries += 1;
                    }
                }
            }
            Ok(None) => break,
            Err(_) if deliveries > 0 => break,
            Err(_) => {}
        }
    }
    assert_eq!(deliveries, 1, "message must arrive exactly once");

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_pins_never_link() {
    let Some(addr) = multicast_available().await else {
        eprintln!("SKIP: loopback multicast not available");
        return;
    };

    let a = start_node("alice", "pin-a", &addr).await;
    let b = start_node("bob", "pin-b", &addr).await;

    // give both search loops several rounds
    sleep(Duration::from_secs(5)).await;

    assert!(a.room().upstream().await.is_none(), "alice linked across pins");
    assert!(b.room().upstream().await.is_none(), "bob linked across pins");

    a.stop().await;
    b.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scanner_sees_a_running_node() {
    let Some(addr) = multicast_available().await else {
        eprintln!("SKIP: loopback multicast not available");
        return;
    };

    let node = start_node("alice", "7134", &addr).await;
    let room_uid = node.room().uid();

    let found = huddle_discovery::Scanner::new(addr.parse().unwrap())
        .search(
            Some(&Key::from("7134")),
            huddle_discovery::SearchOptions {
                check_availability: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let entry = found
        .iter()
        .find(|r| r.info.meta.uid == Some(room_uid))
        .expect("node's room not discovered");
    assert!(
        entry.available_endpoint.is_some(),
        "advertised endpoint failed the availability probe: {entry:?}"
    );

    node.stop().await;
}
