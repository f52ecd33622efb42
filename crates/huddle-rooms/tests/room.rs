//! Room behaviour tests: fan-out, membership announcements, duplicate
//! suppression, and the upstream bridge between two in-process rooms.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use huddle_core::api::{Message, MessageContent, ObjectMeta};
use huddle_core::{Key, Uid};
use huddle_rooms::{LocalRoom, Room, RoomError};

fn alice() -> ObjectMeta {
    ObjectMeta::named(Uid::new(), "alice")
}

fn bob() -> ObjectMeta {
    ObjectMeta::named(Uid::new(), "bob")
}

fn text_of(msg: &Message) -> Option<&str> {
    match &msg.content {
        MessageContent::Text(t) => Some(&t.content),
        _ => None,
    }
}

async fn recv_within(
    sub: &mut huddle_rooms::Subscription,
    what: &str,
) -> Message {
    timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("channel closed waiting for {what}"))
}

#[tokio::test]
async fn solo_echo() {
    let room = LocalRoom::new(Key::from("7134"), alice());
    let user = alice();

    let mut sub = room.listen(Some(user.clone())).await.unwrap();

    // the join is broadcast to all current subscribers, the new one included
    let joined = recv_within(&mut sub, "join message").await;
    match joined.content {
        MessageContent::Join(change) => assert_eq!(change.user.name, "alice"),
        other => panic!("expected join, got {other:?}"),
    }

    let mut msg = Message::text(user.clone(), "hi");
    room.create_message(&mut msg).await.unwrap();

    let received = recv_within(&mut sub, "text message").await;
    assert_eq!(text_of(&received), Some("hi"));
    assert_eq!(received.from.uid, user.uid);
}

#[tokio::test]
async fn create_message_assigns_uid() {
    let room = LocalRoom::new(Key::from("pin"), alice());
    let mut msg = Message::text(alice(), "x");
    assert!(msg.meta.uid.is_none());
    room.create_message(&mut msg).await.unwrap();
    assert!(msg.meta.uid.is_some());
}

#[tokio::test]
async fn duplicate_uid_is_delivered_at_most_once() {
    let room = LocalRoom::new(Key::from("pin"), alice());
    let mut sub = room.listen(None).await.unwrap();

    let mut msg = Message::text(alice(), "once");
    room.create_message(&mut msg).await.unwrap();
    // same UID again — silently accepted, not redelivered
    let mut replay = msg.clone();
    room.create_message(&mut replay).await.unwrap();

    let first = recv_within(&mut sub, "first delivery").await;
    assert_eq!(text_of(&first), Some("once"));

    let second = timeout(Duration::from_millis(300), sub.recv()).await;
    assert!(second.is_err(), "duplicate was redelivered: {second:?}");
}

#[tokio::test]
async fn leave_follows_subscription_close() {
    let room = LocalRoom::new(Key::from("pin"), alice());

    let mut watcher = room.listen(None).await.unwrap();

    let member = bob();
    let member_sub = room.listen(Some(member.clone())).await.unwrap();

    let joined = recv_within(&mut watcher, "join").await;
    assert!(matches!(joined.content, MessageContent::Join(_)));

    member_sub.close().unwrap();
    drop(member_sub);

    let left = recv_within(&mut watcher, "leave").await;
    match left.content {
        MessageContent::Leave(change) => assert_eq!(change.user.uid, member.uid),
        other => panic!("expected leave, got {other:?}"),
    }
}

#[tokio::test]
async fn join_arrives_before_any_message() {
    let room = LocalRoom::new(Key::from("pin"), alice());

    let mut sub = room.listen(Some(alice())).await.unwrap();
    let mut msg = Message::text(alice(), "after-join");
    room.create_message(&mut msg).await.unwrap();

    let first = recv_within(&mut sub, "first event").await;
    assert!(
        matches!(first.content, MessageContent::Join(_)),
        "join must precede messages, got {first:?}"
    );
    let second = recv_within(&mut sub, "second event").await;
    assert_eq!(text_of(&second), Some("after-join"));
}

#[tokio::test]
async fn slow_subscriber_loses_only_its_own_messages() {
    let room = LocalRoom::new(Key::from("pin"), alice());

    // never reads — its buffer (10) fills and the rest drop
    let mut slow = room.listen(None).await.unwrap();

    // drains concurrently — sees everything
    let mut fast = room.listen(None).await.unwrap();
    let drained = tokio::spawn(async move {
        let mut seen = Vec::new();
        while seen.len() < 20 {
            match timeout(Duration::from_secs(2), fast.recv()).await {
                Ok(Some(msg)) => seen.push(msg),
                _ => break,
            }
        }
        seen
    });

    for i in 0..20 {
        let mut msg = Message::text(alice(), format!("m{i}"));
        room.create_message(&mut msg).await.unwrap();
        tokio::task::yield_now().await;
    }

    let seen = drained.await.unwrap();
    assert_eq!(seen.len(), 20, "fast subscriber must receive all 20");

    room.close().await.unwrap();
    let mut buffered = 0;
    while let Some(_msg) = slow.recv().await {
        buffered += 1;
    }
    assert_eq!(buffered, 10, "slow subscriber keeps exactly its buffer");
}

#[tokio::test]
async fn closed_room_refuses_messages_and_listen() {
    let room = LocalRoom::new(Key::from("pin"), alice());
    let mut sub = room.listen(None).await.unwrap();

    room.close().await.unwrap();

    assert!(sub.recv().await.is_none(), "subscriber must see closure");

    let mut msg = Message::text(alice(), "late");
    assert!(matches!(
        room.create_message(&mut msg).await,
        Err(RoomError::Closed)
    ));
    assert!(matches!(room.listen(None).await, Err(RoomError::Closed)));
}

#[tokio::test]
async fn info_is_signed_and_carries_owner() {
    let key = Key::from("7134");
    let owner = alice();
    let room = LocalRoom::new(key.clone(), owner.clone());

    let info = room.info().await.unwrap();
    assert_eq!(info.meta.uid, Some(room.uid()));
    assert_eq!(info.owner.meta.name, "alice");
    assert_eq!(info.key_signature, key.published_signature());
    huddle_core::signing::verify_api_object(&key, &info, None, None).unwrap();
}

// ── Bridge ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bridge_converges_in_both_directions() {
    let a = LocalRoom::new(Key::from("7134"), alice());
    let b = LocalRoom::new(Key::from("7134"), bob());

    let mut sub_a = a.listen(None).await.unwrap();
    let mut sub_b = b.listen(None).await.unwrap();

    a.set_upstream(b.clone() as Arc<dyn Room>).await.unwrap();
    assert!(a.upstream().await.is_some());

    // b announces a's owner joining; the announcement is also mirrored
    // back into a by the bridge listener
    let joined = recv_within(&mut sub_b, "bridge join on b").await;
    match joined.content {
        MessageContent::Join(change) => assert_eq!(change.user.name, "alice"),
        other => panic!("expected join, got {other:?}"),
    }
    let mirrored = recv_within(&mut sub_a, "mirrored join on a").await;
    assert!(matches!(mirrored.content, MessageContent::Join(_)));

    // a → b
    let mut hello = Message::text(alice(), "hello");
    a.create_message(&mut hello).await.unwrap();
    let on_a = recv_within(&mut sub_a, "hello locally").await;
    assert_eq!(text_of(&on_a), Some("hello"));
    let on_b = recv_within(&mut sub_b, "hello across the bridge").await;
    assert_eq!(text_of(&on_b), Some("hello"));
    assert_eq!(on_b.meta.uid, hello.meta.uid);

    // b → a
    let mut world = Message::text(bob(), "world");
    b.create_message(&mut world).await.unwrap();
    let world_on_b = recv_within(&mut sub_b, "world locally").await;
    assert_eq!(text_of(&world_on_b), Some("world"));
    let back_on_a = recv_within(&mut sub_a, "world across the bridge").await;
    assert_eq!(text_of(&back_on_a), Some("world"));

    // no echoes: nothing further arrives on either side
    sleep(Duration::from_millis(300)).await;
    assert!(
        timeout(Duration::from_millis(100), sub_a.recv()).await.is_err(),
        "unexpected extra delivery on a"
    );
    assert!(
        timeout(Duration::from_millis(100), sub_b.recv()).await.is_err(),
        "unexpected extra delivery on b"
    );
}

#[tokio::test]
async fn set_upstream_replaces_and_closes_previous() {
    let a = LocalRoom::new(Key::from("7134"), alice());
    let b1 = LocalRoom::new(Key::from("7134"), bob());
    let b2 = LocalRoom::new(Key::from("7134"), bob());

    a.set_upstream(b1.clone() as Arc<dyn Room>).await.unwrap();
    a.set_upstream(b2.clone() as Arc<dyn Room>).await.unwrap();

    // the replaced upstream is closed within bounded time
    let mut msg = Message::text(alice(), "late");
    let mut closed = false;
    for _ in 0..20 {
        if matches!(b1.create_message(&mut msg).await, Err(RoomError::Closed)) {
            closed = true;
            break;
        }
        msg.meta.uid = Some(Uid::new());
        sleep(Duration::from_millis(50)).await;
    }
    assert!(closed, "previous upstream was never closed");

    let current = a.upstream().await.expect("upstream should be b2");
    let info = current.info().await.unwrap();
    assert_eq!(info.meta.uid, Some(b2.uid()));
}

#[tokio::test]
async fn closing_upstream_tears_the_bridge_down() {
    let a = LocalRoom::new(Key::from("7134"), alice());
    let b = LocalRoom::new(Key::from("7134"), bob());

    a.set_upstream(b.clone() as Arc<dyn Room>).await.unwrap();
    assert!(a.upstream().await.is_some());

    b.close().await.unwrap();

    // the listener loop ends, and teardown clears the pointer
    let mut cleared = false;
    for _ in 0..20 {
        if a.upstream().await.is_none() {
            cleared = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(cleared, "upstream pointer never cleared after peer closed");
}

#[tokio::test]
async fn forgotten_uid_is_readmitted_after_window_rollover() {
    let room = LocalRoom::new(Key::from("pin"), alice());

    let mut first = Message::text(alice(), "early");
    room.create_message(&mut first).await.unwrap();

    // roll the duplicate window (2 × 500 capacity) past the first message
    for i in 0..1001 {
        let mut churn = Message::text(alice(), format!("churn-{i}"));
        room.create_message(&mut churn).await.unwrap();
    }

    let mut sub = room.listen(None).await.unwrap();
    let mut replay = first.clone();
    room.create_message(&mut replay).await.unwrap();

    let redelivered = recv_within(&mut sub, "re-admitted message").await;
    assert_eq!(redelivered.meta.uid, first.meta.uid);
}

#[tokio::test]
async fn set_upstream_fails_fast_on_unreachable_peer() {
    let a = LocalRoom::new(Key::from("7134"), alice());
    let dead = huddle_rooms::RemoteRoom::new(
        "https://127.0.0.1:9",
        "sha256:0000000000000000000000000000000000000000000000000000000000000000",
    )
    .unwrap();

    let result = a.set_upstream(Arc::new(dead) as Arc<dyn Room>).await;
    assert!(result.is_err(), "unreachable peer must fail set_upstream");
    assert!(a.upstream().await.is_none(), "no upstream may be installed");
}

#[tokio::test]
async fn listen_without_user_emits_no_join() {
    let room = LocalRoom::new(Key::from("pin"), alice());
    let mut watcher = room.listen(None).await.unwrap();

    let _quiet = room.listen(None).await.unwrap();

    let event = timeout(Duration::from_millis(300), watcher.recv()).await;
    assert!(event.is_err(), "unexpected event: {event:?}");
}
