//! 房间生命周期集成测试
//!
//! 过期、宽限期删除、房主离线自动关闭，全部使用手动时钟驱动

use std::sync::Arc;

use application::store::paths;
use application::{ChatEngine, Clock, EngineDependencies, ManualClock, MemoryStore, StoreExt};
use chrono::{Duration, TimeZone, Utc};
use config::AppConfig;
use domain::{
    ChatEvent, CloseReason, ConversationId, MessageType, Room, RoomStatus, RoomVisibility, UserId,
};

struct TestEngine {
    engine: ChatEngine,
    clock: Arc<ManualClock>,
}

impl TestEngine {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap(),
        ));
        let engine = ChatEngine::new(EngineDependencies {
            store: Arc::new(MemoryStore::new(clock.clone())),
            clock: clock.clone(),
            config: AppConfig::default(),
        });
        Self { engine, clock }
    }
}

fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

#[tokio::test]
async fn ephemeral_room_expires_then_is_purged_after_grace() {
    let t = TestEngine::new();
    let alice = user("alice");
    let bob = user("bob");

    let room_id = t
        .engine
        .rooms
        .create_room("after hours", RoomVisibility::Public, &alice)
        .await
        .unwrap();
    t.engine.membership.join_room(&bob, &room_id).await.unwrap();
    t.engine
        .messages
        .send_room_message(&bob, &room_id, MessageType::Text, "hi")
        .await
        .unwrap();
    let mut closed = t.engine.events.subscribe_room(room_id.clone());

    // 到期前一秒不动
    t.clock.advance(Duration::hours(8) - Duration::seconds(1));
    let report = t.engine.rooms.reap_expired().await.unwrap();
    assert!(report.expired.is_empty());

    t.clock.advance(Duration::seconds(2));
    let report = t.engine.rooms.reap_expired().await.unwrap();
    assert_eq!(report.expired, vec![room_id.clone()]);

    let room = t.engine.rooms.get_room(&room_id).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Expired);
    assert!(t.engine.membership.members(&room_id).await.unwrap().is_empty());
    let history = t
        .engine
        .messages
        .history(&ConversationId::Room(room_id.clone()), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.last().unwrap().is_system());

    let event = closed.recv().await.unwrap();
    assert!(matches!(
        event,
        ChatEvent::RoomClosed { reason: CloseReason::Expired, .. }
    ));

    // 过期后不能再发言
    let err = t
        .engine
        .messages
        .send_room_message(&alice, &room_id, MessageType::Text, "still here?")
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "This room no longer exists.");

    t.clock.advance(Duration::minutes(10));
    let report = t.engine.rooms.reap_expired().await.unwrap();
    assert_eq!(report.deleted, vec![room_id.clone()]);
    assert!(t.engine.rooms.get_room(&room_id).await.unwrap().is_none());
    assert!(t
        .engine
        .messages
        .history(&ConversationId::Room(room_id.clone()), 10)
        .await
        .unwrap()
        .is_empty());
    assert!(t
        .engine
        .store
        .get(&paths::cursor(&bob, &ConversationId::Room(room_id)))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn official_rooms_survive_every_sweep() {
    let t = TestEngine::new();
    let lobby = t
        .engine
        .rooms
        .create_official_room("Lobby", RoomVisibility::Public)
        .await
        .unwrap();

    t.clock.advance(Duration::days(30));
    let report = t.engine.rooms.reap_expired().await.unwrap();
    assert!(report.expired.is_empty() && report.deleted.is_empty());
    let sweep = t
        .engine
        .rooms
        .auto_close_abandoned(&t.engine.presence)
        .await
        .unwrap();
    assert!(sweep.closed.is_empty());
    assert!(t.engine.rooms.get_room(&lobby).await.unwrap().is_some());
}

#[tokio::test]
async fn owner_reconnect_within_threshold_keeps_room_open() {
    let t = TestEngine::new();
    let alice = user("alice");
    let session = t.engine.connect(&alice).await.unwrap();
    let room_id = t
        .engine
        .create_room(session, "night shift", RoomVisibility::Public)
        .await
        .unwrap();

    t.engine.end_session(session).await.unwrap();
    let room: Room = t
        .engine
        .store
        .get_json(&paths::room(&room_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(room.owner_offline_since, Some(t.clock.now()));

    t.clock.advance(Duration::minutes(30));
    let session = t.engine.connect(&alice).await.unwrap();
    let room = t.engine.rooms.get_room(&room_id).await.unwrap().unwrap();
    assert!(room.owner_offline_since.is_none());

    t.clock.advance(Duration::minutes(31));
    let sweep = t
        .engine
        .rooms
        .auto_close_abandoned(&t.engine.presence)
        .await
        .unwrap();
    assert!(sweep.closed.is_empty());
    assert!(t.engine.rooms.get_room(&room_id).await.unwrap().is_some());

    t.engine.end_session(session).await.unwrap();
}

#[tokio::test]
async fn abandoned_room_is_closed_after_threshold() {
    let t = TestEngine::new();
    let alice = user("alice");
    let session = t.engine.connect(&alice).await.unwrap();
    let room_id = t
        .engine
        .create_room(session, "night shift", RoomVisibility::Public)
        .await
        .unwrap();
    let mut events = t.engine.events.subscribe_room(room_id.clone());
    t.engine.end_session(session).await.unwrap();

    t.clock.advance(Duration::minutes(59));
    let sweep = t
        .engine
        .rooms
        .auto_close_abandoned(&t.engine.presence)
        .await
        .unwrap();
    assert!(sweep.closed.is_empty());

    t.clock.advance(Duration::minutes(2));
    let sweep = t
        .engine
        .rooms
        .auto_close_abandoned(&t.engine.presence)
        .await
        .unwrap();
    assert_eq!(sweep.closed, vec![room_id.clone()]);
    assert!(t.engine.rooms.get_room(&room_id).await.unwrap().is_none());

    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        ChatEvent::RoomClosed { reason: CloseReason::OwnerAbandoned, .. }
    ));
}
