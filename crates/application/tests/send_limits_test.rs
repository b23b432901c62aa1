//! 慢速模式与突发锁定集成测试

use std::sync::Arc;

use application::{
    ApplicationError, ChatEngine, DenyReason, EngineDependencies, ManualClock, MemoryStore,
};
use chrono::{Duration, TimeZone, Utc};
use config::AppConfig;
use domain::{MessageType, RoomId, RoomVisibility, UserId};

struct TestRoom {
    engine: ChatEngine,
    clock: Arc<ManualClock>,
    room_id: RoomId,
    owner: UserId,
    member: UserId,
}

impl TestRoom {
    async fn new(slow_mode_seconds: u32) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let engine = ChatEngine::new(EngineDependencies {
            store: Arc::new(MemoryStore::new(clock.clone())),
            clock: clock.clone(),
            config: AppConfig::default(),
        });
        let owner = UserId::parse("alice").unwrap();
        let member = UserId::parse("bob").unwrap();
        let room_id = engine
            .rooms
            .create_room("quiet room", RoomVisibility::Public, &owner)
            .await
            .unwrap();
        engine.membership.join_room(&member, &room_id).await.unwrap();
        if slow_mode_seconds > 0 {
            engine
                .rooms
                .set_slow_mode(&owner, &room_id, slow_mode_seconds)
                .await
                .unwrap();
        }
        Self {
            engine,
            clock,
            room_id,
            owner,
            member,
        }
    }

    async fn send(&self, author: &UserId, content: &str) -> Result<(), ApplicationError> {
        self.engine
            .messages
            .send_room_message(author, &self.room_id, MessageType::Text, content)
            .await
            .map(|_| ())
    }
}

fn rate_limited(result: Result<(), ApplicationError>) -> (u64, DenyReason) {
    match result {
        Err(ApplicationError::RateLimited {
            remaining_seconds,
            reason,
        }) => (remaining_seconds, reason),
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_mode_reports_remaining_cooldown() {
    let room = TestRoom::new(5).await;

    room.send(&room.member, "first").await.unwrap();

    room.clock.advance(Duration::seconds(3));
    let (remaining, reason) = rate_limited(room.send(&room.member, "too soon").await);
    assert_eq!(remaining, 2);
    assert_eq!(reason, DenyReason::Cooldown);

    room.clock.advance(Duration::milliseconds(2_100));
    room.send(&room.member, "second").await.unwrap();
}

#[tokio::test]
async fn slow_mode_is_per_user() {
    let room = TestRoom::new(5).await;

    room.send(&room.member, "hello").await.unwrap();
    room.clock.advance(Duration::seconds(1));
    room.send(&room.owner, "welcome").await.unwrap();
}

#[tokio::test]
async fn third_message_in_burst_window_triggers_lockout() {
    let room = TestRoom::new(0).await;

    room.send(&room.member, "one").await.unwrap();
    room.clock.advance(Duration::milliseconds(500));
    room.send(&room.member, "two").await.unwrap();
    room.clock.advance(Duration::milliseconds(500));
    let (remaining, reason) = rate_limited(room.send(&room.member, "three").await);
    assert_eq!((remaining, reason), (30, DenyReason::Lockout));

    room.clock.advance(Duration::seconds(9));
    let (remaining, reason) = rate_limited(room.send(&room.member, "four").await);
    assert_eq!((remaining, reason), (21, DenyReason::Lockout));

    room.clock.advance(Duration::seconds(21) + Duration::milliseconds(500));
    room.send(&room.member, "five").await.unwrap();

    let history = room
        .engine
        .messages
        .history(&domain::ConversationId::Room(room.room_id.clone()), 10)
        .await
        .unwrap();
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two", "five"]);
}

#[tokio::test]
async fn spaced_messages_never_lock_out() {
    let room = TestRoom::new(0).await;
    for i in 0..6 {
        room.send(&room.member, &format!("msg {i}")).await.unwrap();
        room.clock.advance(Duration::milliseconds(3_100));
    }
}

#[tokio::test]
async fn non_member_cannot_send() {
    let room = TestRoom::new(0).await;
    let stranger = UserId::parse("mallory").unwrap();
    let err = room.send(&stranger, "hi").await.unwrap_err();
    assert!(matches!(err, ApplicationError::PermissionDenied(_)));

    room.engine
        .membership
        .ban_member(&room.owner, &room.room_id, &room.member)
        .await
        .unwrap();
    let err = room.send(&room.member, "hi").await.unwrap_err();
    assert!(matches!(err, ApplicationError::Banned { .. }));
}
