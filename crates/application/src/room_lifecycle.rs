//! 房间生命周期
//!
//! 临时房间到期后先标记为 expired（清空成员并追加系统消息），宽限期过后彻底删除。
//! 房主离线超过阈值的房间由弃置扫描关闭。两个后台任务都只依赖存储提交时间，
//! 与是否有客户端在线无关。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use config::RoomConfig;
use domain::{
    ChatEvent, CloseReason, ConversationId, Invite, Message, MessageId, Room, RoomId, RoomMember,
    RoomVisibility, Timestamp, UserId,
};
use serde_json::Value;

use crate::broadcaster::EventBus;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::messaging::{bump_message_count, stage_message};
use crate::presence::PresenceTracker;
use crate::session::{HookHandle, SessionId, SessionRegistry};
use crate::store::{paths, server_timestamp, Store, StoreExt, WriteBatch};

/// 清理任务一次运行的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub expired: Vec<RoomId>,
    pub deleted: Vec<RoomId>,
    pub removed_malformed: usize,
    pub failed: usize,
}

/// 弃置扫描一次运行的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub closed: Vec<RoomId>,
    pub skipped_owner_online: usize,
    pub failed: usize,
}

/// 某个会话上登记的房主断线钩子
struct OwnerBinding {
    owner_id: UserId,
    hooks: HashMap<RoomId, HookHandle>,
}

pub struct RoomLifecycleManager {
    store: Arc<dyn Store>,
    sessions: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    config: RoomConfig,
    bindings: Mutex<HashMap<SessionId, OwnerBinding>>,
}

impl RoomLifecycleManager {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionRegistry>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: RoomConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            clock,
            events,
            config,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    fn bindings(&self) -> MutexGuard<'_, HashMap<SessionId, OwnerBinding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 创建临时房间，房间与房主成员资格在同一批次写入
    pub async fn create_room(
        &self,
        name: &str,
        visibility: RoomVisibility,
        owner_id: &UserId,
    ) -> Result<RoomId, ApplicationError> {
        let now = self.clock.now();
        let room = Room::new_ephemeral(
            RoomId::generate(),
            name,
            owner_id.clone(),
            visibility,
            now,
            self.config.ttl(),
        )?;
        let owner = RoomMember::owner(room.id.clone(), owner_id.clone(), now);

        let mut batch = WriteBatch::new();
        batch
            .set_json(paths::room(&room.id), &room)?
            .set_json(paths::member(&room.id, owner_id), &owner)?;
        self.store.update(batch).await?;

        tracing::info!(
            room_id = %room.id,
            owner_id = %owner_id,
            expires_at = ?room.expires_at,
            "临时房间已创建"
        );
        Ok(room.id)
    }

    /// 创建官方房间（特权操作）：无房主，永不过期
    pub async fn create_official_room(
        &self,
        name: &str,
        visibility: RoomVisibility,
    ) -> Result<RoomId, ApplicationError> {
        let room = Room::new_official(RoomId::generate(), name, visibility, self.clock.now())?;
        self.store.set_json(&paths::room(&room.id), &room).await?;
        tracing::info!(room_id = %room.id, "官方房间已创建");
        Ok(room.id)
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, ApplicationError> {
        let Some(value) = self.store.get(&paths::room(room_id)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_value(value).ok())
    }

    /// 所有格式正确的房间
    pub async fn list_rooms(&self) -> Result<Vec<Room>, ApplicationError> {
        let (rooms, _) = self.load_rooms().await?;
        Ok(rooms)
    }

    /// 读取全部房间，同时返回无法解析的房间键
    async fn load_rooms(&self) -> Result<(Vec<Room>, Vec<String>), ApplicationError> {
        let Some(Value::Object(map)) = self.store.get(&paths::rooms()).await? else {
            return Ok((Vec::new(), Vec::new()));
        };
        let mut rooms = Vec::with_capacity(map.len());
        let mut malformed = Vec::new();
        for (key, value) in map {
            match serde_json::from_value::<Room>(value) {
                Ok(room) => rooms.push(room),
                Err(_) => malformed.push(key),
            }
        }
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok((rooms, malformed))
    }

    pub async fn set_slow_mode(
        &self,
        actor_id: &UserId,
        room_id: &RoomId,
        seconds: u32,
    ) -> Result<(), ApplicationError> {
        let room = self
            .get_room(room_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("room", room_id))?;
        if !room.is_owned_by(actor_id) {
            return Err(ApplicationError::permission_denied(format!(
                "change slow mode of room {room_id}"
            )));
        }
        self.apply_slow_mode(room_id, seconds).await?;
        tracing::info!(room_id = %room_id, seconds, "慢速模式已更新");
        Ok(())
    }

    /// 房间可能在权限检查之后被删除，事务里复核，不写出残缺文档
    async fn apply_slow_mode(
        &self,
        room_id: &RoomId,
        seconds: u32,
    ) -> Result<(), ApplicationError> {
        self.store
            .transact(&paths::room(room_id), |room: &mut Option<Room>| {
                room.as_mut()?.set_slow_mode(seconds);
                Some(())
            })
            .await?
            .ok_or_else(|| ApplicationError::not_found("room", room_id))
    }

    async fn owned_active_rooms(&self, owner_id: &UserId) -> Result<Vec<Room>, ApplicationError> {
        let (rooms, _) = self.load_rooms().await?;
        Ok(rooms
            .into_iter()
            .filter(|room| !room.is_official() && room.is_active() && room.is_owned_by(owner_id))
            .collect())
    }

    /// 房主上线或房间集合变化时调用：清除离线标记，并为每个房间登记断线钩子。
    /// 钩子是用户级的，只在房主最后一个会话结束时写入 ownerOfflineSince。
    pub async fn bind_owner_presence(
        &self,
        session: SessionId,
        owner_id: &UserId,
    ) -> Result<usize, ApplicationError> {
        let rooms = self.owned_active_rooms(owner_id).await?;

        let mut clear = WriteBatch::new();
        for room in rooms.iter().filter(|room| room.owner_offline_since.is_some()) {
            clear.remove(paths::room_field(&room.id, "ownerOfflineSince"));
        }
        if !clear.is_empty() {
            self.store.update(clear).await?;
        }

        let owned: HashSet<&RoomId> = rooms.iter().map(|room| &room.id).collect();
        let mut bindings = self.bindings();
        let binding = bindings.entry(session).or_insert_with(|| OwnerBinding {
            owner_id: owner_id.clone(),
            hooks: HashMap::new(),
        });
        if &binding.owner_id != owner_id {
            for handle in binding.hooks.values() {
                self.sessions.cancel(handle);
            }
            binding.hooks.clear();
            binding.owner_id = owner_id.clone();
        }

        binding.hooks.retain(|room_id, handle| {
            if owned.contains(room_id) {
                true
            } else {
                self.sessions.cancel(handle);
                false
            }
        });

        for room in &rooms {
            if binding.hooks.contains_key(&room.id) {
                continue;
            }
            let mut on_disconnect = WriteBatch::new();
            on_disconnect.set(
                paths::room_field(&room.id, "ownerOfflineSince"),
                server_timestamp(),
            );
            let handle = self.sessions.register_user_hook(session, on_disconnect)?;
            binding.hooks.insert(room.id.clone(), handle);
        }

        tracing::debug!(%session, owner_id = %owner_id, rooms = rooms.len(), "房主在线状态已绑定");
        Ok(rooms.len())
    }

    /// 撤销会话上的全部房主钩子
    pub fn unbind_owner_presence(&self, session: SessionId) -> usize {
        let Some(binding) = self.bindings().remove(&session) else {
            return 0;
        };
        binding
            .hooks
            .values()
            .filter(|handle| self.sessions.cancel(handle))
            .count()
    }

    /// 会话已结束（钩子已提交），只丢弃本地句柄
    pub fn forget_session(&self, session: SessionId) {
        self.bindings().remove(&session);
    }

    fn cancel_room_hooks(&self, room_id: &RoomId) {
        for binding in self.bindings().values_mut() {
            if let Some(handle) = binding.hooks.remove(room_id) {
                self.sessions.cancel(&handle);
            }
        }
    }

    /// 标记到期房间为 expired，删除宽限期已过的房间
    pub async fn reap_expired(&self) -> Result<ReapReport, ApplicationError> {
        let now = self.clock.now();
        let grace = self.config.grace();
        let (rooms, malformed) = self.load_rooms().await?;
        let mut report = ReapReport::default();

        for key in malformed {
            match self.store.remove(&format!("{}/{key}", paths::ROOMS)).await {
                Ok(()) => {
                    tracing::warn!(room_key = %key, "已删除格式错误的房间文档");
                    report.removed_malformed += 1;
                }
                Err(err) => {
                    tracing::warn!(room_key = %key, error = %err, "删除格式错误的房间文档失败");
                    report.failed += 1;
                }
            }
        }

        for room in rooms {
            if room.is_official() {
                continue;
            }
            if room.should_expire(now) {
                match self.expire_room(&room.id, now).await {
                    Ok(true) => report.expired.push(room.id),
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(room_id = %room.id, error = ?err, "房间过期处理失败");
                        report.failed += 1;
                    }
                }
            } else if room.should_purge(now, grace) {
                match self.delete_room(&room.id).await {
                    Ok(()) => report.deleted.push(room.id),
                    Err(err) => {
                        tracing::warn!(room_id = %room.id, error = ?err, "房间删除失败");
                        report.failed += 1;
                    }
                }
            }
        }

        if !report.expired.is_empty() || !report.deleted.is_empty() {
            tracing::info!(
                expired = report.expired.len(),
                deleted = report.deleted.len(),
                failed = report.failed,
                "房间清理完成"
            );
        }
        Ok(report)
    }

    /// 过期：状态、成员清空与系统消息在同一批次提交
    async fn expire_room(&self, room_id: &RoomId, now: Timestamp) -> Result<bool, ApplicationError> {
        let Some(room) = self.get_room(room_id).await? else {
            return Ok(false);
        };
        if !room.should_expire(now) {
            return Ok(false);
        }

        let conversation = ConversationId::Room(room_id.clone());
        let members = self.member_ids(room_id).await?;
        let notice = Message::system(
            MessageId::generate(),
            conversation.clone(),
            format!("Room \"{}\" has expired.", room.name),
            now,
        );

        let mut batch = WriteBatch::new();
        batch
            .set(paths::room_field(room_id, "status"), Value::from("expired"))
            .set(paths::room_field(room_id, "expiredAt"), server_timestamp())
            .remove(paths::members(room_id));
        for member in &members {
            batch.remove(paths::cursor(member, &conversation));
        }
        stage_message(&mut batch, &notice)?;
        self.store.update(batch).await?;
        if let Err(err) = bump_message_count(self.store.as_ref(), &conversation).await {
            tracing::warn!(room_id = %room_id, error = %err, "消息计数更新失败");
        }

        self.cancel_room_hooks(room_id);
        self.events.publish(ChatEvent::RoomClosed {
            room_id: room_id.clone(),
            members,
            reason: CloseReason::Expired,
        });
        tracing::info!(room_id = %room_id, "房间已过期");
        Ok(true)
    }

    async fn member_ids(&self, room_id: &RoomId) -> Result<Vec<UserId>, ApplicationError> {
        Ok(self
            .store
            .child_keys(&paths::members(room_id))
            .await?
            .into_iter()
            .filter_map(|key| UserId::parse(key).ok())
            .collect())
    }

    /// 彻底删除房间及其全部数据，可重复调用
    pub async fn delete_room(&self, room_id: &RoomId) -> Result<(), ApplicationError> {
        let conversation = ConversationId::Room(room_id.clone());
        let members = self.member_ids(room_id).await?;
        let invites = self
            .store
            .children::<Invite>(&paths::invites(room_id))
            .await?;

        let mut batch = WriteBatch::new();
        batch
            .remove(paths::room(room_id))
            .remove(paths::members(room_id))
            .remove(paths::bans(room_id))
            .remove(paths::invites(room_id))
            .remove(paths::messages(&conversation))
            .remove(paths::conversation(&conversation))
            .remove(paths::last_send_for(&conversation));
        for member in &members {
            batch.remove(paths::cursor(member, &conversation));
        }
        for (_, invite) in &invites {
            batch.remove(paths::inbox_item(&invite.target_user_id, &invite.inbox_item_id));
        }
        self.store.update(batch).await?;

        self.cancel_room_hooks(room_id);
        tracing::info!(room_id = %room_id, "房间已删除");
        Ok(())
    }

    /// 关闭房主离线超过阈值的房间（特权操作）
    pub async fn auto_close_abandoned(
        &self,
        presence: &PresenceTracker,
    ) -> Result<SweepReport, ApplicationError> {
        let now = self.clock.now();
        let threshold = self.config.abandon_threshold();
        let (rooms, _) = self.load_rooms().await?;
        let mut report = SweepReport::default();

        for candidate in rooms
            .iter()
            .filter(|room| room.is_abandoned(now, threshold))
        {
            match self.close_if_abandoned(&candidate.id, presence).await {
                Ok(CloseOutcome::Closed) => report.closed.push(candidate.id.clone()),
                Ok(CloseOutcome::OwnerOnline) => report.skipped_owner_online += 1,
                Ok(CloseOutcome::NoLongerAbandoned) => {}
                Err(err) => {
                    tracing::warn!(room_id = %candidate.id, error = ?err, "关闭弃置房间失败");
                    report.failed += 1;
                }
            }
        }

        if !report.closed.is_empty() {
            tracing::info!(closed = report.closed.len(), "弃置房间扫描完成");
        }
        Ok(report)
    }

    async fn close_if_abandoned(
        &self,
        room_id: &RoomId,
        presence: &PresenceTracker,
    ) -> Result<CloseOutcome, ApplicationError> {
        // 删除前重新读取最新状态
        let now = self.clock.now();
        let Some(room) = self.get_room(room_id).await? else {
            return Ok(CloseOutcome::NoLongerAbandoned);
        };
        if !room.is_abandoned(now, self.config.abandon_threshold()) {
            return Ok(CloseOutcome::NoLongerAbandoned);
        }
        let Some(owner_id) = room.owner_id.as_ref() else {
            return Ok(CloseOutcome::NoLongerAbandoned);
        };
        if presence.is_online(owner_id).await? {
            tracing::debug!(room_id = %room_id, owner_id = %owner_id, "房主在线，跳过关闭");
            return Ok(CloseOutcome::OwnerOnline);
        }

        let conversation = ConversationId::Room(room_id.clone());
        let members = self.member_ids(room_id).await?;
        let notice = Message::system(
            MessageId::generate(),
            conversation,
            format!("Room \"{}\" was closed because its owner left.", room.name),
            now,
        );
        let mut batch = WriteBatch::new();
        stage_message(&mut batch, &notice)?;
        self.store.update(batch).await?;

        self.events.publish(ChatEvent::RoomClosed {
            room_id: room_id.clone(),
            members,
            reason: CloseReason::OwnerAbandoned,
        });
        self.delete_room(room_id).await?;
        tracing::info!(room_id = %room_id, owner_id = %owner_id, "弃置房间已关闭");
        Ok(CloseOutcome::Closed)
    }
}

enum CloseOutcome {
    Closed,
    OwnerOnline,
    NoLongerAbandoned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use config::PresenceConfig;
    use domain::InboxItem;

    struct Fixture {
        rooms: RoomLifecycleManager,
        presence: PresenceTracker,
        sessions: Arc<SessionRegistry>,
        store: Arc<MemoryStore>,
        clock: ManualClock,
        events: EventBus,
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new(clock_arc.clone()));
        let sessions = Arc::new(SessionRegistry::new(store.clone(), clock_arc.clone()));
        let events = EventBus::new(64);
        let rooms = RoomLifecycleManager::new(
            store.clone(),
            sessions.clone(),
            clock_arc.clone(),
            events.clone(),
            RoomConfig::default(),
        );
        let presence = PresenceTracker::new(
            store.clone(),
            sessions.clone(),
            clock_arc,
            PresenceConfig::default(),
        );
        Fixture {
            rooms,
            presence,
            sessions,
            store,
            clock,
            events,
        }
    }

    #[tokio::test]
    async fn create_room_writes_room_and_owner_membership() {
        let fx = fixture();
        let room_id = fx
            .rooms
            .create_room("late night", RoomVisibility::Public, &user("alice"))
            .await
            .unwrap();

        let room = fx.rooms.get_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.expires_at, Some(fx.clock.now() + Duration::hours(8)));
        let owner: RoomMember = fx
            .store
            .get_json(&paths::member(&room_id, &user("alice")))
            .await
            .unwrap()
            .unwrap();
        assert!(owner.is_owner());
    }

    #[tokio::test]
    async fn expired_room_is_marked_then_purged_after_grace() {
        let fx = fixture();
        let room_id = fx
            .rooms
            .create_room("late night", RoomVisibility::Public, &user("alice"))
            .await
            .unwrap();
        let mut closed = fx.events.subscribe();

        fx.clock.advance(Duration::hours(8) + Duration::seconds(1));
        let report = fx.rooms.reap_expired().await.unwrap();
        assert_eq!(report.expired, vec![room_id.clone()]);

        let room = fx.rooms.get_room(&room_id).await.unwrap().unwrap();
        assert!(!room.is_active());
        assert_eq!(fx.store.get(&paths::members(&room_id)).await.unwrap(), None);
        assert!(matches!(
            closed.recv().await,
            Some(ChatEvent::RoomClosed { reason: CloseReason::Expired, .. })
        ));

        // 再次运行不会重复过期
        assert!(fx.rooms.reap_expired().await.unwrap().expired.is_empty());

        fx.clock.advance(Duration::minutes(10));
        let report = fx.rooms.reap_expired().await.unwrap();
        assert_eq!(report.deleted, vec![room_id.clone()]);
        assert_eq!(fx.rooms.get_room(&room_id).await.unwrap(), None);
        assert_eq!(
            fx.store
                .get(&paths::messages(&ConversationId::Room(room_id)))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn official_rooms_are_never_reaped() {
        let fx = fixture();
        let room_id = fx
            .rooms
            .create_official_room("Lobby", RoomVisibility::Public)
            .await
            .unwrap();
        fx.clock.advance(Duration::days(30));

        let report = fx.rooms.reap_expired().await.unwrap();
        assert_eq!(report, ReapReport::default());
        assert!(fx.rooms.get_room(&room_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reaper_removes_malformed_room_stubs() {
        let fx = fixture();
        fx.store
            .set("rooms/ghost/ownerOfflineSince", Value::from(1))
            .await
            .unwrap();

        let report = fx.rooms.reap_expired().await.unwrap();
        assert_eq!(report.removed_malformed, 1);
        assert_eq!(fx.store.get("rooms").await.unwrap(), None);
    }

    #[tokio::test]
    async fn owner_disconnect_marks_room_and_reconnect_clears_it() {
        let fx = fixture();
        let alice = user("alice");
        let room_id = fx
            .rooms
            .create_room("late night", RoomVisibility::Public, &alice)
            .await
            .unwrap();

        let session = fx.sessions.open(alice.clone());
        assert_eq!(fx.rooms.bind_owner_presence(session, &alice).await.unwrap(), 1);
        fx.sessions.close(session).await.unwrap();
        fx.rooms.forget_session(session);

        let room = fx.rooms.get_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.owner_offline_since, Some(fx.clock.now()));

        let session = fx.sessions.open(alice.clone());
        fx.rooms.bind_owner_presence(session, &alice).await.unwrap();
        let room = fx.rooms.get_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.owner_offline_since, None);
    }

    #[tokio::test]
    async fn rebinding_keeps_one_hook_per_room() {
        let fx = fixture();
        let alice = user("alice");
        fx.rooms
            .create_room("a", RoomVisibility::Public, &alice)
            .await
            .unwrap();
        let session = fx.sessions.open(alice.clone());

        fx.rooms.bind_owner_presence(session, &alice).await.unwrap();
        fx.rooms.bind_owner_presence(session, &alice).await.unwrap();
        assert_eq!(fx.sessions.pending_hooks(session), 1);

        fx.rooms
            .create_room("b", RoomVisibility::Public, &alice)
            .await
            .unwrap();
        fx.rooms.bind_owner_presence(session, &alice).await.unwrap();
        assert_eq!(fx.sessions.pending_hooks(session), 2);

        assert_eq!(fx.rooms.unbind_owner_presence(session), 2);
        assert_eq!(fx.sessions.pending_hooks(session), 0);
    }

    #[tokio::test]
    async fn abandoned_room_is_closed_only_when_owner_still_offline() {
        let fx = fixture();
        let alice = user("alice");
        let room_id = fx
            .rooms
            .create_room("late night", RoomVisibility::Public, &alice)
            .await
            .unwrap();
        fx.store
            .set(
                &paths::room_field(&room_id, "ownerOfflineSince"),
                Value::from(fx.clock.now().timestamp_millis()),
            )
            .await
            .unwrap();
        fx.clock.advance(Duration::minutes(61));

        // 标记残留但房主其实在线
        let session = fx.sessions.open(alice.clone());
        fx.presence.mark_online(session, &alice).await.unwrap();
        let report = fx.rooms.auto_close_abandoned(&fx.presence).await.unwrap();
        assert_eq!(report.skipped_owner_online, 1);
        assert!(fx.rooms.get_room(&room_id).await.unwrap().is_some());

        fx.presence.mark_offline(session, &alice).await.unwrap();
        let mut events = fx.events.subscribe();
        let report = fx.rooms.auto_close_abandoned(&fx.presence).await.unwrap();
        assert_eq!(report.closed, vec![room_id.clone()]);
        assert_eq!(fx.rooms.get_room(&room_id).await.unwrap(), None);
        match events.recv().await {
            Some(ChatEvent::RoomClosed { members, reason, .. }) => {
                assert_eq!(members, vec![alice]);
                assert_eq!(reason, CloseReason::OwnerAbandoned);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_mode_is_owner_only() {
        let fx = fixture();
        let room_id = fx
            .rooms
            .create_room("late night", RoomVisibility::Public, &user("alice"))
            .await
            .unwrap();

        assert!(matches!(
            fx.rooms.set_slow_mode(&user("bob"), &room_id, 5).await,
            Err(ApplicationError::PermissionDenied(_))
        ));
        fx.rooms.set_slow_mode(&user("alice"), &room_id, 5).await.unwrap();
        let room = fx.rooms.get_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.slow_mode_seconds, 5);
    }

    #[tokio::test]
    async fn slow_mode_on_deleted_room_leaves_no_stub() {
        let fx = fixture();
        let room_id = fx
            .rooms
            .create_room("late night", RoomVisibility::Public, &user("alice"))
            .await
            .unwrap();
        fx.rooms.delete_room(&room_id).await.unwrap();

        assert!(matches!(
            fx.rooms.apply_slow_mode(&room_id, 5).await,
            Err(ApplicationError::NotFound { .. })
        ));
        assert!(matches!(
            fx.rooms.set_slow_mode(&user("alice"), &room_id, 5).await,
            Err(ApplicationError::NotFound { .. })
        ));
        assert!(!fx.store.exists(&paths::room(&room_id)).await.unwrap());
    }

    #[tokio::test]
    async fn delete_room_is_idempotent_and_removes_invite_items() {
        let fx = fixture();
        let alice = user("alice");
        let room_id = fx
            .rooms
            .create_room("late night", RoomVisibility::Private, &alice)
            .await
            .unwrap();
        let invite = Invite::new(room_id.clone(), user("bob"), alice.clone(), fx.clock.now());
        let item = InboxItem::from_invite(&invite, "late night");
        let mut batch = WriteBatch::new();
        batch
            .set_json(paths::invite(&room_id, &user("bob")), &invite)
            .unwrap()
            .set_json(paths::inbox_item(&user("bob"), &item.id), &item)
            .unwrap();
        fx.store.update(batch).await.unwrap();

        fx.rooms.delete_room(&room_id).await.unwrap();
        fx.rooms.delete_room(&room_id).await.unwrap();
        assert_eq!(fx.store.snapshot(), Value::Null);
    }
}
