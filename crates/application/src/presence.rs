//! 在线状态跟踪
//!
//! 上线时写入 online 记录并给会话登记“断线写 offline”的用户级结束钩子（同一用户
//! 最后一个会话结束时才生效）；心跳刷新
//! lastSeen；查询时同时要求 state 为 online 且 lastSeen 在时效窗口内，
//! 这样崩溃后钩子没能触发的客户端也会自然过期。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use config::PresenceConfig;
use domain::{PresenceRecord, PresenceState, UserId};
use serde_json::Value;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::session::{HookHandle, SessionId, SessionRegistry};
use crate::store::{paths, server_timestamp, Store, StoreError, StoreExt, WriteBatch};

pub struct PresenceTracker {
    store: Arc<dyn Store>,
    sessions: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
    offline_hooks: Mutex<HashMap<SessionId, HookHandle>>,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionRegistry>,
        clock: Arc<dyn Clock>,
        config: PresenceConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            clock,
            config,
            offline_hooks: Mutex::new(HashMap::new()),
        }
    }

    fn hooks(&self) -> MutexGuard<'_, HashMap<SessionId, HookHandle>> {
        self.offline_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// lastSeen 使用服务端时间戳的记录
    fn record(&self, user_id: &UserId, state: PresenceState) -> Result<Value, ApplicationError> {
        let record = PresenceRecord {
            user_id: user_id.clone(),
            state,
            last_seen: self.clock.now(),
        };
        let mut value = serde_json::to_value(&record)?;
        value["lastSeen"] = server_timestamp();
        Ok(value)
    }

    /// 标记上线，并保证会话结束时写入 offline
    pub async fn mark_online(
        &self,
        session: SessionId,
        user_id: &UserId,
    ) -> Result<(), ApplicationError> {
        let online = self.record(user_id, PresenceState::Online)?;
        self.store.set(&paths::presence(user_id), online).await?;

        if !self.hooks().contains_key(&session) {
            let mut on_disconnect = WriteBatch::new();
            on_disconnect.set(
                paths::presence(user_id),
                self.record(user_id, PresenceState::Offline)?,
            );
            let handle = self.sessions.register_user_hook(session, on_disconnect)?;
            self.hooks().insert(session, handle);
        }

        tracing::info!(%session, user_id = %user_id, "用户上线");
        Ok(())
    }

    /// 心跳：刷新会话存活时间与 lastSeen
    pub async fn heartbeat(
        &self,
        session: SessionId,
        user_id: &UserId,
    ) -> Result<(), ApplicationError> {
        if !self.sessions.touch(session) {
            return Err(ApplicationError::not_found("session", session));
        }
        let mut batch = WriteBatch::new();
        batch
            .set(paths::presence_field(user_id, "userId"), Value::from(user_id.as_str()))
            .set(paths::presence_field(user_id, "state"), Value::from("online"))
            .set(paths::presence_field(user_id, "lastSeen"), server_timestamp());
        self.store.update(batch).await?;
        tracing::trace!(%session, user_id = %user_id, "心跳");
        Ok(())
    }

    /// 主动下线：立即写 offline 并撤销断线钩子
    pub async fn mark_offline(
        &self,
        session: SessionId,
        user_id: &UserId,
    ) -> Result<(), ApplicationError> {
        if let Some(handle) = self.hooks().remove(&session) {
            self.sessions.cancel(&handle);
        }
        if self.sessions.has_other_sessions(user_id, session) {
            tracing::debug!(%session, user_id = %user_id, "其他会话仍在线，保留 online");
            return Ok(());
        }
        let offline = self.record(user_id, PresenceState::Offline)?;
        self.store.set(&paths::presence(user_id), offline).await?;
        tracing::info!(%session, user_id = %user_id, "用户下线");
        Ok(())
    }

    /// 会话已结束，丢弃本地保存的钩子句柄
    pub fn forget_session(&self, session: SessionId) {
        self.hooks().remove(&session);
    }

    pub async fn get(&self, user_id: &UserId) -> Result<Option<PresenceRecord>, ApplicationError> {
        match self.store.get_json::<PresenceRecord>(&paths::presence(user_id)).await {
            Ok(record) => Ok(record),
            Err(StoreError::Serialization(err)) => {
                tracing::warn!(user_id = %user_id, error = %err, "在线状态记录格式错误");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn is_online(&self, user_id: &UserId) -> Result<bool, ApplicationError> {
        self.is_online_within(user_id, self.config.staleness()).await
    }

    pub async fn is_online_within(
        &self,
        user_id: &UserId,
        staleness: Duration,
    ) -> Result<bool, ApplicationError> {
        let now = self.clock.now();
        Ok(self
            .get(user_id)
            .await?
            .is_some_and(|record| record.is_live_at(now, staleness)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        tracker: PresenceTracker,
        sessions: Arc<SessionRegistry>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let sessions = Arc::new(SessionRegistry::new(store.clone(), Arc::new(clock.clone())));
        let tracker = PresenceTracker::new(
            store,
            sessions.clone(),
            Arc::new(clock.clone()),
            PresenceConfig::default(),
        );
        Fixture {
            tracker,
            sessions,
            clock,
        }
    }

    fn alice() -> UserId {
        UserId::parse("alice").unwrap()
    }

    #[tokio::test]
    async fn online_user_goes_offline_when_session_ends() {
        let fx = fixture();
        let session = fx.sessions.open(alice());
        fx.tracker.mark_online(session, &alice()).await.unwrap();
        assert!(fx.tracker.is_online(&alice()).await.unwrap());

        fx.sessions.close(session).await.unwrap();
        let record = fx.tracker.get(&alice()).await.unwrap().unwrap();
        assert_eq!(record.state, PresenceState::Offline);
        assert!(!fx.tracker.is_online(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn stale_online_record_counts_as_offline() {
        let fx = fixture();
        let session = fx.sessions.open(alice());
        fx.tracker.mark_online(session, &alice()).await.unwrap();

        fx.clock.advance(Duration::minutes(4));
        assert!(fx.tracker.is_online(&alice()).await.unwrap());
        fx.clock.advance(Duration::minutes(2));
        assert!(!fx.tracker.is_online(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn heartbeat_refreshes_last_seen() {
        let fx = fixture();
        let session = fx.sessions.open(alice());
        fx.tracker.mark_online(session, &alice()).await.unwrap();

        fx.clock.advance(Duration::minutes(4));
        fx.tracker.heartbeat(session, &alice()).await.unwrap();
        fx.clock.advance(Duration::minutes(4));

        assert!(fx.tracker.is_online(&alice()).await.unwrap());
        assert!(!fx
            .tracker
            .is_online_within(&alice(), Duration::minutes(3))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn clean_sign_off_cancels_disconnect_hook() {
        let fx = fixture();
        let session = fx.sessions.open(alice());
        fx.tracker.mark_online(session, &alice()).await.unwrap();
        assert_eq!(fx.sessions.pending_hooks(session), 1);

        fx.tracker.mark_offline(session, &alice()).await.unwrap();
        assert_eq!(fx.sessions.pending_hooks(session), 0);
        assert!(!fx.tracker.is_online(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn closing_one_of_two_sessions_keeps_user_online() {
        let fx = fixture();
        let laptop = fx.sessions.open(alice());
        let phone = fx.sessions.open(alice());
        fx.tracker.mark_online(laptop, &alice()).await.unwrap();
        fx.tracker.mark_online(phone, &alice()).await.unwrap();

        fx.sessions.close(laptop).await.unwrap();
        assert!(fx.tracker.is_online(&alice()).await.unwrap());

        fx.tracker.mark_offline(phone, &alice()).await.unwrap();
        assert!(!fx.tracker.is_online(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn signing_out_one_tab_keeps_other_tab_online() {
        let fx = fixture();
        let laptop = fx.sessions.open(alice());
        let phone = fx.sessions.open(alice());
        fx.tracker.mark_online(laptop, &alice()).await.unwrap();
        fx.tracker.mark_online(phone, &alice()).await.unwrap();

        fx.tracker.mark_offline(laptop, &alice()).await.unwrap();
        assert!(fx.tracker.is_online(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_user_is_offline() {
        let fx = fixture();
        assert!(!fx.tracker.is_online(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn heartbeat_on_closed_session_fails() {
        let fx = fixture();
        let session = fx.sessions.open(alice());
        fx.sessions.close(session).await.unwrap();
        assert!(fx.tracker.heartbeat(session, &alice()).await.is_err());
    }
}
