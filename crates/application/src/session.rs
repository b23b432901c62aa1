//! 会话注册表
//!
//! 每个客户端连接对应一个会话。组件可以给会话登记“结束钩子”：一组在会话结束时
//! 原子提交的写入（断线写离线、房主断线写 ownerOfflineSince 等）。钩子保存在
//! 注册表自己的槽位里，返回的 [`HookHandle`] 带代际号，取消过期句柄是安全的空操作。
//! 会话既可以显式关闭，也会在超过存活超时后被后台任务关闭。
//!
//! 用户级钩子（[`HookScope::LastUserSession`]）只在该用户最后一个会话结束时提交，
//! 同一用户多个标签页时，关闭其中一个不会把用户写成离线。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use domain::{Timestamp, UserId};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::store::{Store, WriteBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// 结束钩子句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle {
    session: SessionId,
    slot: usize,
    generation: u64,
}

impl HookHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// 钩子的提交条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookScope {
    /// 会话结束即提交
    Session,
    /// 同一用户没有其他打开的会话时才提交
    LastUserSession,
}

struct HookSlot {
    generation: u64,
    scope: HookScope,
    writes: Option<WriteBatch>,
}

struct SessionEntry {
    user_id: UserId,
    last_seen: Timestamp,
    slots: Vec<HookSlot>,
    free: Vec<usize>,
}

impl SessionEntry {
    fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.writes.is_some()).count()
    }

    /// 取出全部钩子；用户仍有其他会话时丢弃用户级钩子
    fn drain_hooks(&mut self, user_still_connected: bool) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for slot in &mut self.slots {
            let Some(writes) = slot.writes.take() else {
                continue;
            };
            if user_still_connected && slot.scope == HookScope::LastUserSession {
                continue;
            }
            batch.extend(writes);
        }
        batch
    }
}

pub struct SessionRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self, user_id: UserId) -> SessionId {
        let session = SessionId::new();
        let entry = SessionEntry {
            user_id: user_id.clone(),
            last_seen: self.clock.now(),
            slots: Vec::new(),
            free: Vec::new(),
        };
        self.sessions().insert(session, entry);
        tracing::debug!(%session, user_id = %user_id, "会话已打开");
        session
    }

    /// 刷新存活时间；会话不存在时返回 false
    pub fn touch(&self, session: SessionId) -> bool {
        let now = self.clock.now();
        match self.sessions().get_mut(&session) {
            Some(entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn user_of(&self, session: SessionId) -> Option<UserId> {
        self.sessions().get(&session).map(|entry| entry.user_id.clone())
    }

    pub fn is_open(&self, session: SessionId) -> bool {
        self.sessions().contains_key(&session)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// 用户当前打开的全部会话
    pub fn sessions_of(&self, user_id: &UserId) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self
            .sessions()
            .iter()
            .filter(|(_, entry)| &entry.user_id == user_id)
            .map(|(session, _)| *session)
            .collect();
        sessions.sort();
        sessions
    }

    /// 除 `except` 外用户是否还有打开的会话
    pub fn has_other_sessions(&self, user_id: &UserId, except: SessionId) -> bool {
        self.sessions()
            .iter()
            .any(|(session, entry)| *session != except && &entry.user_id == user_id)
    }

    pub fn pending_hooks(&self, session: SessionId) -> usize {
        self.sessions()
            .get(&session)
            .map(SessionEntry::pending)
            .unwrap_or(0)
    }

    /// 登记一组在会话结束时提交的写入
    pub fn register_hook(
        &self,
        session: SessionId,
        writes: WriteBatch,
    ) -> Result<HookHandle, ApplicationError> {
        self.insert_hook(session, writes, HookScope::Session)
    }

    /// 登记用户级钩子：只有该用户最后一个会话结束时才提交
    pub fn register_user_hook(
        &self,
        session: SessionId,
        writes: WriteBatch,
    ) -> Result<HookHandle, ApplicationError> {
        self.insert_hook(session, writes, HookScope::LastUserSession)
    }

    fn insert_hook(
        &self,
        session: SessionId,
        writes: WriteBatch,
        scope: HookScope,
    ) -> Result<HookHandle, ApplicationError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions();
        let entry = sessions
            .get_mut(&session)
            .ok_or_else(|| ApplicationError::not_found("session", session))?;

        let slot = match entry.free.pop() {
            Some(index) => {
                entry.slots[index] = HookSlot {
                    generation,
                    scope,
                    writes: Some(writes),
                };
                index
            }
            None => {
                entry.slots.push(HookSlot {
                    generation,
                    scope,
                    writes: Some(writes),
                });
                entry.slots.len() - 1
            }
        };

        Ok(HookHandle {
            session,
            slot,
            generation,
        })
    }

    /// 取消钩子；句柄已失效（会话已结束或已取消）时返回 false
    pub fn cancel(&self, handle: &HookHandle) -> bool {
        let mut sessions = self.sessions();
        let Some(entry) = sessions.get_mut(&handle.session) else {
            return false;
        };
        let Some(slot) = entry.slots.get_mut(handle.slot) else {
            return false;
        };
        if slot.generation != handle.generation || slot.writes.is_none() {
            return false;
        }
        slot.writes = None;
        entry.free.push(handle.slot);
        true
    }

    /// 结束会话并把所有未取消的钩子作为一个批次提交，返回提交的写入条数
    pub async fn close(&self, session: SessionId) -> Result<usize, ApplicationError> {
        // 移除与判断同一用户的其他会话在同一把锁内完成
        let (mut entry, user_still_connected) = {
            let mut sessions = self.sessions();
            let Some(entry) = sessions.remove(&session) else {
                return Ok(0);
            };
            let others = sessions
                .values()
                .any(|other| other.user_id == entry.user_id);
            (entry, others)
        };
        let batch = entry.drain_hooks(user_still_connected);
        let writes = batch.len();
        if let Err(err) = self.store.update(batch.clone()).await {
            tracing::error!(
                %session,
                user_id = %entry.user_id,
                error = %err,
                "会话结束钩子提交失败，保留会话等待重试"
            );
            // 放回注册表，存活检查会再次尝试
            let mut restored = SessionEntry {
                user_id: entry.user_id,
                last_seen: entry.last_seen,
                slots: Vec::new(),
                free: Vec::new(),
            };
            restored.slots.push(HookSlot {
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                scope: HookScope::Session,
                writes: Some(batch),
            });
            self.sessions().insert(session, restored);
            return Err(err.into());
        }

        tracing::info!(%session, user_id = %entry.user_id, writes, "会话已结束");
        Ok(writes)
    }

    /// 关闭所有超过 `timeout` 未 touch 的会话
    pub async fn expire_stale(
        &self,
        timeout: Duration,
    ) -> Result<Vec<SessionId>, ApplicationError> {
        let cutoff = self.clock.now() - timeout;
        let stale: Vec<SessionId> = self
            .sessions()
            .iter()
            .filter(|(_, entry)| entry.last_seen < cutoff)
            .map(|(session, _)| *session)
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        let mut last_error = None;
        for session in stale {
            match self.close(session).await {
                Ok(_) => closed.push(session),
                Err(err) => last_error = Some(err),
            }
        }
        if !closed.is_empty() {
            tracing::info!(closed = closed.len(), "已关闭超时会话");
        }
        match last_error {
            Some(err) if closed.is_empty() => Err(err),
            _ => Ok(closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn registry() -> (SessionRegistry, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let registry = SessionRegistry::new(store.clone(), Arc::new(clock.clone()));
        (registry, store, clock)
    }

    fn alice() -> UserId {
        UserId::parse("alice").unwrap()
    }

    fn hook(path: &str) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.set(path, json!(true));
        batch
    }

    #[tokio::test]
    async fn close_applies_registered_hooks_once() {
        let (registry, store, _) = registry();
        let session = registry.open(alice());
        registry.register_hook(session, hook("a/flag")).unwrap();
        registry.register_hook(session, hook("b/flag")).unwrap();

        assert_eq!(registry.close(session).await.unwrap(), 2);
        assert_eq!(store.get("a/flag").await.unwrap(), Some(json!(true)));
        assert_eq!(store.get("b/flag").await.unwrap(), Some(json!(true)));

        assert_eq!(registry.close(session).await.unwrap(), 0);
        assert!(!registry.is_open(session));
    }

    #[tokio::test]
    async fn cancelled_hooks_do_not_fire() {
        let (registry, store, _) = registry();
        let session = registry.open(alice());
        let handle = registry.register_hook(session, hook("a/flag")).unwrap();

        assert!(registry.cancel(&handle));
        assert!(!registry.cancel(&handle));
        assert_eq!(registry.pending_hooks(session), 0);

        registry.close(session).await.unwrap();
        assert_eq!(store.get("a/flag").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_handle_cannot_cancel_reused_slot() {
        let (registry, _, _) = registry();
        let session = registry.open(alice());
        let old = registry.register_hook(session, hook("a/flag")).unwrap();
        registry.cancel(&old);
        let _new = registry.register_hook(session, hook("b/flag")).unwrap();

        assert!(!registry.cancel(&old));
        assert_eq!(registry.pending_hooks(session), 1);
    }

    #[tokio::test]
    async fn register_on_unknown_session_fails() {
        let (registry, _, _) = registry();
        let result = registry.register_hook(SessionId::new(), hook("a/flag"));
        assert!(matches!(result, Err(ApplicationError::NotFound { resource: "session", .. })));
    }

    #[tokio::test]
    async fn stale_sessions_expire_but_touched_ones_survive() {
        let (registry, store, clock) = registry();
        let idle = registry.open(alice());
        let active = registry.open(UserId::parse("bob").unwrap());
        registry.register_hook(idle, hook("idle/flag")).unwrap();

        clock.advance(Duration::seconds(60));
        registry.touch(active);
        clock.advance(Duration::seconds(40));

        let closed = registry.expire_stale(Duration::seconds(90)).await.unwrap();
        assert_eq!(closed, vec![idle]);
        assert!(registry.is_open(active));
        assert_eq!(store.get("idle/flag").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn user_hooks_fire_only_when_last_session_ends() {
        let (registry, store, _) = registry();
        let laptop = registry.open(alice());
        let phone = registry.open(alice());
        registry.register_user_hook(laptop, hook("laptop/offline")).unwrap();
        registry.register_hook(laptop, hook("laptop/viewing")).unwrap();
        registry.register_user_hook(phone, hook("phone/offline")).unwrap();

        assert_eq!(registry.sessions_of(&alice()).len(), 2);
        assert!(registry.has_other_sessions(&alice(), laptop));

        assert_eq!(registry.close(laptop).await.unwrap(), 1);
        assert_eq!(store.get("laptop/offline").await.unwrap(), None);
        assert_eq!(store.get("laptop/viewing").await.unwrap(), Some(json!(true)));
        assert!(!registry.has_other_sessions(&alice(), phone));

        assert_eq!(registry.close(phone).await.unwrap(), 1);
        assert_eq!(store.get("phone/offline").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn failed_hook_commit_keeps_session_for_retry() {
        let (registry, store, _) = registry();
        let session = registry.open(alice());
        registry.register_hook(session, hook("locked/flag")).unwrap();
        store.reject_writes_under("locked");

        assert!(registry.close(session).await.is_err());
        assert!(registry.is_open(session));

        store.allow_all_writes();
        assert_eq!(registry.close(session).await.unwrap(), 1);
        assert_eq!(store.get("locked/flag").await.unwrap(), Some(json!(true)));
    }
}
