//! 已读状态
//!
//! 未读数保存在每个 (用户, 会话) 的已读游标上，所有修改都是对游标文档的事务。
//! 游标记录已处理过的最新消息位置，同一条消息重复投递不会重复计数；早于已读
//! 基线的消息也不计数。用户正在查看的会话只推进游标，不增加未读数。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{ConversationId, CursorUpdate, MessageId, MessageMark, ReadCursor, Timestamp, UserId};
use serde_json::Value;

use crate::error::ApplicationError;
use crate::membership::MembershipGate;
use crate::messaging::latest_mark;
use crate::session::{HookHandle, SessionId, SessionRegistry};
use crate::store::{paths, Store, StoreExt, WriteBatch};

type ViewingKey = (SessionId, UserId, ConversationId);

pub struct ReadStateTracker {
    store: Arc<dyn Store>,
    sessions: Arc<SessionRegistry>,
    membership: Arc<MembershipGate>,
    viewing_hooks: Mutex<HashMap<ViewingKey, HookHandle>>,
}

impl ReadStateTracker {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionRegistry>,
        membership: Arc<MembershipGate>,
    ) -> Self {
        Self {
            store,
            sessions,
            membership,
            viewing_hooks: Mutex::new(HashMap::new()),
        }
    }

    fn viewing_hooks(&self) -> MutexGuard<'_, HashMap<ViewingKey, HookHandle>> {
        self.viewing_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 会话变为活跃：游标推进到最新消息，未读清零
    pub async fn mark_active(
        &self,
        user_id: &UserId,
        conversation: &ConversationId,
    ) -> Result<ReadCursor, ApplicationError> {
        let latest = latest_mark(self.store.as_ref(), conversation).await?;
        let cursor = self
            .store
            .transact(&paths::cursor(user_id, conversation), |cursor: &mut ReadCursor| {
                cursor.mark_read(latest.clone());
                Some(cursor.clone())
            })
            .await?
            .unwrap_or_default();
        tracing::debug!(
            user_id = %user_id,
            conversation = %conversation,
            "会话已标记为已读"
        );
        Ok(cursor)
    }

    /// 打开会话：登记查看标记（会话结束时自动清除）并标记已读
    pub async fn open_conversation(
        &self,
        session: SessionId,
        user_id: &UserId,
        conversation: &ConversationId,
    ) -> Result<ReadCursor, ApplicationError> {
        let flag = paths::viewing_session(user_id, conversation, session);
        self.store.set(&flag, Value::Bool(true)).await?;

        let key = (session, user_id.clone(), conversation.clone());
        if !self.viewing_hooks().contains_key(&key) {
            let mut on_disconnect = WriteBatch::new();
            on_disconnect.remove(flag);
            let handle = self.sessions.register_hook(session, on_disconnect)?;
            self.viewing_hooks().insert(key, handle);
        }

        self.mark_active(user_id, conversation).await
    }

    pub async fn close_conversation(
        &self,
        session: SessionId,
        user_id: &UserId,
        conversation: &ConversationId,
    ) -> Result<(), ApplicationError> {
        let key = (session, user_id.clone(), conversation.clone());
        if let Some(handle) = self.viewing_hooks().remove(&key) {
            self.sessions.cancel(&handle);
        }
        self.store
            .remove(&paths::viewing_session(user_id, conversation, session))
            .await?;
        Ok(())
    }

    /// 会话已结束，丢弃本地保存的钩子句柄
    pub fn forget_session(&self, session: SessionId) {
        self.viewing_hooks().retain(|(owner, _, _), _| *owner != session);
    }

    /// 用户是否在任一设备上查看该会话
    pub async fn is_viewing(
        &self,
        user_id: &UserId,
        conversation: &ConversationId,
    ) -> Result<bool, ApplicationError> {
        Ok(self
            .store
            .exists(&paths::viewing(user_id, conversation))
            .await?)
    }

    /// 会话的参与者：房间取成员，私聊取双方
    pub async fn participants(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<UserId>, ApplicationError> {
        match conversation {
            ConversationId::Room(room_id) => self.membership.member_ids(room_id).await,
            ConversationId::Direct(thread_id) => {
                let (low, high) = thread_id.participants();
                Ok(vec![low, high])
            }
        }
    }

    /// 新消息到达，返回实际增加未读数的参与者个数
    pub async fn on_new_message(
        &self,
        conversation: &ConversationId,
        message_id: &MessageId,
        author_id: &UserId,
        created_at: Timestamp,
    ) -> Result<usize, ApplicationError> {
        let mark = MessageMark::new(created_at, message_id.clone());
        let mut counted = 0;

        for participant in self.participants(conversation).await? {
            if &participant == author_id {
                continue;
            }
            let viewing = self.is_viewing(&participant, conversation).await?;
            let update = self
                .store
                .transact(
                    &paths::cursor(&participant, conversation),
                    |cursor: &mut ReadCursor| {
                        let update = cursor.apply_incoming(&mark, viewing);
                        update.changes_cursor().then_some(update)
                    },
                )
                .await?;
            if update == Some(CursorUpdate::Counted) {
                counted += 1;
            }
        }

        tracing::debug!(
            conversation = %conversation,
            message_id = %message_id,
            counted,
            "未读数已更新"
        );
        Ok(counted)
    }

    pub async fn cursor(
        &self,
        user_id: &UserId,
        conversation: &ConversationId,
    ) -> Result<ReadCursor, ApplicationError> {
        Ok(self
            .store
            .get_json::<ReadCursor>(&paths::cursor(user_id, conversation))
            .await?
            .unwrap_or_default())
    }

    pub async fn unread(
        &self,
        user_id: &UserId,
        conversation: &ConversationId,
    ) -> Result<u64, ApplicationError> {
        Ok(self.cursor(user_id, conversation).await?.unread_count)
    }

    pub async fn total_unread(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        Ok(self
            .store
            .children::<ReadCursor>(&paths::cursors(user_id))
            .await?
            .iter()
            .map(|(_, cursor)| cursor.unread_count)
            .sum())
    }
}
