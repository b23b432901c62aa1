//! 发送路径与历史查询

use std::sync::Arc;

use chrono::DateTime;
use domain::{
    ConversationId, ConversationMeta, DirectThread, DomainError, Message, MessageContent,
    MessageId, MessageMark, MessageType, ReadCursor, RoomId, ThreadId, UserId,
};
use serde_json::Value;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::membership::MembershipGate;
use crate::rate_limiter::{DenyReason, RateLimitGuard, SendCheck};
use crate::store::{
    paths, server_timestamp, Store, StoreError, StoreExt, TransactionStep, WriteBatch,
};

/// 把消息写入批次：消息文档与会话元数据，时间戳由存储在提交时赋值
pub(crate) fn stage_message(batch: &mut WriteBatch, message: &Message) -> Result<(), StoreError> {
    let conversation = &message.conversation;
    let mut doc = serde_json::to_value(message)?;
    doc["createdAt"] = server_timestamp();
    batch
        .set(paths::message(conversation, &message.id), doc)
        .set(
            paths::conversation_field(conversation, "lastMessageId"),
            Value::from(message.id.as_str()),
        )
        .set(
            paths::conversation_field(conversation, "lastMessageAt"),
            server_timestamp(),
        );
    Ok(())
}

/// 消息计数用事务递增
pub(crate) async fn bump_message_count(
    store: &dyn Store,
    conversation: &ConversationId,
) -> Result<(), StoreError> {
    store
        .transaction(
            &paths::conversation_field(conversation, "messageCount"),
            &mut |current| {
                let next = current.and_then(|v| v.as_u64()).unwrap_or(0) + 1;
                TransactionStep::Commit(Some(Value::from(next)))
            },
        )
        .await?;
    Ok(())
}

/// 会话最新消息位置，总是直接从存储读取
pub(crate) async fn latest_mark(
    store: &dyn Store,
    conversation: &ConversationId,
) -> Result<Option<MessageMark>, StoreError> {
    Ok(store
        .get_json::<ConversationMeta>(&paths::conversation(conversation))
        .await?
        .and_then(|meta| meta.latest_mark()))
}

pub struct MessageService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    guard: Arc<RateLimitGuard>,
    membership: Arc<MembershipGate>,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        guard: Arc<RateLimitGuard>,
        membership: Arc<MembershipGate>,
    ) -> Self {
        Self {
            store,
            clock,
            guard,
            membership,
        }
    }

    pub async fn send_room_message(
        &self,
        author_id: &UserId,
        room_id: &RoomId,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Result<Message, ApplicationError> {
        if message_type == MessageType::System {
            return Err(DomainError::validation_error(
                "message_type",
                "system messages cannot be sent by users",
            )
            .into());
        }
        let content = MessageContent::new(content)?;
        let room = self.membership.require_active_room(room_id).await?;
        if self.membership.is_banned(room_id, author_id).await? {
            return Err(ApplicationError::Banned {
                room_id: room_id.clone(),
            });
        }
        if !self.membership.is_member(room_id, author_id).await? {
            return Err(ApplicationError::permission_denied(format!(
                "send to room {room_id} without being a member"
            )));
        }

        let conversation = ConversationId::Room(room_id.clone());
        self.guard
            .check_send(author_id, &conversation, room.slow_mode_seconds)
            .into_result()?;
        self.check_shared_cooldown(author_id, &conversation, room.slow_mode_seconds)
            .await?;
        self.guard.record_send(author_id, &conversation).into_result()?;

        let message = Message::new(
            MessageId::generate(),
            conversation,
            author_id.clone(),
            message_type,
            content,
            self.clock.now(),
        );
        self.append(message, WriteBatch::new()).await
    }

    pub async fn send_direct_message(
        &self,
        author_id: &UserId,
        peer_id: &UserId,
        content: impl Into<String>,
    ) -> Result<Message, ApplicationError> {
        let thread_id = ThreadId::between(author_id, peer_id)?;
        let content = MessageContent::new(content)?;
        let conversation = ConversationId::Direct(thread_id.clone());

        self.guard
            .check_send(author_id, &conversation, 0)
            .into_result()?;
        self.guard.record_send(author_id, &conversation).into_result()?;

        let message = Message::new(
            MessageId::generate(),
            conversation,
            author_id.clone(),
            MessageType::Text,
            content,
            self.clock.now(),
        );

        let mut batch = WriteBatch::new();
        for participant in [author_id, peer_id] {
            if let Some(mirror) = DirectThread::for_participant(&thread_id, participant, &message) {
                let mut doc = serde_json::to_value(&mirror)?;
                doc["lastTimestamp"] = server_timestamp();
                batch.set(paths::thread(participant, &thread_id), doc);
            }
        }
        self.append(message, batch).await
    }

    /// 跨会话的慢速模式检查：读取存储中镜像的最后发送时间
    async fn check_shared_cooldown(
        &self,
        author_id: &UserId,
        conversation: &ConversationId,
        slow_mode_seconds: u32,
    ) -> Result<(), ApplicationError> {
        if slow_mode_seconds == 0 {
            return Ok(());
        }
        let last_send = self
            .store
            .get(&paths::last_send(conversation, author_id))
            .await?
            .and_then(|value| value.as_i64())
            .and_then(DateTime::from_timestamp_millis);
        let Some(last_send) = last_send else {
            return Ok(());
        };

        let cooldown = chrono::Duration::seconds(i64::from(slow_mode_seconds));
        let elapsed = self.clock.now() - last_send;
        if elapsed < cooldown {
            return SendCheck::denied(DenyReason::Cooldown, cooldown - elapsed).into_result();
        }
        Ok(())
    }

    async fn append(
        &self,
        message: Message,
        mut batch: WriteBatch,
    ) -> Result<Message, ApplicationError> {
        let conversation = message.conversation.clone();
        stage_message(&mut batch, &message)?;
        batch.set(
            paths::last_send(&conversation, &message.author_id),
            server_timestamp(),
        );
        self.store.update(batch).await?;

        if let Err(err) = bump_message_count(self.store.as_ref(), &conversation).await {
            tracing::warn!(conversation = %conversation, error = %err, "消息计数更新失败");
        }

        tracing::debug!(
            conversation = %conversation,
            message_id = %message.id,
            author_id = %message.author_id,
            "消息已追加"
        );

        let stored = self
            .store
            .get_json::<Message>(&paths::message(&conversation, &message.id))
            .await?;
        Ok(stored.unwrap_or(message))
    }

    /// 最近 `limit` 条消息，按 (createdAt, id) 升序
    pub async fn history(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, ApplicationError> {
        let mut messages: Vec<Message> = self
            .store
            .children::<Message>(&paths::messages(conversation))
            .await?
            .into_iter()
            .map(|(_, message)| message)
            .collect();
        messages.sort_by_key(Message::mark);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    /// 用户的私聊列表，最新的在前，未读数来自已读游标
    pub async fn threads(&self, user_id: &UserId) -> Result<Vec<DirectThread>, ApplicationError> {
        let mut threads: Vec<DirectThread> = self
            .store
            .children::<DirectThread>(&paths::threads(user_id))
            .await?
            .into_iter()
            .map(|(_, thread)| thread)
            .collect();

        for thread in &mut threads {
            let conversation = ConversationId::Direct(thread.thread_id.clone());
            thread.unread_count = self
                .store
                .get_json::<ReadCursor>(&paths::cursor(user_id, &conversation))
                .await?
                .map(|cursor| cursor.unread_count)
                .unwrap_or(0);
        }
        threads.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
        Ok(threads)
    }

    pub async fn conversation_meta(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationMeta, ApplicationError> {
        Ok(self
            .store
            .get_json::<ConversationMeta>(&paths::conversation(conversation))
            .await?
            .unwrap_or_default())
    }
}
