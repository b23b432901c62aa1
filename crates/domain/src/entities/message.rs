//! 消息实体

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Media,
    System,
}

/// 只追加的消息，按 (createdAt, id) 排序；createdAt 由存储在提交时赋值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation: ConversationId,
    pub author_id: UserId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation: ConversationId,
        author_id: UserId,
        message_type: MessageType,
        content: MessageContent,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation,
            author_id,
            message_type,
            content: content.into_inner(),
            created_at,
        }
    }

    pub fn system(
        id: MessageId,
        conversation: ConversationId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation,
            author_id: UserId::system(),
            message_type: MessageType::System,
            content: content.into(),
            created_at,
        }
    }

    pub fn is_system(&self) -> bool {
        self.message_type == MessageType::System
    }

    pub fn mark(&self) -> MessageMark {
        MessageMark::new(self.created_at, self.id.clone())
    }
}

/// 消息在会话内的位置。先比较时间戳，同一毫秒内再比较消息 ID。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMark {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: Timestamp,
    pub id: MessageId,
}

impl MessageMark {
    pub fn new(at: Timestamp, id: MessageId) -> Self {
        Self { at, id }
    }
}

/// 投递水位：已处理的最新毫秒，以及该毫秒内已处理过的消息 ID
///
/// 消息按提交顺序投递，早于水位的消息只可能是重复投递。
/// 同一毫秒内的不同消息各计一次，与 ID 大小无关。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryWatermark {
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ids: BTreeSet<MessageId>,
}

impl DeliveryWatermark {
    pub fn starting_at(mark: &MessageMark) -> Self {
        let mut watermark = Self::default();
        watermark.record(mark);
        watermark
    }

    pub fn is_empty(&self) -> bool {
        self.at.is_none()
    }

    pub fn covers(&self, mark: &MessageMark) -> bool {
        match self.at {
            Some(at) if mark.at < at => true,
            Some(at) if mark.at == at => self.ids.contains(&mark.id),
            _ => false,
        }
    }

    /// 记录一条消息，已覆盖时返回 false
    pub fn record(&mut self, mark: &MessageMark) -> bool {
        match self.at {
            Some(at) if mark.at < at => false,
            Some(at) if mark.at == at => self.ids.insert(mark.id.clone()),
            _ => {
                self.at = Some(mark.at);
                self.ids.clear();
                self.ids.insert(mark.id.clone());
                true
            }
        }
    }
}

/// 会话元数据：最新消息位置与消息总数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<MessageId>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message_at: Option<Timestamp>,
    #[serde(default)]
    pub message_count: u64,
}

impl ConversationMeta {
    pub fn latest_mark(&self) -> Option<MessageMark> {
        match (&self.last_message_id, self.last_message_at) {
            (Some(id), Some(at)) => Some(MessageMark::new(at, id.clone())),
            _ => None,
        }
    }
}
