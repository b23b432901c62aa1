//! 私聊会话的参与者镜像

use serde::{Deserialize, Serialize};

use crate::entities::message::Message;
use crate::value_objects::{ThreadId, Timestamp, UserId};

/// 每个参与者各自保存一份的私聊摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectThread {
    pub thread_id: ThreadId,
    pub peer_id: UserId,
    pub last_message: String,
    pub last_sender: UserId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_timestamp: Timestamp,
    /// 由参与者的已读游标推导，不落库
    #[serde(skip)]
    pub unread_count: u64,
}

impl DirectThread {
    /// 为 `participant` 构建镜像；participant 不属于该会话时返回 None
    pub fn for_participant(
        thread_id: &ThreadId,
        participant: &UserId,
        message: &Message,
    ) -> Option<Self> {
        let peer_id = thread_id.peer_of(participant)?;
        Some(Self {
            thread_id: thread_id.clone(),
            peer_id,
            last_message: message.content.clone(),
            last_sender: message.author_id.clone(),
            last_timestamp: message.created_at,
            unread_count: 0,
        })
    }
}
