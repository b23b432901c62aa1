//! 已读游标
//!
//! 每个 (用户, 会话) 一份。未读数只会被整体清零，不会逐条递减。

use serde::{Deserialize, Serialize};

use crate::entities::message::{DeliveryWatermark, MessageMark};
use crate::value_objects::Timestamp;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadCursor {
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_read_at: Option<Timestamp>,
    #[serde(default)]
    pub unread_count: u64,
    /// 已处理过的消息，用于识别重复投递
    #[serde(default, skip_serializing_if = "DeliveryWatermark::is_empty")]
    pub counted: DeliveryWatermark,
}

/// 新消息作用到游标上的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorUpdate {
    /// 该消息（或更新的消息）已经处理过
    Duplicate,
    /// 消息早于已读基线
    AlreadyRead,
    /// 用户正在查看该会话，只推进游标
    Seen,
    /// 未读数加一
    Counted,
}

impl CursorUpdate {
    pub fn changes_cursor(self) -> bool {
        matches!(self, CursorUpdate::Seen | CursorUpdate::Counted)
    }
}

impl ReadCursor {
    /// 会话变为活跃：未读清零，游标推进到最新消息（不回退）
    pub fn mark_read(&mut self, latest: Option<MessageMark>) {
        self.unread_count = 0;
        if let Some(latest) = latest {
            if self.last_read_at.map_or(true, |at| latest.at > at) {
                self.last_read_at = Some(latest.at);
            }
            self.counted.record(&latest);
        }
    }

    pub fn apply_incoming(&mut self, mark: &MessageMark, viewing: bool) -> CursorUpdate {
        if self.counted.covers(mark) {
            return CursorUpdate::Duplicate;
        }
        if self.last_read_at.is_some_and(|at| mark.at <= at) {
            return CursorUpdate::AlreadyRead;
        }

        self.counted.record(mark);
        if viewing {
            self.last_read_at = Some(mark.at);
            CursorUpdate::Seen
        } else {
            self.unread_count += 1;
            CursorUpdate::Counted
        }
    }
}
