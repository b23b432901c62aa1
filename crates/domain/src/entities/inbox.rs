//! 收件箱条目
//!
//! 每个私聊会话对每个接收者只有一个条目（累计 count），每个 (房间, 被邀请人) 只有一个邀请条目。

use serde::{Deserialize, Serialize};

use crate::entities::invite::Invite;
use crate::entities::message::{DeliveryWatermark, Message};
use crate::value_objects::{ConversationId, MessageId, RoomId, ThreadId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxItemType {
    Dm,
    RoomInvite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPayload {
    pub thread_id: ThreadId,
    pub peer_id: UserId,
    pub last_message: String,
    pub last_sender: UserId,
    pub last_message_id: MessageId,
    /// 已计入 count 的消息
    #[serde(default, skip_serializing_if = "DeliveryWatermark::is_empty")]
    pub delivered: DeliveryWatermark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePayload {
    pub room_id: RoomId,
    pub room_name: String,
    pub inviter_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboxPayload {
    Direct(DirectPayload),
    Invite(InvitePayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: InboxItemType,
    pub unread: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub payload: InboxPayload,
}

impl InboxItem {
    /// 私聊条目 ID，与私聊会话键相同（`dm_` + threadId）
    pub fn direct_item_id(thread_id: &ThreadId) -> String {
        ConversationId::Direct(thread_id.clone()).key()
    }

    pub fn from_direct_message(thread_id: &ThreadId, message: &Message) -> Self {
        Self {
            id: Self::direct_item_id(thread_id),
            item_type: InboxItemType::Dm,
            unread: true,
            created_at: message.created_at,
            count: Some(1),
            payload: InboxPayload::Direct(DirectPayload {
                thread_id: thread_id.clone(),
                peer_id: message.author_id.clone(),
                last_message: message.content.clone(),
                last_sender: message.author_id.clone(),
                last_message_id: message.id.clone(),
                delivered: DeliveryWatermark::starting_at(&message.mark()),
            }),
        }
    }

    pub fn from_invite(invite: &Invite, room_name: impl Into<String>) -> Self {
        Self {
            id: invite.inbox_item_id.clone(),
            item_type: InboxItemType::RoomInvite,
            unread: true,
            created_at: invite.created_at,
            count: None,
            payload: InboxPayload::Invite(InvitePayload {
                room_id: invite.room_id.clone(),
                room_name: room_name.into(),
                inviter_id: invite.inviter_id.clone(),
            }),
        }
    }

    /// 把一条新私聊消息累加到条目上。同一条消息重复到达时返回 false。
    pub fn record_direct_message(&mut self, message: &Message) -> bool {
        let InboxPayload::Direct(payload) = &mut self.payload else {
            return false;
        };
        // 重复投递（包括更早消息的重投）不再计数
        if payload.last_message_id == message.id
            || !payload.delivered.record(&message.mark())
        {
            return false;
        }

        self.count = Some(self.count.unwrap_or(0) + 1);
        self.unread = true;
        if message.created_at >= self.created_at {
            self.created_at = message.created_at;
            payload.last_message = message.content.clone();
            payload.last_sender = message.author_id.clone();
            payload.last_message_id = message.id.clone();
        }
        true
    }

    pub fn mark_read(&mut self) {
        self.unread = false;
        if self.item_type == InboxItemType::Dm {
            self.count = Some(0);
        }
    }

    /// 计入角标的未读消息数
    pub fn unread_messages(&self) -> u64 {
        if !self.unread {
            return 0;
        }
        match self.item_type {
            InboxItemType::Dm => self.count.unwrap_or(1),
            InboxItemType::RoomInvite => 1,
        }
    }
}

/// 收件箱角标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxBadge {
    pub unread_items: usize,
    pub unread_messages: u64,
}

impl InboxBadge {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a InboxItem>) -> Self {
        items
            .into_iter()
            .filter(|item| item.unread)
            .fold(Self::default(), |badge, item| Self {
                unread_items: badge.unread_items + 1,
                unread_messages: badge.unread_messages + item.unread_messages(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::message::MessageType;
    use crate::value_objects::MessageContent;
    use chrono::{TimeZone, Utc};

    fn dm(id: &str, from: &str, to: &str, millis: i64) -> (ThreadId, Message) {
        let from = UserId::parse(from).unwrap();
        let to = UserId::parse(to).unwrap();
        let thread = ThreadId::between(&from, &to).unwrap();
        let message = Message::new(
            MessageId::parse(id).unwrap(),
            ConversationId::Direct(thread.clone()),
            from,
            MessageType::Text,
            MessageContent::new(format!("text {id}")).unwrap(),
            Utc.timestamp_millis_opt(millis).unwrap(),
        );
        (thread, message)
    }

    #[test]
    fn direct_item_accumulates_count_and_ignores_duplicates() {
        let (thread, first) = dm("m1", "alice", "bob", 10);
        let mut item = InboxItem::from_direct_message(&thread, &first);
        assert_eq!(item.id, "dm_alice~bob");

        let (_, second) = dm("m2", "alice", "bob", 20);
        assert!(item.record_direct_message(&second));
        assert!(!item.record_direct_message(&second));
        assert_eq!(item.count, Some(2));

        let InboxPayload::Direct(payload) = &item.payload else {
            panic!("expected direct payload");
        };
        assert_eq!(payload.last_message, "text m2");
    }

    #[test]
    fn redelivered_older_message_is_not_counted_again() {
        let (thread, m1) = dm("m1", "alice", "bob", 10);
        let mut item = InboxItem::from_direct_message(&thread, &m1);
        let (_, m2) = dm("m2", "alice", "bob", 20);
        assert!(item.record_direct_message(&m2));

        assert!(!item.record_direct_message(&m1));
        assert_eq!(item.count, Some(2));
        assert_eq!(item.created_at.timestamp_millis(), 20);
        let InboxPayload::Direct(payload) = &item.payload else {
            panic!("expected direct payload");
        };
        assert_eq!(payload.last_message_id.as_str(), "m2");
    }

    #[test]
    fn same_millisecond_messages_both_count() {
        let (thread, first) = dm("ffff", "alice", "bob", 10);
        let mut item = InboxItem::from_direct_message(&thread, &first);
        let (_, second) = dm("aaaa", "alice", "bob", 10);

        assert!(item.record_direct_message(&second));
        assert!(!item.record_direct_message(&first));
        assert_eq!(item.count, Some(2));
    }

    #[test]
    fn redelivery_after_read_stays_read() {
        let (thread, m1) = dm("m1", "alice", "bob", 10);
        let mut item = InboxItem::from_direct_message(&thread, &m1);
        item.mark_read();

        assert!(!item.record_direct_message(&m1));
        assert!(!item.unread);
        assert_eq!(item.count, Some(0));
    }

    #[test]
    fn mark_read_resets_dm_count_and_badge() {
        let (thread, message) = dm("m1", "alice", "bob", 10);
        let mut item = InboxItem::from_direct_message(&thread, &message);
        let (_, next) = dm("m2", "alice", "bob", 11);
        item.record_direct_message(&next);

        assert_eq!(
            InboxBadge::from_items([&item]),
            InboxBadge {
                unread_items: 1,
                unread_messages: 2
            }
        );

        item.mark_read();
        assert_eq!(item.count, Some(0));
        assert_eq!(InboxBadge::from_items([&item]), InboxBadge::default());
    }

    #[test]
    fn payload_is_tagged() {
        let (thread, message) = dm("m1", "alice", "bob", 10);
        let item = InboxItem::from_direct_message(&thread, &message);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], serde_json::json!("dm"));
        assert_eq!(json["payload"]["kind"], serde_json::json!("direct"));

        let back: InboxItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
