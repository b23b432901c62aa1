//! 聊天相关的领域事件
//!
//! 由存储变更派生的类型化事件，组件消费这些事件而不是原始路径回调。

use serde::{Deserialize, Serialize};

use crate::entities::{Invite, Message, PresenceRecord, Room, RoomMember};
use crate::value_objects::{RoomId, UserId};

/// 房间被系统关闭的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Expired,
    OwnerAbandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatEvent {
    /// 房间创建、修改或删除（room 为 None）
    RoomChanged { room_id: RoomId, room: Option<Room> },

    /// 新消息追加到会话
    MessageAppended(Message),

    /// 在线状态变化
    PresenceChanged(PresenceRecord),

    /// 成员加入或离开（member 为 None）
    MembershipChanged {
        room_id: RoomId,
        user_id: UserId,
        member: Option<RoomMember>,
    },

    /// 邀请创建
    InviteCreated(Invite),

    /// 邀请被接受、拒绝或随房间一起删除
    InviteRemoved { room_id: RoomId, user_id: UserId },

    /// 房间被系统关闭，members 为关闭前的成员
    RoomClosed {
        room_id: RoomId,
        members: Vec<UserId>,
        reason: CloseReason,
    },
}

impl ChatEvent {
    /// 事件关联的房间（如果有）
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            ChatEvent::RoomChanged { room_id, .. }
            | ChatEvent::MembershipChanged { room_id, .. }
            | ChatEvent::InviteRemoved { room_id, .. }
            | ChatEvent::RoomClosed { room_id, .. } => Some(room_id),
            ChatEvent::InviteCreated(invite) => Some(&invite.room_id),
            ChatEvent::MessageAppended(message) => message.conversation.room_id(),
            ChatEvent::PresenceChanged(_) => None,
        }
    }

    /// 事件名称，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::RoomChanged { .. } => "room_changed",
            ChatEvent::MessageAppended(_) => "message_appended",
            ChatEvent::PresenceChanged(_) => "presence_changed",
            ChatEvent::MembershipChanged { .. } => "membership_changed",
            ChatEvent::InviteCreated(_) => "invite_created",
            ChatEvent::InviteRemoved { .. } => "invite_removed",
            ChatEvent::RoomClosed { .. } => "room_closed",
        }
    }
}
