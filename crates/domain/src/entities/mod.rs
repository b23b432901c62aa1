//! 领域实体定义
//!
//! 包含系统的核心实体：房间、成员、邀请、消息、私聊镜像、已读游标、收件箱条目和在线状态。

pub mod direct_thread;
pub mod inbox;
pub mod invite;
pub mod message;
pub mod presence;
pub mod read_cursor;
pub mod room;
pub mod room_member;

// 重新导出核心实体
pub use direct_thread::DirectThread;
pub use inbox::{DirectPayload, InboxBadge, InboxItem, InboxItemType, InboxPayload, InvitePayload};
pub use invite::Invite;
pub use message::{ConversationMeta, DeliveryWatermark, Message, MessageMark, MessageType};
pub use presence::{PresenceRecord, PresenceState};
pub use read_cursor::{CursorUpdate, ReadCursor};
pub use room::{Room, RoomKind, RoomStatus, RoomVisibility};
pub use room_member::{Ban, RoomMember, RoomRole};
