//! 文档树布局
//!
//! ```text
//! presence/{userId}
//! rooms/{roomId}
//! members/{roomId}/{userId}
//! bans/{roomId}/{userId}
//! invites/{roomId}/{targetUserId}
//! messages/{conversationKey}/{messageId}
//! conversations/{conversationKey}
//! threads/{userId}/{threadId}
//! cursors/{userId}/{conversationKey}
//! viewing/{userId}/{conversationKey}/{sessionId}
//! inbox/{userId}/{itemId}
//! lastSend/{conversationKey}/{userId}
//! ```

use domain::{ConversationId, MessageId, RoomId, ThreadId, UserId};

pub const PRESENCE: &str = "presence";
pub const ROOMS: &str = "rooms";
pub const MEMBERS: &str = "members";
pub const BANS: &str = "bans";
pub const INVITES: &str = "invites";
pub const MESSAGES: &str = "messages";
pub const CONVERSATIONS: &str = "conversations";
pub const THREADS: &str = "threads";
pub const CURSORS: &str = "cursors";
pub const VIEWING: &str = "viewing";
pub const INBOX: &str = "inbox";
pub const LAST_SEND: &str = "lastSend";

pub fn presence(user_id: &UserId) -> String {
    format!("{PRESENCE}/{user_id}")
}

pub fn presence_field(user_id: &UserId, field: &str) -> String {
    format!("{PRESENCE}/{user_id}/{field}")
}

pub fn rooms() -> String {
    ROOMS.to_string()
}

pub fn room(room_id: &RoomId) -> String {
    format!("{ROOMS}/{room_id}")
}

pub fn room_field(room_id: &RoomId, field: &str) -> String {
    format!("{ROOMS}/{room_id}/{field}")
}

pub fn members(room_id: &RoomId) -> String {
    format!("{MEMBERS}/{room_id}")
}

pub fn member(room_id: &RoomId, user_id: &UserId) -> String {
    format!("{MEMBERS}/{room_id}/{user_id}")
}

pub fn bans(room_id: &RoomId) -> String {
    format!("{BANS}/{room_id}")
}

pub fn ban(room_id: &RoomId, user_id: &UserId) -> String {
    format!("{BANS}/{room_id}/{user_id}")
}

pub fn invites(room_id: &RoomId) -> String {
    format!("{INVITES}/{room_id}")
}

pub fn invite(room_id: &RoomId, target: &UserId) -> String {
    format!("{INVITES}/{room_id}/{target}")
}

pub fn messages(conversation: &ConversationId) -> String {
    format!("{MESSAGES}/{}", conversation.key())
}

pub fn message(conversation: &ConversationId, message_id: &MessageId) -> String {
    format!("{MESSAGES}/{}/{message_id}", conversation.key())
}

pub fn conversation(conversation: &ConversationId) -> String {
    format!("{CONVERSATIONS}/{}", conversation.key())
}

pub fn conversation_field(conversation: &ConversationId, field: &str) -> String {
    format!("{CONVERSATIONS}/{}/{field}", conversation.key())
}

pub fn threads(user_id: &UserId) -> String {
    format!("{THREADS}/{user_id}")
}

pub fn thread(user_id: &UserId, thread_id: &ThreadId) -> String {
    format!("{THREADS}/{user_id}/{thread_id}")
}

pub fn cursors(user_id: &UserId) -> String {
    format!("{CURSORS}/{user_id}")
}

pub fn cursor(user_id: &UserId, conversation: &ConversationId) -> String {
    format!("{CURSORS}/{user_id}/{}", conversation.key())
}

pub fn viewing(user_id: &UserId, conversation: &ConversationId) -> String {
    format!("{VIEWING}/{user_id}/{}", conversation.key())
}

pub fn viewing_session(
    user_id: &UserId,
    conversation: &ConversationId,
    session: impl std::fmt::Display,
) -> String {
    format!("{VIEWING}/{user_id}/{}/{session}", conversation.key())
}

pub fn inbox(user_id: &UserId) -> String {
    format!("{INBOX}/{user_id}")
}

pub fn inbox_item(user_id: &UserId, item_id: &str) -> String {
    format!("{INBOX}/{user_id}/{item_id}")
}

pub fn last_send_for(conversation: &ConversationId) -> String {
    format!("{LAST_SEND}/{}", conversation.key())
}

pub fn last_send(conversation: &ConversationId, user_id: &UserId) -> String {
    format!("{LAST_SEND}/{}/{user_id}", conversation.key())
}
