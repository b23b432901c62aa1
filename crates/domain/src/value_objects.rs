use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。存储中以毫秒整数表示。
pub type Timestamp = DateTime<Utc>;

/// 私聊会话 ID 中两个参与者之间的分隔符。标识符本身不允许包含该字符。
pub const THREAD_ID_SEPARATOR: char = '~';

const MAX_IDENTIFIER_LEN: usize = 128;

/// 标识符只能包含 ASCII 字母、数字、`-` 和 `_`，以便直接作为存储路径片段。
fn validate_identifier(field: &str, value: &str) -> Result<(), DomainError> {
    if value.is_empty() {
        return Err(DomainError::invalid_identifier(field, "cannot be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(DomainError::invalid_identifier(field, "too long"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DomainError::invalid_identifier(
            field,
            "only ASCII letters, digits, '-' and '_' are allowed",
        ));
    }
    Ok(())
}

/// 用户唯一标识（由外部身份系统提供）。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// 系统消息使用的保留作者 ID
    pub const SYSTEM: &'static str = "system";

    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        validate_identifier("user_id", &value)?;
        Ok(Self(value))
    }

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_owned())
    }

    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 聊天室唯一标识。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        validate_identifier("room_id", &value)?;
        Ok(Self(value))
    }

    /// 分配新的房间 ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 消息唯一标识。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        validate_identifier("message_id", &value)?;
        Ok(Self(value))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 邀请标识。每个 (房间, 被邀请人) 只有一个邀请，因此 ID 由二者确定性推导。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteId(String);

impl InviteId {
    pub fn for_target(room_id: &RoomId, target: &UserId) -> Self {
        Self(format!("invite_{}_{}", room_id, target))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InviteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 私聊会话标识。
///
/// 两个参与者 ID 按原始字节字典序排序后以 `~` 连接，双方无需协调即可得到同一个键。
/// 由于用户 ID 不允许包含 `~`，该映射与无序参与者对一一对应。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThreadId(String);

impl ThreadId {
    pub fn between(a: &UserId, b: &UserId) -> Result<Self, DomainError> {
        if a == b {
            return Err(DomainError::validation_error(
                "thread_id",
                "a direct thread needs two distinct participants",
            ));
        }
        let (low, high) = if a.as_str() <= b.as_str() {
            (a, b)
        } else {
            (b, a)
        };
        Ok(Self(format!("{}{}{}", low, THREAD_ID_SEPARATOR, high)))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let (low, high) = value
            .split_once(THREAD_ID_SEPARATOR)
            .ok_or_else(|| DomainError::invalid_identifier("thread_id", "missing separator"))?;
        let low = UserId::parse(low)?;
        let high = UserId::parse(high)?;
        let canonical = Self::between(&low, &high)?;
        if canonical.0 != value {
            return Err(DomainError::invalid_identifier(
                "thread_id",
                "participants are not in canonical order",
            ));
        }
        Ok(canonical)
    }

    /// 返回两个参与者（按排序顺序）
    pub fn participants(&self) -> (UserId, UserId) {
        match self.0.split_once(THREAD_ID_SEPARATOR) {
            Some((low, high)) => (UserId(low.to_owned()), UserId(high.to_owned())),
            None => (UserId(self.0.clone()), UserId(self.0.clone())),
        }
    }

    pub fn includes(&self, user: &UserId) -> bool {
        let (low, high) = self.participants();
        &low == user || &high == user
    }

    /// 对某个参与者而言的另一方
    pub fn peer_of(&self, user: &UserId) -> Option<UserId> {
        let (low, high) = self.participants();
        if &low == user {
            Some(high)
        } else if &high == user {
            Some(low)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ThreadId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ThreadId> for String {
    fn from(value: ThreadId) -> Self {
        value.0
    }
}

/// 会话：房间或私聊。
///
/// 作为存储键时使用 `room_{roomId}` / `dm_{threadId}`，私聊的收件箱条目 ID 与之相同。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConversationId {
    Room(RoomId),
    Direct(ThreadId),
}

impl ConversationId {
    const ROOM_PREFIX: &'static str = "room_";
    const DIRECT_PREFIX: &'static str = "dm_";

    pub fn key(&self) -> String {
        match self {
            ConversationId::Room(room_id) => format!("{}{}", Self::ROOM_PREFIX, room_id),
            ConversationId::Direct(thread_id) => format!("{}{}", Self::DIRECT_PREFIX, thread_id),
        }
    }

    pub fn parse_key(key: &str) -> Result<Self, DomainError> {
        if let Some(room) = key.strip_prefix(Self::ROOM_PREFIX) {
            return Ok(ConversationId::Room(RoomId::parse(room)?));
        }
        if let Some(thread) = key.strip_prefix(Self::DIRECT_PREFIX) {
            return Ok(ConversationId::Direct(ThreadId::parse(thread)?));
        }
        Err(DomainError::invalid_identifier(
            "conversation_id",
            format!("unknown conversation key: {key}"),
        ))
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            ConversationId::Room(room_id) => Some(room_id),
            ConversationId::Direct(_) => None,
        }
    }

    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            ConversationId::Room(_) => None,
            ConversationId::Direct(thread_id) => Some(thread_id),
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<RoomId> for ConversationId {
    fn from(value: RoomId) -> Self {
        ConversationId::Room(value)
    }
}

impl From<ThreadId> for ConversationId {
    fn from(value: ThreadId) -> Self {
        ConversationId::Direct(value)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_key(&value)
    }
}

impl From<ConversationId> for String {
    fn from(value: ConversationId) -> Self {
        value.key()
    }
}

/// 经过验证的消息内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    pub const MAX_CHARS: usize = 2000;

    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation_error(
                "message_content",
                "cannot be empty",
            ));
        }
        if value.chars().count() > Self::MAX_CHARS {
            return Err(DomainError::validation_error("message_content", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}
