//! 房间成员与封禁

use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: RoomRole,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub joined_at: Timestamp,
}

impl RoomMember {
    pub fn new(room_id: RoomId, user_id: UserId, role: RoomRole, joined_at: Timestamp) -> Self {
        Self {
            room_id,
            user_id,
            role,
            joined_at,
        }
    }

    pub fn owner(room_id: RoomId, user_id: UserId, joined_at: Timestamp) -> Self {
        Self::new(room_id, user_id, RoomRole::Owner, joined_at)
    }

    pub fn member(room_id: RoomId, user_id: UserId, joined_at: Timestamp) -> Self {
        Self::new(room_id, user_id, RoomRole::Member, joined_at)
    }

    pub fn is_owner(&self) -> bool {
        self.role == RoomRole::Owner
    }
}

/// 封禁记录：存在时无论是否有邀请都不能（重新）加入房间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ban {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub banned_by: UserId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: Timestamp,
}

impl Ban {
    pub fn new(room_id: RoomId, user_id: UserId, banned_by: UserId, created_at: Timestamp) -> Self {
        Self {
            room_id,
            user_id,
            banned_by,
            created_at,
        }
    }
}
