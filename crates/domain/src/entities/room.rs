//! 聊天室实体

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{RoomId, Timestamp, UserId};

/// 房间类型：官方房间永久存在，临时房间有固定的过期时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Official,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomVisibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    pub visibility: RoomVisibility,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: Timestamp,
    /// 创建时确定，之后不再延长
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<Timestamp>,
    pub status: RoomStatus,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expired_at: Option<Timestamp>,
    /// 房主断线时间，由会话结束钩子写入，房主重连时清除
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_offline_since: Option<Timestamp>,
    #[serde(default)]
    pub slow_mode_seconds: u32,
}

impl Room {
    pub const MAX_NAME_CHARS: usize = 60;

    pub fn new_ephemeral(
        id: RoomId,
        name: impl Into<String>,
        owner_id: UserId,
        visibility: RoomVisibility,
        created_at: Timestamp,
        ttl: Duration,
    ) -> Result<Self, DomainError> {
        let name = Self::validate_name(name.into())?;
        if ttl <= Duration::zero() {
            return Err(DomainError::validation_error("ttl", "must be positive"));
        }
        Ok(Self {
            id,
            name,
            kind: RoomKind::Ephemeral,
            owner_id: Some(owner_id),
            visibility,
            created_at,
            expires_at: Some(created_at + ttl),
            status: RoomStatus::Active,
            expired_at: None,
            owner_offline_since: None,
            slow_mode_seconds: 0,
        })
    }

    pub fn new_official(
        id: RoomId,
        name: impl Into<String>,
        visibility: RoomVisibility,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = Self::validate_name(name.into())?;
        Ok(Self {
            id,
            name,
            kind: RoomKind::Official,
            owner_id: None,
            visibility,
            created_at,
            expires_at: None,
            status: RoomStatus::Active,
            expired_at: None,
            owner_offline_since: None,
            slow_mode_seconds: 0,
        })
    }

    pub fn is_official(&self) -> bool {
        self.kind == RoomKind::Official
    }

    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        self.owner_id.as_ref() == Some(user_id)
    }

    /// 临时房间到期且尚未标记过期
    pub fn should_expire(&self, now: Timestamp) -> bool {
        if self.is_official() || self.status == RoomStatus::Expired {
            return false;
        }
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// 已过期房间超过宽限期后应当被彻底删除
    pub fn should_purge(&self, now: Timestamp, grace: Duration) -> bool {
        if self.is_official() || self.status != RoomStatus::Expired {
            return false;
        }
        self.expires_at
            .is_some_and(|expires_at| now >= expires_at + grace)
    }

    /// 房主持续离线超过阈值
    pub fn is_abandoned(&self, now: Timestamp, threshold: Duration) -> bool {
        if self.is_official() {
            return false;
        }
        self.owner_offline_since
            .is_some_and(|since| now - since >= threshold)
    }

    pub fn mark_expired(&mut self, now: Timestamp) {
        self.status = RoomStatus::Expired;
        self.expired_at = Some(now);
    }

    pub fn set_slow_mode(&mut self, seconds: u32) {
        self.slow_mode_seconds = seconds;
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation_error("room_name", "cannot be empty"));
        }
        if trimmed.chars().count() > Self::MAX_NAME_CHARS {
            return Err(DomainError::validation_error("room_name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn ephemeral() -> Room {
        Room::new_ephemeral(
            RoomId::parse("r1").unwrap(),
            "  late night  ",
            UserId::parse("alice").unwrap(),
            RoomVisibility::Public,
            t0(),
            Duration::hours(8),
        )
        .unwrap()
    }

    #[test]
    fn ephemeral_room_expires_after_ttl() {
        let room = ephemeral();
        assert_eq!(room.name, "late night");
        assert_eq!(room.expires_at, Some(t0() + Duration::hours(8)));
        assert!(!room.should_expire(t0() + Duration::hours(8) - Duration::seconds(1)));
        assert!(room.should_expire(t0() + Duration::hours(8)));
    }

    #[test]
    fn official_room_never_expires_or_is_abandoned() {
        let mut room = Room::new_official(
            RoomId::parse("lobby").unwrap(),
            "Lobby",
            RoomVisibility::Public,
            t0(),
        )
        .unwrap();
        room.owner_offline_since = Some(t0());

        let far_future = t0() + Duration::days(365);
        assert!(!room.should_expire(far_future));
        assert!(!room.should_purge(far_future, Duration::minutes(10)));
        assert!(!room.is_abandoned(far_future, Duration::hours(1)));
    }

    #[test]
    fn expired_room_is_purged_after_grace() {
        let mut room = ephemeral();
        let expiry = t0() + Duration::hours(8);
        room.mark_expired(expiry + Duration::seconds(1));

        assert!(!room.should_expire(expiry + Duration::seconds(2)));
        assert!(!room.should_purge(expiry + Duration::minutes(9), Duration::minutes(10)));
        assert!(room.should_purge(
            expiry + Duration::minutes(10) + Duration::seconds(1),
            Duration::minutes(10)
        ));
    }

    #[test]
    fn abandonment_requires_offline_marker_past_threshold() {
        let mut room = ephemeral();
        assert!(!room.is_abandoned(t0() + Duration::hours(2), Duration::hours(1)));

        room.owner_offline_since = Some(t0());
        assert!(!room.is_abandoned(t0() + Duration::minutes(59), Duration::hours(1)));
        assert!(room.is_abandoned(t0() + Duration::minutes(61), Duration::hours(1)));
    }

    #[test]
    fn room_name_is_validated() {
        let result = Room::new_official(
            RoomId::parse("r").unwrap(),
            "   ",
            RoomVisibility::Public,
            t0(),
        );
        assert!(result.is_err());

        let result = Room::new_official(
            RoomId::parse("r").unwrap(),
            "x".repeat(Room::MAX_NAME_CHARS + 1),
            RoomVisibility::Public,
            t0(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn room_serializes_timestamps_as_millis() {
        let room = ephemeral();
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["createdAt"], serde_json::json!(t0().timestamp_millis()));
        assert_eq!(json["kind"], serde_json::json!("ephemeral"));
        assert!(json.get("ownerOfflineSince").is_none());

        let back: Room = serde_json::from_value(json).unwrap();
        assert_eq!(back, room);
    }
}
