//! 在线状态记录

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

/// 每个用户一条，每次心跳覆盖，从不删除（过期记录靠时间戳比较自然失效）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub state: PresenceState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: Timestamp,
}

impl PresenceRecord {
    /// 崩溃的客户端可能永远不会触发断线钩子，所以还要求 lastSeen 在时效窗口内
    pub fn is_live_at(&self, now: Timestamp, staleness: Duration) -> bool {
        self.state == PresenceState::Online && now - self.last_seen < staleness
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn online_record_goes_stale() {
        let seen = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = PresenceRecord {
            user_id: UserId::parse("alice").unwrap(),
            state: PresenceState::Online,
            last_seen: seen,
        };
        let staleness = Duration::minutes(5);

        assert!(record.is_live_at(seen + Duration::minutes(4), staleness));
        assert!(!record.is_live_at(seen + Duration::minutes(5), staleness));
    }

    #[test]
    fn offline_record_is_never_live() {
        let seen = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = PresenceRecord {
            user_id: UserId::parse("alice").unwrap(),
            state: PresenceState::Offline,
            last_seen: seen,
        };
        assert!(!record.is_live_at(seen, Duration::minutes(5)));
    }
}
