//! 房间邀请

use serde::{Deserialize, Serialize};

use crate::value_objects::{InviteId, RoomId, Timestamp, UserId};

/// 房间邀请，与被邀请人收件箱中的镜像条目一起创建、一起删除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: InviteId,
    pub room_id: RoomId,
    pub target_user_id: UserId,
    pub inviter_id: UserId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: Timestamp,
    pub inbox_item_id: String,
}

impl Invite {
    pub fn new(
        room_id: RoomId,
        target_user_id: UserId,
        inviter_id: UserId,
        created_at: Timestamp,
    ) -> Self {
        let id = InviteId::for_target(&room_id, &target_user_id);
        let inbox_item_id = id.as_str().to_owned();
        Self {
            id,
            room_id,
            target_user_id,
            inviter_id,
            created_at,
            inbox_item_id,
        }
    }
}
