//! 成员资格：加入、离开、封禁与邀请

use std::sync::Arc;

use domain::{
    Ban, ConversationId, DomainError, InboxItem, Invite, InviteId, Room, RoomId, RoomMember,
    RoomVisibility, UserId,
};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::store::{paths, Store, StoreError, StoreExt, WriteBatch};

pub struct MembershipGate {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl MembershipGate {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// 读取房间；文档格式错误时视为不存在（由清理任务负责删除）
    pub async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, ApplicationError> {
        match self.store.get_json::<Room>(&paths::room(room_id)).await {
            Ok(room) => Ok(room),
            Err(StoreError::Serialization(err)) => {
                tracing::warn!(room_id = %room_id, error = %err, "房间文档格式错误");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// 房间必须存在且处于 active 状态
    pub async fn require_active_room(&self, room_id: &RoomId) -> Result<Room, ApplicationError> {
        match self.get_room(room_id).await? {
            Some(room) if room.is_active() => Ok(room),
            _ => Err(ApplicationError::not_found("room", room_id)),
        }
    }

    pub async fn get_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<RoomMember>, ApplicationError> {
        Ok(self
            .store
            .get_json::<RoomMember>(&paths::member(room_id, user_id))
            .await?)
    }

    pub async fn is_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<bool, ApplicationError> {
        Ok(self.store.exists(&paths::member(room_id, user_id)).await?)
    }

    pub async fn is_banned(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<bool, ApplicationError> {
        Ok(self.store.exists(&paths::ban(room_id, user_id)).await?)
    }

    pub async fn members(&self, room_id: &RoomId) -> Result<Vec<RoomMember>, ApplicationError> {
        let mut members: Vec<RoomMember> = self
            .store
            .children::<RoomMember>(&paths::members(room_id))
            .await?
            .into_iter()
            .map(|(_, member)| member)
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.user_id.cmp(&b.user_id)));
        Ok(members)
    }

    /// 成员 ID 列表，直接取子节点键
    pub async fn member_ids(&self, room_id: &RoomId) -> Result<Vec<UserId>, ApplicationError> {
        let keys = self.store.child_keys(&paths::members(room_id)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| UserId::parse(key).ok())
            .collect())
    }

    pub async fn join_room(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<RoomMember, ApplicationError> {
        let room = self.require_active_room(room_id).await?;
        if self.is_banned(room_id, user_id).await? {
            return Err(ApplicationError::Banned {
                room_id: room_id.clone(),
            });
        }
        if let Some(existing) = self.get_member(room_id, user_id).await? {
            return Ok(existing);
        }
        if room.visibility == RoomVisibility::Private {
            return Err(ApplicationError::permission_denied(
                "join a private room without an invite",
            ));
        }

        let member = RoomMember::member(room_id.clone(), user_id.clone(), self.clock.now());
        self.store
            .set_json(&paths::member(room_id, user_id), &member)
            .await?;
        self.confirm_not_banned(room_id, user_id).await?;
        tracing::info!(room_id = %room_id, user_id = %user_id, "用户加入房间");
        Ok(member)
    }

    /// 写入成员之后复核封禁
    ///
    /// 封禁与移除成员在同一批次提交：封禁早于成员写入时这里能读到并撤回，
    /// 晚于成员写入时由封禁批次移除成员。
    pub(crate) async fn confirm_not_banned(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(), ApplicationError> {
        if !self.is_banned(room_id, user_id).await? {
            return Ok(());
        }
        let conversation = ConversationId::Room(room_id.clone());
        let mut batch = WriteBatch::new();
        batch
            .remove(paths::member(room_id, user_id))
            .remove(paths::cursor(user_id, &conversation));
        self.store.update(batch).await?;
        tracing::warn!(room_id = %room_id, user_id = %user_id, "加入时已被封禁，撤回成员资格");
        Err(ApplicationError::Banned {
            room_id: room_id.clone(),
        })
    }

    pub async fn leave_room(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ApplicationError> {
        if let Some(room) = self.get_room(room_id).await? {
            if room.is_owned_by(user_id) {
                return Err(ApplicationError::permission_denied(
                    "leave a room you own",
                ));
            }
        }
        let conversation = ConversationId::Room(room_id.clone());
        let mut batch = WriteBatch::new();
        batch
            .remove(paths::member(room_id, user_id))
            .remove(paths::cursor(user_id, &conversation));
        self.store.update(batch).await?;
        tracing::info!(room_id = %room_id, user_id = %user_id, "用户离开房间");
        Ok(())
    }

    async fn require_owner(
        &self,
        actor_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Room, ApplicationError> {
        let room = self
            .get_room(room_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("room", room_id))?;
        if !room.is_owned_by(actor_id) {
            return Err(ApplicationError::permission_denied(format!(
                "moderate room {room_id}"
            )));
        }
        Ok(room)
    }

    /// 封禁：移除成员资格、未处理的邀请及其收件箱条目，并写入封禁记录
    pub async fn ban_member(
        &self,
        actor_id: &UserId,
        room_id: &RoomId,
        target_id: &UserId,
    ) -> Result<Ban, ApplicationError> {
        self.require_owner(actor_id, room_id).await?;
        if actor_id == target_id {
            return Err(DomainError::business_rule_violation("owner cannot ban themselves").into());
        }

        let ban = Ban::new(
            room_id.clone(),
            target_id.clone(),
            actor_id.clone(),
            self.clock.now(),
        );
        let invite_item = InviteId::for_target(room_id, target_id);
        let conversation = ConversationId::Room(room_id.clone());
        let mut batch = WriteBatch::new();
        batch
            .remove(paths::member(room_id, target_id))
            .remove(paths::invite(room_id, target_id))
            .remove(paths::inbox_item(target_id, invite_item.as_str()))
            .remove(paths::cursor(target_id, &conversation))
            .set_json(paths::ban(room_id, target_id), &ban)?;
        self.store.update(batch).await?;

        tracing::info!(
            room_id = %room_id,
            user_id = %target_id,
            banned_by = %actor_id,
            "用户被封禁"
        );
        Ok(ban)
    }

    pub async fn unban_member(
        &self,
        actor_id: &UserId,
        room_id: &RoomId,
        target_id: &UserId,
    ) -> Result<(), ApplicationError> {
        self.require_owner(actor_id, room_id).await?;
        self.store.remove(&paths::ban(room_id, target_id)).await?;
        tracing::info!(room_id = %room_id, user_id = %target_id, "解除封禁");
        Ok(())
    }

    /// 创建邀请，邀请与收件箱条目在同一批次写入
    pub async fn create_invite(
        &self,
        inviter_id: &UserId,
        room_id: &RoomId,
        target_id: &UserId,
    ) -> Result<Invite, ApplicationError> {
        let room = self.require_active_room(room_id).await?;
        if !self.is_member(room_id, inviter_id).await? {
            return Err(ApplicationError::permission_denied(format!(
                "invite to room {room_id} without being a member"
            )));
        }
        if self.is_banned(room_id, target_id).await? {
            return Err(ApplicationError::Banned {
                room_id: room_id.clone(),
            });
        }
        let invite_path = paths::invite(room_id, target_id);
        if let Some(existing) = self.store.get_json::<Invite>(&invite_path).await? {
            return Ok(existing);
        }

        let invite = Invite::new(
            room_id.clone(),
            target_id.clone(),
            inviter_id.clone(),
            self.clock.now(),
        );
        if self.is_member(room_id, target_id).await? {
            return Ok(invite);
        }

        let item = InboxItem::from_invite(&invite, room.name.as_str());
        let mut batch = WriteBatch::new();
        batch
            .set_json(invite_path, &invite)?
            .set_json(paths::inbox_item(target_id, &item.id), &item)?;
        self.store.update(batch).await?;

        tracing::info!(
            room_id = %room_id,
            user_id = %target_id,
            inviter_id = %inviter_id,
            "已发送房间邀请"
        );
        Ok(invite)
    }
}
