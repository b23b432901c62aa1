//! 收件箱聚合
//!
//! 私聊按会话聚合成一个条目并累计条数，房间邀请每个 (房间, 被邀请人) 一个条目。
//! 接受或拒绝邀请时，邀请、收件箱条目与成员资格在同一批次中变更。

use std::sync::Arc;

use domain::{
    ConversationId, DomainError, InboxBadge, InboxItem, Invite, InviteId, Message, RoomId,
    RoomMember, UserId,
};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::membership::MembershipGate;
use crate::store::{paths, Store, StoreExt, WriteBatch};

pub struct InboxAggregator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    membership: Arc<MembershipGate>,
}

impl InboxAggregator {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        membership: Arc<MembershipGate>,
    ) -> Self {
        Self {
            store,
            clock,
            membership,
        }
    }

    /// 把私聊消息累加到接收者的会话条目上；同一条消息只计一次
    pub async fn on_direct_message(
        &self,
        recipient: &UserId,
        message: &Message,
    ) -> Result<bool, ApplicationError> {
        let ConversationId::Direct(thread_id) = &message.conversation else {
            return Err(DomainError::validation_error(
                "conversation",
                "inbox aggregation only applies to direct messages",
            )
            .into());
        };
        if !thread_id.includes(recipient) || recipient == &message.author_id {
            return Ok(false);
        }

        let item_id = InboxItem::direct_item_id(thread_id);
        let updated = self
            .store
            .transact(
                &paths::inbox_item(recipient, &item_id),
                |item: &mut Option<InboxItem>| {
                    if let Some(existing) = item.as_mut() {
                        return existing.record_direct_message(message).then_some(());
                    }
                    *item = Some(InboxItem::from_direct_message(thread_id, message));
                    Some(())
                },
            )
            .await?
            .is_some();

        if updated {
            tracing::debug!(
                user_id = %recipient,
                item_id = %item_id,
                message_id = %message.id,
                "私聊收件箱条目已更新"
            );
        }
        Ok(updated)
    }

    /// 邀请条目不存在时补建（邀请本身通常已随条目一起写入）
    pub async fn on_invite_created(&self, invite: &Invite) -> Result<bool, ApplicationError> {
        if !self
            .store
            .exists(&paths::invite(&invite.room_id, &invite.target_user_id))
            .await?
        {
            return Ok(false);
        }
        let Some(room) = self.membership.get_room(&invite.room_id).await? else {
            return Ok(false);
        };

        let created = self
            .store
            .transact(
                &paths::inbox_item(&invite.target_user_id, &invite.inbox_item_id),
                |item: &mut Option<InboxItem>| {
                    if item.is_some() {
                        return None;
                    }
                    *item = Some(InboxItem::from_invite(invite, room.name.as_str()));
                    Some(())
                },
            )
            .await?
            .is_some();
        if created {
            tracing::debug!(
                user_id = %invite.target_user_id,
                room_id = %invite.room_id,
                "邀请收件箱条目已补建"
            );
        }
        Ok(created)
    }

    pub async fn mark_as_read(
        &self,
        user_id: &UserId,
        item_id: &str,
    ) -> Result<bool, ApplicationError> {
        Ok(self
            .store
            .transact(
                &paths::inbox_item(user_id, item_id),
                |item: &mut Option<InboxItem>| {
                    let item = item.as_mut()?;
                    item.mark_read();
                    Some(())
                },
            )
            .await?
            .is_some())
    }

    /// 把所有未读条目标记为已读，返回条目数
    pub async fn mark_all_read(&self, user_id: &UserId) -> Result<usize, ApplicationError> {
        let unread: Vec<String> = self
            .items(user_id)
            .await?
            .into_iter()
            .filter(|(_, item)| item.unread)
            .map(|(key, _)| key)
            .collect();
        self.mark_items_read(user_id, &unread).await
    }

    /// 逐条在事务里标记；读取之后被删除的条目直接跳过，不会留下残缺文档
    async fn mark_items_read(
        &self,
        user_id: &UserId,
        item_ids: &[String],
    ) -> Result<usize, ApplicationError> {
        let mut marked = 0;
        for item_id in item_ids {
            if self.mark_as_read(user_id, item_id).await? {
                marked += 1;
            }
        }
        tracing::debug!(user_id = %user_id, marked, "收件箱已全部标记为已读");
        Ok(marked)
    }

    /// 接受邀请：删除邀请与条目并加入房间，同一批次提交
    pub async fn accept_invite(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<RoomMember, ApplicationError> {
        let invite_path = paths::invite(room_id, user_id);
        let Some(invite) = self.store.get_json::<Invite>(&invite_path).await? else {
            return Err(ApplicationError::not_found(
                "invite",
                InviteId::for_target(room_id, user_id),
            ));
        };

        let mut batch = WriteBatch::new();
        batch
            .remove(invite_path)
            .remove(paths::inbox_item(user_id, &invite.inbox_item_id));

        if self.membership.is_banned(room_id, user_id).await? {
            self.store.update(batch).await?;
            return Err(ApplicationError::Banned {
                room_id: room_id.clone(),
            });
        }
        match self.membership.get_room(room_id).await? {
            Some(room) if room.is_active() => {}
            _ => {
                self.store.update(batch).await?;
                return Err(ApplicationError::not_found("room", room_id));
            }
        }

        let member = match self.membership.get_member(room_id, user_id).await? {
            Some(existing) => existing,
            None => {
                let member = RoomMember::member(room_id.clone(), user_id.clone(), self.clock.now());
                batch.set_json(paths::member(room_id, user_id), &member)?;
                member
            }
        };
        self.store.update(batch).await?;
        self.membership.confirm_not_banned(room_id, user_id).await?;

        tracing::info!(room_id = %room_id, user_id = %user_id, "邀请已接受");
        Ok(member)
    }

    /// 拒绝邀请；邀请不存在时什么也不做
    pub async fn decline_invite(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<bool, ApplicationError> {
        let invite_path = paths::invite(room_id, user_id);
        let Some(invite) = self.store.get_json::<Invite>(&invite_path).await? else {
            return Ok(false);
        };
        let mut batch = WriteBatch::new();
        batch
            .remove(invite_path)
            .remove(paths::inbox_item(user_id, &invite.inbox_item_id));
        self.store.update(batch).await?;
        tracing::info!(room_id = %room_id, user_id = %user_id, "邀请已拒绝");
        Ok(true)
    }

    /// 删除已读条目，未读条目保留
    pub async fn clear_inbox(&self, user_id: &UserId) -> Result<usize, ApplicationError> {
        let mut cleared = 0;
        for (key, item) in self.items(user_id).await? {
            if item.unread {
                continue;
            }
            // 读取之后可能又收到新消息，逐条在事务里复核
            let removed = self
                .store
                .transact(
                    &paths::inbox_item(user_id, &key),
                    |current: &mut Option<InboxItem>| {
                        if !current.as_ref().is_some_and(|item| !item.unread) {
                            return None;
                        }
                        *current = None;
                        Some(())
                    },
                )
                .await?;
            if removed.is_some() {
                cleared += 1;
            }
        }
        tracing::debug!(user_id = %user_id, cleared, "已清理收件箱");
        Ok(cleared)
    }

    async fn items(&self, user_id: &UserId) -> Result<Vec<(String, InboxItem)>, ApplicationError> {
        Ok(self
            .store
            .children::<InboxItem>(&paths::inbox(user_id))
            .await?)
    }

    /// 收件箱，最新的在前
    pub async fn feed(&self, user_id: &UserId) -> Result<Vec<InboxItem>, ApplicationError> {
        let mut items: Vec<InboxItem> = self
            .items(user_id)
            .await?
            .into_iter()
            .map(|(_, item)| item)
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    pub async fn badge(&self, user_id: &UserId) -> Result<InboxBadge, ApplicationError> {
        let items = self.items(user_id).await?;
        Ok(InboxBadge::from_items(items.iter().map(|(_, item)| item)))
    }
}
