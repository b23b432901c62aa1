//! 把存储的原始路径变更翻译成类型化的 [`ChatEvent`]

use std::sync::Arc;

use domain::{ChatEvent, Invite, Message, PresenceRecord, Room, RoomId, RoomMember, UserId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::broadcaster::EventBus;
use crate::store::{path, paths, Store, StoreChange, Subscription};

pub struct EventBridge {
    store: Arc<dyn Store>,
    events: EventBus,
}

impl EventBridge {
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// 订阅整棵树；需在启动 [`run`](Self::run) 之前调用，保证之后的写入都不会丢
    pub fn subscribe(&self) -> Subscription {
        self.store.subscribe("")
    }

    /// 消费变更直到取消或存储关闭
    pub async fn run(self, mut changes: Subscription, token: CancellationToken) {
        tracing::info!("事件桥接已启动");
        loop {
            let change = tokio::select! {
                _ = token.cancelled() => break,
                change = changes.next() => change,
            };
            let Some(change) = change else {
                break;
            };
            for event in self.translate(&change).await {
                self.events.publish(event);
            }
        }
        tracing::info!("事件桥接已停止");
    }

    /// 一条路径变更对应零个或一个事件
    pub async fn translate(&self, change: &StoreChange) -> Vec<ChatEvent> {
        let Ok(segments) = path::segments(&change.path) else {
            return Vec::new();
        };
        let event = match segments.as_slice() {
            [paths::ROOMS, room_id, ..] => self.room_changed(room_id).await,
            [paths::MESSAGES, _, _] => decode::<Message>(change.value.as_ref())
                .map(ChatEvent::MessageAppended),
            [paths::PRESENCE, user_id, ..] => self.presence_changed(user_id).await,
            [paths::MEMBERS, room_id, user_id] => {
                match (RoomId::parse(*room_id), UserId::parse(*user_id)) {
                    (Ok(room_id), Ok(user_id)) => Some(ChatEvent::MembershipChanged {
                        room_id,
                        user_id,
                        member: decode::<RoomMember>(change.value.as_ref()),
                    }),
                    _ => None,
                }
            }
            [paths::INVITES, room_id, user_id] => match change.value.as_ref() {
                Some(value) => decode::<Invite>(Some(value)).map(ChatEvent::InviteCreated),
                None => match (RoomId::parse(*room_id), UserId::parse(*user_id)) {
                    (Ok(room_id), Ok(user_id)) => {
                        Some(ChatEvent::InviteRemoved { room_id, user_id })
                    }
                    _ => None,
                },
            },
            _ => None,
        };
        event.into_iter().collect()
    }

    /// 字段级变更后重新读取整个房间
    async fn room_changed(&self, room_id: &str) -> Option<ChatEvent> {
        let room_id = RoomId::parse(room_id).ok()?;
        let room = match self.store.get(&paths::room(&room_id)).await {
            Ok(value) => decode::<Room>(value.as_ref()),
            Err(err) => {
                tracing::warn!(room_id = %room_id, error = %err, "读取房间失败");
                return None;
            }
        };
        Some(ChatEvent::RoomChanged { room_id, room })
    }

    async fn presence_changed(&self, user_id: &str) -> Option<ChatEvent> {
        let user_id = UserId::parse(user_id).ok()?;
        let value = self.store.get(&paths::presence(&user_id)).await.ok()??;
        decode::<PresenceRecord>(Some(&value)).map(ChatEvent::PresenceChanged)
    }
}

fn decode<T: DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    serde_json::from_value(value?.clone()).ok()
}
