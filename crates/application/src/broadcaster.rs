//! 进程内事件总线
//!
//! 基于 tokio broadcast 的类型化发布订阅，替代按路径注册的原始回调。

use domain::{ChatEvent, RoomId};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 发布事件，返回收到事件的订阅者数量（没有订阅者时为 0）
    pub fn publish(&self, event: ChatEvent) -> usize {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(kind, receivers, "事件已发布");
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.sender.subscribe(), None)
    }

    /// 只接收与某个房间相关的事件
    pub fn subscribe_room(&self, room_id: RoomId) -> EventStream {
        EventStream::new(self.sender.subscribe(), Some(room_id))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub struct EventStream {
    receiver: broadcast::Receiver<ChatEvent>,
    room_id: Option<RoomId>,
}

impl EventStream {
    pub fn new(receiver: broadcast::Receiver<ChatEvent>, room_id: Option<RoomId>) -> Self {
        Self { receiver, room_id }
    }

    fn accepts(&self, event: &ChatEvent) -> bool {
        match &self.room_id {
            Some(room_id) => event.room_id() == Some(room_id),
            None => true,
        }
    }

    pub async fn recv(&mut self) -> Option<ChatEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "事件订阅者处理过慢，部分事件被丢弃");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{CloseReason, UserId};

    fn closed(room: &str) -> ChatEvent {
        ChatEvent::RoomClosed {
            room_id: RoomId::parse(room).unwrap(),
            members: vec![UserId::parse("alice").unwrap()],
            reason: CloseReason::Expired,
        }
    }

    #[tokio::test]
    async fn room_stream_filters_other_rooms() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe_room(RoomId::parse("r2").unwrap());

        bus.publish(closed("r1"));
        bus.publish(closed("r2"));

        assert_eq!(stream.recv().await, Some(closed("r2")));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(closed("r1")), 0);
        let _stream = bus.subscribe();
        assert_eq!(bus.publish(closed("r1")), 1);
    }
}
