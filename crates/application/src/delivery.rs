//! 投递分发：把新消息与邀请事件转交给已读状态和收件箱

use std::sync::Arc;

use domain::{ChatEvent, ConversationId};
use tokio_util::sync::CancellationToken;

use crate::broadcaster::EventStream;
use crate::error::ApplicationError;
use crate::inbox::InboxAggregator;
use crate::read_state::ReadStateTracker;

pub struct DeliveryDispatcher {
    read_state: Arc<ReadStateTracker>,
    inbox: Arc<InboxAggregator>,
}

impl DeliveryDispatcher {
    pub fn new(read_state: Arc<ReadStateTracker>, inbox: Arc<InboxAggregator>) -> Self {
        Self { read_state, inbox }
    }

    /// 消费事件直到取消；单个事件处理失败只记录日志
    pub async fn run(self, mut events: EventStream, token: CancellationToken) {
        tracing::info!("投递分发已启动");
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            if let Err(err) = self.handle(&event).await {
                tracing::warn!(kind = event.kind(), error = ?err, "事件处理失败");
            }
        }
        tracing::info!("投递分发已停止");
    }

    pub async fn handle(&self, event: &ChatEvent) -> Result<(), ApplicationError> {
        match event {
            ChatEvent::MessageAppended(message) if !message.is_system() => {
                self.read_state
                    .on_new_message(
                        &message.conversation,
                        &message.id,
                        &message.author_id,
                        message.created_at,
                    )
                    .await?;
                if let ConversationId::Direct(thread_id) = &message.conversation {
                    if let Some(recipient) = thread_id.peer_of(&message.author_id) {
                        self.inbox.on_direct_message(&recipient, message).await?;
                    }
                }
                Ok(())
            }
            ChatEvent::InviteCreated(invite) => {
                self.inbox.on_invite_created(invite).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
