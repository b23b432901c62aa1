//! 引擎装配：构建全部组件并注册后台任务

use std::sync::Arc;

use config::AppConfig;
use domain::{RoomId, RoomVisibility, UserId};

use crate::broadcaster::EventBus;
use crate::clock::Clock;
use crate::delivery::DeliveryDispatcher;
use crate::error::ApplicationError;
use crate::event_bridge::EventBridge;
use crate::inbox::InboxAggregator;
use crate::membership::MembershipGate;
use crate::messaging::MessageService;
use crate::presence::PresenceTracker;
use crate::rate_limiter::RateLimitGuard;
use crate::read_state::ReadStateTracker;
use crate::room_lifecycle::RoomLifecycleManager;
use crate::scheduler::Scheduler;
use crate::session::{SessionId, SessionRegistry};
use crate::store::Store;

pub struct EngineDependencies {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub config: AppConfig,
}

pub struct ChatEngine {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub sessions: Arc<SessionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub rate_limiter: Arc<RateLimitGuard>,
    pub rooms: Arc<RoomLifecycleManager>,
    pub membership: Arc<MembershipGate>,
    pub messages: Arc<MessageService>,
    pub read_state: Arc<ReadStateTracker>,
    pub inbox: Arc<InboxAggregator>,
}

impl ChatEngine {
    pub fn new(deps: EngineDependencies) -> Self {
        let EngineDependencies {
            store,
            clock,
            config,
        } = deps;

        let events = EventBus::new(config.events.capacity);
        let sessions = Arc::new(SessionRegistry::new(store.clone(), clock.clone()));
        let presence = Arc::new(PresenceTracker::new(
            store.clone(),
            sessions.clone(),
            clock.clone(),
            config.presence.clone(),
        ));
        let rate_limiter = Arc::new(RateLimitGuard::new(
            config.rate_limit.clone(),
            clock.clone(),
        ));
        let rooms = Arc::new(RoomLifecycleManager::new(
            store.clone(),
            sessions.clone(),
            clock.clone(),
            events.clone(),
            config.rooms.clone(),
        ));
        let membership = Arc::new(MembershipGate::new(store.clone(), clock.clone()));
        let messages = Arc::new(MessageService::new(
            store.clone(),
            clock.clone(),
            rate_limiter.clone(),
            membership.clone(),
        ));
        let read_state = Arc::new(ReadStateTracker::new(
            store.clone(),
            sessions.clone(),
            membership.clone(),
        ));
        let inbox = Arc::new(InboxAggregator::new(
            store.clone(),
            clock.clone(),
            membership.clone(),
        ));

        Self {
            config,
            store,
            clock,
            events,
            sessions,
            presence,
            rate_limiter,
            rooms,
            membership,
            messages,
            read_state,
            inbox,
        }
    }

    /// 启动事件桥接、投递分发与全部周期任务
    pub fn start(&self) -> Scheduler {
        let mut scheduler = Scheduler::new();

        // 两个订阅都在 spawn 之前建立
        let bridge = EventBridge::new(self.store.clone(), self.events.clone());
        let changes = bridge.subscribe();
        scheduler.spawn("event_bridge", bridge.run(changes, scheduler.token()));

        let dispatcher = DeliveryDispatcher::new(self.read_state.clone(), self.inbox.clone());
        let stream = self.events.subscribe();
        scheduler.spawn("delivery", dispatcher.run(stream, scheduler.token()));

        let rooms = self.rooms.clone();
        scheduler.every("room_reaper", self.config.rooms.reap_interval(), move || {
            let rooms = rooms.clone();
            async move {
                rooms.reap_expired().await?;
                Ok(())
            }
        });

        let rooms = self.rooms.clone();
        let presence = self.presence.clone();
        scheduler.every(
            "abandoned_room_sweep",
            self.config.rooms.sweep_interval(),
            move || {
                let rooms = rooms.clone();
                let presence = presence.clone();
                async move {
                    rooms.auto_close_abandoned(&presence).await?;
                    Ok(())
                }
            },
        );

        let rate_limiter = self.rate_limiter.clone();
        scheduler.every(
            "rate_limit_eviction",
            self.config.rate_limit.eviction_interval(),
            move || {
                let rate_limiter = rate_limiter.clone();
                async move {
                    rate_limiter.evict_idle();
                    Ok(())
                }
            },
        );

        let sessions = self.sessions.clone();
        let presence = self.presence.clone();
        let rooms = self.rooms.clone();
        let read_state = self.read_state.clone();
        let timeout = self.config.session.liveness_timeout();
        scheduler.every(
            "session_liveness",
            self.config.session.liveness_check_interval(),
            move || {
                let sessions = sessions.clone();
                let presence = presence.clone();
                let rooms = rooms.clone();
                let read_state = read_state.clone();
                async move {
                    for session in sessions.expire_stale(timeout).await? {
                        presence.forget_session(session);
                        rooms.forget_session(session);
                        read_state.forget_session(session);
                    }
                    Ok(())
                }
            },
        );

        tracing::info!(tasks = scheduler.task_count(), "引擎已启动");
        scheduler
    }

    /// 新连接：打开会话、标记上线、接管房主断线钩子
    pub async fn connect(&self, user_id: &UserId) -> Result<SessionId, ApplicationError> {
        let session = self.sessions.open(user_id.clone());
        if let Err(err) = self.attach(session, user_id).await {
            // 半初始化的会话直接结束，已登记的钩子照常提交
            if let Err(close_err) = self.end_session(session).await {
                tracing::warn!(%session, error = ?close_err, "回滚会话失败");
            }
            return Err(err);
        }
        Ok(session)
    }

    async fn attach(&self, session: SessionId, user_id: &UserId) -> Result<(), ApplicationError> {
        self.presence.mark_online(session, user_id).await?;
        self.rooms.bind_owner_presence(session, user_id).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, session: SessionId) -> Result<(), ApplicationError> {
        let user_id = self.session_user(session)?;
        self.presence.heartbeat(session, &user_id).await
    }

    /// 主动退出：立即写 offline，其余钩子随会话结束提交
    pub async fn sign_out(&self, session: SessionId) -> Result<(), ApplicationError> {
        let user_id = self.session_user(session)?;
        self.presence.mark_offline(session, &user_id).await?;
        self.end_session(session).await?;
        Ok(())
    }

    /// 连接断开：提交会话上的全部断线钩子
    pub async fn end_session(&self, session: SessionId) -> Result<usize, ApplicationError> {
        let writes = self.sessions.close(session).await?;
        self.presence.forget_session(session);
        self.rooms.forget_session(session);
        self.read_state.forget_session(session);
        Ok(writes)
    }

    /// 以会话身份创建房间，房主的每个会话都立即为新房间登记断线钩子
    pub async fn create_room(
        &self,
        session: SessionId,
        name: &str,
        visibility: RoomVisibility,
    ) -> Result<RoomId, ApplicationError> {
        let owner_id = self.session_user(session)?;
        let room_id = self.rooms.create_room(name, visibility, &owner_id).await?;
        for owner_session in self.sessions.sessions_of(&owner_id) {
            self.rooms.bind_owner_presence(owner_session, &owner_id).await?;
        }
        Ok(room_id)
    }

    fn session_user(&self, session: SessionId) -> Result<UserId, ApplicationError> {
        self.sessions
            .user_of(session)
            .ok_or_else(|| ApplicationError::not_found("session", session))
    }
}
