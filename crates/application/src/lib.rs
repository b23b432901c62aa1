//! 应用层实现。
//!
//! 围绕领域模型的会话与投递一致性引擎：在线状态、发言限流、房间生命周期、
//! 已读游标与收件箱，全部建立在一个可订阅、支持批量原子写入和事务的
//! 层级存储抽象之上。

pub mod broadcaster;
pub mod clock;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod event_bridge;
pub mod inbox;
pub mod membership;
pub mod messaging;
pub mod presence;
pub mod rate_limiter;
pub mod read_state;
pub mod room_lifecycle;
pub mod scheduler;
pub mod session;
pub mod store;

pub use broadcaster::{EventBus, EventStream};
pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::DeliveryDispatcher;
pub use engine::{ChatEngine, EngineDependencies};
pub use error::ApplicationError;
pub use event_bridge::EventBridge;
pub use inbox::InboxAggregator;
pub use membership::MembershipGate;
pub use messaging::MessageService;
pub use presence::PresenceTracker;
pub use rate_limiter::{DenyReason, RateLimitGuard, RateLimitState, SendCheck};
pub use read_state::ReadStateTracker;
pub use room_lifecycle::{ReapReport, RoomLifecycleManager, SweepReport};
pub use scheduler::Scheduler;
pub use session::{HookHandle, HookScope, SessionId, SessionRegistry};
pub use store::{
    MemoryStore, Store, StoreChange, StoreError, StoreExt, Subscription, TransactionOutcome,
    TransactionStep, WriteBatch,
};
