//! 临时聊天室系统核心领域模型
//!
//! 包含房间、成员、邀请、消息、私聊会话、已读游标、收件箱和在线状态等实体，
//! 以及由存储变更派生出的类型化领域事件。本 crate 不做任何 I/O。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
