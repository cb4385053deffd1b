//! 聊天核心领域模型
//!
//! 包含房间、消息、会话身份等核心值对象与实体，以及相关的校验规则。

pub mod errors;
pub mod identity;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use identity::*;
pub use message::*;
pub use value_objects::*;
