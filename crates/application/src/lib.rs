//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：有序消息日志、订阅分发、会话身份网关，
//! 以及对外部适配器（身份提供方、对象存储、日志持久化）的抽象。

pub mod blob_store;
pub mod broker;
pub mod error;
pub mod identity;
pub mod journal;
pub mod message_log;
pub mod replay;
pub mod services;
pub mod session_gate;

pub use blob_store::{BlobStore, BlobStoreError};
pub use broker::{Subscription, SubscriptionBroker, SubscriptionHandle};
pub use error::ApplicationError;
pub use identity::{IdentityError, IdentityListenerId, IdentityProvider};
pub use journal::{JournalError, MessageJournal};
pub use message_log::{AppendListener, Attachment, InMemoryMessageLog, ListenerId, MessageLog};
pub use replay::ReplayCursor;
pub use services::{
    ChatService, ChatServiceDependencies, ChatSession, ChatSettings, IdentityOutcome,
    SendMessageRequest, Snapshot,
};
pub use session_gate::{SessionGate, SessionTransition};
