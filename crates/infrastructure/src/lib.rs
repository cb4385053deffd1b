//! 基础设施层实现。
//!
//! 提供消息日志持久化、图片对象存储、外部身份断言校验等适配器，实现应用层定义的接口。

pub mod blob_store;
pub mod identity;
pub mod journal;

pub use blob_store::FsBlobStore;
pub use identity::{IdentityClaims, JwtIdentityProvider, JwtIdentityVerifier, SignInPrompt};
pub use journal::JsonlJournal;
