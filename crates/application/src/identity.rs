use async_trait::async_trait;
use domain::{IdentityEvent, SignInProvider};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("sign-in cancelled")]
    Cancelled,
    #[error("invalid identity assertion: {0}")]
    InvalidAssertion(String),
    #[error("identity provider failed: {0}")]
    Provider(String),
}

impl IdentityError {
    pub fn invalid_assertion(message: impl Into<String>) -> Self {
        Self::InvalidAssertion(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }
}

/// 身份监听器注册标识，由身份提供方分配。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityListenerId(pub u64);

/// 外部身份提供方。
///
/// 登录状态变化通过注册的 channel 推送；移除监听器后提供方必须丢弃对应的 sender。
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn add_listener(&self, sender: mpsc::UnboundedSender<IdentityEvent>)
        -> IdentityListenerId;

    async fn remove_listener(&self, id: IdentityListenerId);

    /// 请求外部登录流程（例如向客户端展示登录页）
    async fn begin_sign_in(&self, providers: &[SignInProvider]) -> Result<(), IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}
