//! 会话身份网关
//!
//! 每个连接持有一个网关：向身份提供方注册唯一的监听器，把登录状态变化映射为
//! 用于标记消息作者的显示名称，并告知调用方应当挂载还是卸载订阅。

use std::sync::Arc;

use domain::{DisplayName, IdentityEvent, SignInProvider};
use tokio::sync::mpsc;

use crate::identity::{IdentityError, IdentityListenerId, IdentityProvider};

/// 处理身份事件后会话的状态变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    /// 已登录，调用方应（重新）挂载订阅
    SignedIn(DisplayName),
    /// 已登出，调用方应卸载订阅；网关已请求登录流程
    SignedOut,
    /// 登录被取消或身份提供方失败；会话回到匿名但不会被销毁
    SignInCancelled(IdentityError),
}

struct Registration {
    id: IdentityListenerId,
    events: mpsc::UnboundedReceiver<IdentityEvent>,
}

pub struct SessionGate {
    provider: Arc<dyn IdentityProvider>,
    providers: Vec<SignInProvider>,
    display_name: DisplayName,
    registration: Option<Registration>,
}

impl SessionGate {
    pub fn new(provider: Arc<dyn IdentityProvider>, providers: Vec<SignInProvider>) -> Self {
        Self {
            provider,
            providers,
            display_name: DisplayName::anonymous(),
            registration: None,
        }
    }

    pub fn display_name(&self) -> &DisplayName {
        &self.display_name
    }

    pub fn is_signed_in(&self) -> bool {
        !self.display_name.is_anonymous()
    }

    pub fn is_attached(&self) -> bool {
        self.registration.is_some()
    }

    /// 注册身份监听器；已注册时为无操作并返回 `false`。
    pub async fn attach(&mut self) -> bool {
        if self.registration.is_some() {
            return false;
        }
        let (sender, events) = mpsc::unbounded_channel();
        let id = self.provider.add_listener(sender).await;
        self.registration = Some(Registration { id, events });
        tracing::debug!(listener_id = id.0, "身份监听器已注册");
        true
    }

    /// 释放身份监听器，之后不会再收到任何事件。
    pub async fn detach(&mut self) -> bool {
        let Some(registration) = self.registration.take() else {
            return false;
        };
        self.provider.remove_listener(registration.id).await;
        tracing::debug!(listener_id = registration.id.0, "身份监听器已释放");
        true
    }

    /// 等待下一条身份事件；未注册或提供方已关闭时返回 `None`。
    pub async fn next_event(&mut self) -> Option<IdentityEvent> {
        self.registration.as_mut()?.events.recv().await
    }

    /// 取出已到达但尚未处理的身份事件
    pub fn pending_events(&mut self) -> Vec<IdentityEvent> {
        let Some(registration) = self.registration.as_mut() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        while let Ok(event) = registration.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn on_identity_event(&mut self, event: IdentityEvent) -> SessionTransition {
        if let Some(name) = event.display_name() {
            tracing::info!(display_name = %name, "会话已登录");
            self.display_name = name.clone();
            return SessionTransition::SignedIn(name);
        }

        self.display_name = DisplayName::anonymous();
        tracing::info!("会话已登出，重置为匿名");

        match self.provider.begin_sign_in(&self.providers).await {
            Ok(()) => SessionTransition::SignedOut,
            Err(err) => self.sign_in_cancelled(err),
        }
    }

    /// 登录流程被取消或失败：回到匿名，不销毁会话
    pub fn sign_in_cancelled(&mut self, error: IdentityError) -> SessionTransition {
        tracing::warn!(error = %error, "登录已取消");
        self.display_name = DisplayName::anonymous();
        SessionTransition::SignInCancelled(error)
    }

    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        self.provider.sign_out().await
    }
}
