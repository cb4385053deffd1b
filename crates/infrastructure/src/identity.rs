//! 基于 JWT 断言的身份提供方
//!
//! 客户端在外部完成登录后，把签名令牌交给服务端；服务端校验令牌并把结果
//! 作为身份事件推送给已注册的监听器。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use application::{IdentityError, IdentityListenerId, IdentityProvider};
use async_trait::async_trait;
use domain::{IdentityEvent, SignInProvider};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

/// 身份令牌 Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// HS256 身份令牌的签发与校验
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// 签发令牌，主要供测试与开发工具使用
    pub fn issue(
        &self,
        subject: &str,
        name: Option<&str>,
        ttl: chrono::Duration,
    ) -> Result<String, IdentityError> {
        let claims = IdentityClaims {
            sub: subject.to_string(),
            name: name.map(str::to_string),
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| IdentityError::provider(format!("token generation failed: {err}")))
    }

    /// 校验令牌并转换为登录事件；缺少显示名称的令牌视为未登录
    pub fn verify(&self, token: &str) -> Result<IdentityEvent, IdentityError> {
        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| IdentityError::invalid_assertion(err.to_string()))?;

        match claims.name.filter(|name| !name.trim().is_empty()) {
            Some(name) => Ok(IdentityEvent::signed_in(name)),
            None => {
                tracing::debug!(subject = %claims.sub, "令牌缺少显示名称，按未登录处理");
                Ok(IdentityEvent::signed_out())
            }
        }
    }
}

/// 请求客户端展示登录页
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignInPrompt {
    pub providers: Vec<SignInProvider>,
}

struct ProviderState {
    current: IdentityEvent,
    listeners: HashMap<u64, mpsc::UnboundedSender<IdentityEvent>>,
}

/// 每个连接一个实例：令牌断言驱动登录状态，登录请求以 [`SignInPrompt`] 形式交给传输层。
pub struct JwtIdentityProvider {
    verifier: Arc<JwtIdentityVerifier>,
    state: Mutex<ProviderState>,
    next_id: AtomicU64,
    prompts: mpsc::UnboundedSender<SignInPrompt>,
}

impl JwtIdentityProvider {
    pub fn new(verifier: Arc<JwtIdentityVerifier>) -> (Self, mpsc::UnboundedReceiver<SignInPrompt>) {
        let (prompts, prompt_rx) = mpsc::unbounded_channel();
        let provider = Self {
            verifier,
            state: Mutex::new(ProviderState {
                current: IdentityEvent::signed_out(),
                listeners: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            prompts,
        };
        (provider, prompt_rx)
    }

    /// 客户端提交令牌；校验失败时回到未登录状态，已登录的监听器会收到登出事件。
    pub async fn assert_identity(&self, token: &str) -> Result<IdentityEvent, IdentityError> {
        match self.verifier.verify(token) {
            Ok(event) => {
                self.publish(event.clone()).await;
                Ok(event)
            }
            Err(err) => {
                let signed_in = self.state.lock().await.current.display_name().is_some();
                if signed_in {
                    self.publish(IdentityEvent::signed_out()).await;
                }
                Err(err)
            }
        }
    }

    pub async fn listener_count(&self) -> usize {
        self.state.lock().await.listeners.len()
    }

    async fn publish(&self, event: IdentityEvent) {
        let mut state = self.state.lock().await;
        state.current = event.clone();
        state
            .listeners
            .retain(|_, listener| listener.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn add_listener(
        &self,
        sender: mpsc::UnboundedSender<IdentityEvent>,
    ) -> IdentityListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        // 注册时立即推送当前状态
        if sender.send(state.current.clone()).is_ok() {
            state.listeners.insert(id, sender);
        }
        IdentityListenerId(id)
    }

    async fn remove_listener(&self, id: IdentityListenerId) {
        self.state.lock().await.listeners.remove(&id.0);
    }

    async fn begin_sign_in(&self, providers: &[SignInProvider]) -> Result<(), IdentityError> {
        self.prompts
            .send(SignInPrompt {
                providers: providers.to_vec(),
            })
            .map_err(|_| IdentityError::provider("connection closed"))
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.publish(IdentityEvent::signed_out()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-with-at-least-32-characters";

    fn provider() -> (JwtIdentityProvider, mpsc::UnboundedReceiver<SignInPrompt>, Arc<JwtIdentityVerifier>) {
        let verifier = Arc::new(JwtIdentityVerifier::new(SECRET));
        let (provider, prompts) = JwtIdentityProvider::new(verifier.clone());
        (provider, prompts, verifier)
    }

    #[test]
    fn verify_accepts_issued_token() {
        let verifier = JwtIdentityVerifier::new(SECRET);
        let token = verifier
            .issue("user-1", Some("Alice"), chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), IdentityEvent::signed_in("Alice"));
    }

    #[test]
    fn verify_rejects_foreign_and_expired_tokens() {
        let verifier = JwtIdentityVerifier::new(SECRET);
        let other = JwtIdentityVerifier::new("another-secret-key-with-at-least-32-chars");
        let token = other
            .issue("user-1", Some("Alice"), chrono::Duration::minutes(5))
            .unwrap();
        assert!(matches!(verifier.verify(&token), Err(IdentityError::InvalidAssertion(_))));

        let expired = verifier
            .issue("user-1", Some("Alice"), chrono::Duration::minutes(-10))
            .unwrap();
        assert!(verifier.verify(&expired).is_err());
        assert!(verifier.verify("not-a-token").is_err());
    }

    #[test]
    fn token_without_name_means_signed_out() {
        let verifier = JwtIdentityVerifier::new(SECRET);
        let token = verifier
            .issue("user-1", Some("  "), chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), IdentityEvent::signed_out());
    }

    #[tokio::test]
    async fn listener_receives_current_state_then_changes() {
        let (provider, _prompts, verifier) = provider();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = provider.add_listener(tx).await;

        assert_eq!(rx.recv().await.unwrap(), IdentityEvent::signed_out());

        let token = verifier
            .issue("user-1", Some("Alice"), chrono::Duration::minutes(5))
            .unwrap();
        provider.assert_identity(&token).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), IdentityEvent::signed_in("Alice"));

        provider.sign_out().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), IdentityEvent::signed_out());

        provider.remove_listener(id).await;
        assert_eq!(provider.listener_count().await, 0);
        provider.sign_out().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn invalid_assertion_signs_out_current_identity() {
        let (provider, _prompts, verifier) = provider();
        let (tx, mut rx) = mpsc::unbounded_channel();
        provider.add_listener(tx).await;
        assert_eq!(rx.recv().await.unwrap(), IdentityEvent::signed_out());

        // 未登录时的无效令牌不产生事件
        assert!(provider.assert_identity("garbage").await.is_err());
        assert!(rx.try_recv().is_err());

        let token = verifier
            .issue("user-1", Some("Alice"), chrono::Duration::minutes(5))
            .unwrap();
        provider.assert_identity(&token).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), IdentityEvent::signed_in("Alice"));

        assert!(provider.assert_identity("garbage").await.is_err());
        assert_eq!(rx.recv().await.unwrap(), IdentityEvent::signed_out());

        let (late_tx, mut late_rx) = mpsc::unbounded_channel();
        provider.add_listener(late_tx).await;
        assert_eq!(late_rx.recv().await.unwrap(), IdentityEvent::signed_out());
    }

    #[tokio::test]
    async fn begin_sign_in_emits_prompt() {
        let (provider, mut prompts, _) = provider();
        provider
            .begin_sign_in(&SignInProvider::defaults())
            .await
            .unwrap();
        assert_eq!(
            prompts.recv().await.unwrap().providers,
            vec![SignInProvider::Google, SignInProvider::Email]
        );

        drop(prompts);
        assert!(provider.begin_sign_in(&[SignInProvider::Email]).await.is_err());
    }
}
