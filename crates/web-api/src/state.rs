use std::path::PathBuf;
use std::sync::Arc;

use application::ChatService;
use domain::SignInProvider;
use infrastructure::JwtIdentityVerifier;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub identity_verifier: Arc<JwtIdentityVerifier>,
    /// 登录页可选的身份提供方
    pub sign_in_providers: Vec<SignInProvider>,
    /// 对外提供图片文件的目录
    pub blob_directory: PathBuf,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        identity_verifier: Arc<JwtIdentityVerifier>,
        sign_in_providers: Vec<SignInProvider>,
        blob_directory: PathBuf,
    ) -> Self {
        Self {
            chat_service,
            identity_verifier,
            sign_in_providers,
            blob_directory,
        }
    }
}
