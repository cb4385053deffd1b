#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use application::{ChatService, ChatServiceDependencies, ChatSettings, InMemoryMessageLog};
use axum::Router;
use domain::SignInProvider;
use infrastructure::{FsBlobStore, JwtIdentityVerifier};
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState};

pub const TEST_SECRET: &str = "test-secret-key-with-at-least-32-characters";

pub struct TestApp {
    pub router: Router,
    pub verifier: Arc<JwtIdentityVerifier>,
}

pub fn build_app(blob_dir: &Path) -> TestApp {
    let verifier = Arc::new(JwtIdentityVerifier::new(TEST_SECRET));
    let chat_service = ChatService::new(ChatServiceDependencies {
        message_log: Arc::new(InMemoryMessageLog::new()),
        blob_store: Arc::new(FsBlobStore::new(blob_dir, "http://localhost/blobs")),
        settings: ChatSettings::default(),
    });

    let state = AppState::new(
        Arc::new(chat_service),
        verifier.clone(),
        SignInProvider::defaults(),
        blob_dir.to_path_buf(),
    );

    TestApp {
        router: router(state),
        verifier,
    }
}

pub fn token_for(verifier: &JwtIdentityVerifier, name: &str) -> String {
    verifier
        .issue(&format!("uid-{name}"), Some(name), chrono::Duration::minutes(5))
        .expect("issue token")
}

/// 在随机端口启动服务，返回地址与关闭句柄
pub async fn spawn_server(router: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    (addr, shutdown_tx)
}
