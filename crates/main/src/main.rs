//! 主应用程序入口
//!
//! 加载配置，组装消息日志、对象存储与聊天服务，启动 Axum Web 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{
    ChatService, ChatServiceDependencies, ChatSettings, InMemoryMessageLog, MessageLog,
};
use config::AppConfig;
use domain::{RoomName, SignInProvider};
use infrastructure::{FsBlobStore, JsonlJournal, JwtIdentityVerifier};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置已加载");
    if config.identity.uses_development_secret() {
        tracing::warn!("正在使用开发环境 JWT 密钥，请勿用于生产环境");
    }

    let settings = ChatSettings {
        default_room: RoomName::parse(&config.chat.default_room)?,
        max_message_length: config.chat.max_message_length,
        replay_page_size: config.chat.replay_page_size,
    };
    let sign_in_providers = config
        .identity
        .sign_in_providers
        .iter()
        .map(|name| name.parse::<SignInProvider>())
        .collect::<Result<Vec<_>, _>>()?;

    // 消息日志：配置了持久化目录时启动前回放历史
    let message_log: Arc<dyn MessageLog> = match &config.chat.journal_dir {
        Some(dir) => {
            let journal = JsonlJournal::open(dir)
                .await
                .with_context(|| format!("打开消息日志目录 {} 失败", dir.display()))?;
            let log = InMemoryMessageLog::with_journal(Arc::new(journal))
                .await
                .context("回放消息日志失败")?;
            tracing::info!(journal_dir = %dir.display(), "消息持久化已启用");
            Arc::new(log)
        }
        None => {
            tracing::info!("未配置持久化目录，消息仅保存在内存中");
            Arc::new(InMemoryMessageLog::new())
        }
    };

    let blob_store = FsBlobStore::new(&config.blob.directory, &config.blob.public_base_url);
    tokio::fs::create_dir_all(blob_store.directory())
        .await
        .with_context(|| format!("创建图片目录 {} 失败", config.blob.directory.display()))?;

    let chat_service = ChatService::new(ChatServiceDependencies {
        message_log,
        blob_store: Arc::new(blob_store),
        settings,
    });

    let state = AppState::new(
        Arc::new(chat_service),
        Arc::new(JwtIdentityVerifier::new(&config.identity.jwt_secret)),
        sign_in_providers,
        config.blob.directory.clone(),
    );

    // 启动 Web 服务器
    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("监听 {address} 失败"))?;

    tracing::info!(address = %address, "聊天服务器已启动");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("聊天服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
    }
}
