use async_trait::async_trait;
use domain::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io failed: {0}")]
    Io(String),
    #[error("journal corrupted: {0}")]
    Corrupted(String),
}

impl JournalError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}

/// 消息日志的持久化后端。
///
/// `append` 在消息对订阅者可见之前调用；`load` 在启动时按房间、按序列号顺序返回全部历史。
#[async_trait]
pub trait MessageJournal: Send + Sync {
    async fn load(&self) -> Result<Vec<Message>, JournalError>;
    async fn append(&self, message: &Message) -> Result<(), JournalError>;
}
