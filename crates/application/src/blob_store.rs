use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("local file not found: {0}")]
    NotFound(PathBuf),
    #[error("upload failed: {0}")]
    Upload(String),
}

impl BlobStoreError {
    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload(message.into())
    }
}

/// 外部对象存储：上传本地文件并返回可公开访问的地址。
///
/// 聊天核心只接收返回的 URL，从不接触文件内容。
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, local_file: &Path) -> Result<String, BlobStoreError>;
}
