use domain::DomainError;
use thiserror::Error;

use crate::{blob_store::BlobStoreError, identity::IdentityError, journal::JournalError};

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

impl ApplicationError {
    /// 是否为调用方输入不合法导致的错误（不应自动重试）
    pub fn is_validation(&self) -> bool {
        matches!(self, ApplicationError::Domain(err) if err.is_validation())
    }
}
