//! 本地目录实现的对象存储

use std::path::{Path, PathBuf};

use application::{BlobStore, BlobStoreError};
use async_trait::async_trait;
use uuid::Uuid;

/// 把图片复制到公开目录下，以随机文件名对外提供。
pub struct FsBlobStore {
    directory: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(directory: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, local_file: &Path) -> Result<String, BlobStoreError> {
        let metadata = tokio::fs::metadata(local_file)
            .await
            .map_err(|_| BlobStoreError::NotFound(local_file.to_path_buf()))?;
        if !metadata.is_file() {
            return Err(BlobStoreError::NotFound(local_file.to_path_buf()));
        }

        let name = match local_file.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_ascii_lowercase()),
            None => Uuid::new_v4().to_string(),
        };

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|err| BlobStoreError::upload(format!("create directory: {err}")))?;
        let target = self.directory.join(&name);
        let bytes = tokio::fs::copy(local_file, &target)
            .await
            .map_err(|err| BlobStoreError::upload(format!("copy: {err}")))?;

        tracing::info!(
            source = %local_file.display(),
            blob = %name,
            bytes,
            "图片已存入对象存储"
        );
        Ok(format!("{}/{}", self.public_base_url, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_copies_file_and_returns_public_url() {
        let source_dir = tempfile::tempdir().unwrap();
        let blob_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("cat.PNG");
        std::fs::write(&source, b"not really a png").unwrap();

        let store = FsBlobStore::new(blob_dir.path(), "https://cdn.example.com/blobs/");
        let url = store.upload(&source).await.unwrap();

        let name = url
            .strip_prefix("https://cdn.example.com/blobs/")
            .expect("url uses configured base");
        assert!(name.ends_with(".png"));
        assert_eq!(
            std::fs::read(blob_dir.path().join(name)).unwrap(),
            b"not really a png"
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let blob_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(blob_dir.path(), "https://cdn.example.com");
        let err = store
            .upload(Path::new("/definitely/not/here.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobStoreError::NotFound(_)));
    }
}
