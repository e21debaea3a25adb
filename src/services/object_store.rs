//! src/services/object_store.rs
//!
//! Blob storage behind the [`ObjectStore`] trait. [`LocalObjectStore`] keeps
//! payloads on disk beneath `base_path/{bucket}/{key}`.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_COMPONENT_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("invalid object location `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Durable binary storage addressed by `(bucket, key)`.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Store `body` under `key`, replacing any previous payload.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<()>;

    /// Read a payload back. Missing keys yield [`ObjectStoreError::NotFound`].
    async fn get(&self, bucket: &str, key: &str) -> ObjectStoreResult<Bytes>;

    /// Remove a payload. Deleting a missing key succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()>;

    /// Readiness probe.
    async fn check(&self) -> ObjectStoreResult<()>;
}

#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Root directory for every bucket.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject locations that could resolve outside `base_path/{bucket}`.
    fn ensure_location_safe(bucket: &str, key: &str) -> ObjectStoreResult<()> {
        let invalid = || ObjectStoreError::InvalidKey(format!("{bucket}/{key}"));

        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            return Err(invalid());
        }
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN || key.starts_with('/') {
            return Err(invalid());
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        if !Path::new(key).components().all(|c| match c {
            Component::Normal(part) => part.len() <= MAX_COMPONENT_LEN,
            _ => false,
        }) {
            return Err(invalid());
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_root(bucket).join(key)
    }

    /// Remove empty directories from `start` upwards, stopping at `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Writes to a temp file, fsyncs, then renames into place.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<()> {
        Self::ensure_location_safe(bucket, key)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ObjectStoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        debug!(
            bucket,
            key,
            content_type,
            size_bytes = body.len(),
            "stored object payload"
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> ObjectStoreResult<Bytes> {
        Self::ensure_location_safe(bucket, key)?;
        match fs::read(self.object_path(bucket, key)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        Self::ensure_location_safe(bucket, key)?;

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed object payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("object payload {} already missing", file_path.display());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(bucket)).await;
        }
        Ok(())
    }

    /// Write, read back and delete a probe file under `base_path`.
    async fn check(&self) -> ObjectStoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(ObjectStoreError::Io(io::Error::other(
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}
