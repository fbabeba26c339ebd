use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::UrlSigner;

#[derive(Debug, Error)]
pub enum StagerError {
    #[error("object store I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error("object size mismatch: declared {declared} bytes, received {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("invalid storage locator `{0}`")]
    InvalidLocator(String),
}

#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub body: Bytes,
}

/// Durable byte storage addressed by `{bucket}/{key}` locators.
#[async_trait]
pub trait ObjectStager: Send + Sync {
    async fn put(&self, object: PutObject) -> Result<String, StagerError>;

    async fn presign(&self, locator: &str, ttl: Duration) -> Result<String, StagerError>;

    async fn get(&self, locator: &str) -> Result<Option<StoredObject>, StagerError>;
}

/// Stores objects as files below `{root}/{bucket}`.
#[derive(Debug, Clone)]
pub struct FsObjectStager {
    root: PathBuf,
    bucket: String,
    signer: UrlSigner,
}

impl FsObjectStager {
    pub async fn open(
        root: impl Into<PathBuf>,
        bucket: &str,
        signer: UrlSigner,
    ) -> Result<Self, StagerError> {
        let root = root.into();
        validate_key(bucket)?;
        let bucket_dir = root.join(bucket);
        if tokio::fs::try_exists(&bucket_dir).await? {
            info!(bucket = %bucket, "object bucket already exists");
        } else {
            tokio::fs::create_dir_all(&bucket_dir).await?;
            info!(bucket = %bucket, path = %bucket_dir.display(), "object bucket created");
        }

        Ok(Self {
            root,
            bucket: bucket.to_string(),
            signer,
        })
    }

    fn path_for(&self, locator: &str) -> Result<PathBuf, StagerError> {
        let (bucket, key) = split_locator(locator)?;
        if bucket != self.bucket {
            return Err(StagerError::InvalidLocator(locator.to_string()));
        }
        validate_key(key).map_err(|_| StagerError::InvalidLocator(locator.to_string()))?;
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStager for FsObjectStager {
    async fn put(&self, object: PutObject) -> Result<String, StagerError> {
        ensure_size(&object)?;
        validate_key(&object.key)?;

        let locator = format!("{}/{}", self.bucket, object.key);
        let path = self.path_for(&locator)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write aside and rename so readers never observe a partial object.
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        tokio::fs::write(&partial, &object.body).await?;
        tokio::fs::rename(&partial, &path).await?;

        debug!(
            locator = %locator,
            size = object.size,
            content_type = %object.content_type,
            "object staged on filesystem"
        );
        Ok(locator)
    }

    async fn presign(&self, locator: &str, ttl: Duration) -> Result<String, StagerError> {
        self.path_for(locator)?;
        Ok(self.signer.presign(locator, ttl, Utc::now()))
    }

    async fn get(&self, locator: &str) -> Result<Option<StoredObject>, StagerError> {
        let path = self.path_for(locator)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Some(StoredObject {
                content_type: content_type_for(locator),
                body: Bytes::from(body),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Keeps objects in process memory. Contents are lost on restart.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStager {
    bucket: String,
    signer: UrlSigner,
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl InMemoryObjectStager {
    pub fn new(bucket: &str, signer: UrlSigner) -> Self {
        Self {
            bucket: bucket.to_string(),
            signer,
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStager for InMemoryObjectStager {
    async fn put(&self, object: PutObject) -> Result<String, StagerError> {
        ensure_size(&object)?;
        validate_key(&object.key)?;

        let locator = format!("{}/{}", self.bucket, object.key);
        self.objects.write().await.insert(
            locator.clone(),
            StoredObject {
                content_type: object.content_type,
                body: object.body,
            },
        );
        Ok(locator)
    }

    async fn presign(&self, locator: &str, ttl: Duration) -> Result<String, StagerError> {
        split_locator(locator)?;
        Ok(self.signer.presign(locator, ttl, Utc::now()))
    }

    async fn get(&self, locator: &str) -> Result<Option<StoredObject>, StagerError> {
        Ok(self.objects.read().await.get(locator).cloned())
    }
}

fn ensure_size(object: &PutObject) -> Result<(), StagerError> {
    let actual = object.body.len() as u64;
    if actual != object.size {
        return Err(StagerError::SizeMismatch {
            declared: object.size,
            actual,
        });
    }
    Ok(())
}

fn split_locator(locator: &str) -> Result<(&str, &str), StagerError> {
    match locator.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(StagerError::InvalidLocator(locator.to_string())),
    }
}

/// Rejects keys that would resolve outside the bucket directory.
fn validate_key(key: &str) -> Result<(), StagerError> {
    if key.is_empty() || key.contains('\\') {
        return Err(StagerError::InvalidKey(key.to_string()));
    }
    for component in Path::new(key).components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(StagerError::InvalidKey(key.to_string())),
        }
    }
    Ok(())
}

fn content_type_for(locator: &str) -> String {
    if locator.ends_with(".zip") {
        "application/zip".to_string()
    } else if locator.contains("/texts/") {
        mime::TEXT_PLAIN_UTF_8.to_string()
    } else {
        mime::APPLICATION_OCTET_STREAM.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("secret", "http://localhost:8080").unwrap()
    }

    fn object(key: &str, body: &'static [u8]) -> PutObject {
        PutObject {
            key: key.to_string(),
            size: body.len() as u64,
            content_type: "application/octet-stream".to_string(),
            body: Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn filesystem_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let stager = FsObjectStager::open(dir.path(), "file-trans", signer())
            .await
            .unwrap();

        let locator = stager.put(object("files/1_a.txt", b"hello")).await.unwrap();
        assert_eq!(locator, "file-trans/files/1_a.txt");
        assert!(dir.path().join("file-trans/files/1_a.txt").exists());

        let stored = stager.get(&locator).await.unwrap().unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"hello"));
        assert_eq!(stored.content_type, "application/octet-stream");
        assert!(stager
            .get("file-trans/files/missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn text_objects_report_text_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let stager = FsObjectStager::open(dir.path(), "b", signer()).await.unwrap();
        let locator = stager.put(object("texts/text_1.txt", b"hi")).await.unwrap();
        let stored = stager.get(&locator).await.unwrap().unwrap();
        assert_eq!(stored.content_type, "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn rejects_escaping_keys_and_foreign_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let stager = FsObjectStager::open(dir.path(), "b", signer()).await.unwrap();

        for key in ["../evil", "/etc/passwd", "files/../../x", "a\\b", ""] {
            assert!(
                matches!(stager.put(object(key, b"x")).await, Err(StagerError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
        assert!(matches!(
            stager.get("other/files/x").await,
            Err(StagerError::InvalidLocator(_))
        ));
    }

    #[tokio::test]
    async fn declared_size_must_match() {
        let stager = InMemoryObjectStager::new("b", signer());
        let mut put = object("files/x", b"abc");
        put.size = 4;
        assert!(matches!(
            stager.put(put).await,
            Err(StagerError::SizeMismatch {
                declared: 4,
                actual: 3
            })
        ));
        assert!(stager.is_empty().await);
    }

    #[tokio::test]
    async fn presign_points_at_object_route() {
        let stager = InMemoryObjectStager::new("b", signer());
        let locator = stager.put(object("files/1_x.bin", b"abc")).await.unwrap();
        let url = stager
            .presign(&locator, Duration::from_secs(900))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:8080/objects/b/files/1_x.bin?expires="));
        assert!(url.contains("&signature="));
    }
}
