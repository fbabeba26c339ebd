#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parcel_backends::{
    CodeRegistry, InMemoryCodeRegistry, InMemoryObjectStager, LapsedCode, ObjectStager, PutObject,
    RegistryError, StagerError, StoredObject, UrlSigner,
};
use parcel_control_plane::{
    Dependencies, ReceiveWorkflow, SendRequest, SendSettings, SendWorkflow, UploadedFile,
};
use parcel_storage::{NewTransferRecord, SqliteTransferStore, TransferRecord, TransferRecordStore};

pub const BASE_URL: &str = "http://parcel.test";
pub const BUCKET: &str = "file-trans";

pub fn signer() -> UrlSigner {
    UrlSigner::new("integration-secret", BASE_URL).unwrap()
}

/// In-memory backends wired the way the daemon wires the real ones.
pub struct Harness {
    pub store: Arc<SqliteTransferStore>,
    pub registry: Arc<dyn CodeRegistry>,
    pub stager: Arc<dyn ObjectStager>,
    pub signer: UrlSigner,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(
            Arc::new(InMemoryCodeRegistry::new()),
            Arc::new(InMemoryObjectStager::new(BUCKET, signer())),
        )
        .await
    }

    pub async fn with(registry: Arc<dyn CodeRegistry>, stager: Arc<dyn ObjectStager>) -> Self {
        Self {
            store: Arc::new(SqliteTransferStore::in_memory().await.unwrap()),
            registry,
            stager,
            signer: signer(),
        }
    }

    pub fn dependencies(&self) -> Dependencies {
        Dependencies {
            store: self.store.clone(),
            registry: self.registry.clone(),
            stager: self.stager.clone(),
            signer: self.signer.clone(),
        }
    }

    pub fn send(&self) -> SendWorkflow {
        SendWorkflow::new(
            self.store.clone(),
            self.registry.clone(),
            self.stager.clone(),
            SendSettings::default(),
        )
    }

    pub fn receive(&self) -> ReceiveWorkflow {
        ReceiveWorkflow::new(
            self.store.clone(),
            self.registry.clone(),
            self.stager.clone(),
            SendSettings::default().download_ttl,
        )
    }

    pub async fn unsent_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM transfers WHERE sent = 0")
            .fetch_one(self.store.pool())
            .await
            .unwrap()
    }

    pub async fn record_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM transfers")
            .fetch_one(self.store.pool())
            .await
            .unwrap()
    }
}

pub fn text_request(text: &str, amount: &str, unit: &str) -> SendRequest {
    SendRequest {
        kind: "text".to_string(),
        expire_amount: amount.to_string(),
        expire_unit: unit.to_string(),
        text: Some(text.to_string()),
        ..SendRequest::default()
    }
}

pub fn file_request(files: &[(&str, &str)]) -> SendRequest {
    SendRequest {
        kind: "file".to_string(),
        expire_amount: "10".to_string(),
        expire_unit: "分钟".to_string(),
        files: files
            .iter()
            .map(|(name, body)| UploadedFile::new(*name, body.as_bytes().to_vec()))
            .collect(),
        ..SendRequest::default()
    }
}

/// Counts every call that reaches the wrapped registry.
#[derive(Default)]
pub struct CountingRegistry {
    inner: InMemoryCodeRegistry,
    calls: AtomicUsize,
}

impl CountingRegistry {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CodeRegistry for CountingRegistry {
    async fn set(&self, code: &str, transfer_id: &str, ttl: Duration) -> Result<(), RegistryError> {
        self.hit();
        self.inner.set(code, transfer_id, ttl).await
    }

    async fn insert_if_absent(
        &self,
        code: &str,
        transfer_id: &str,
        ttl: Duration,
    ) -> Result<bool, RegistryError> {
        self.hit();
        self.inner.insert_if_absent(code, transfer_id, ttl).await
    }

    async fn get(&self, code: &str) -> Result<Option<String>, RegistryError> {
        self.hit();
        self.inner.get(code).await
    }

    async fn delete(&self, code: &str) -> Result<bool, RegistryError> {
        self.hit();
        self.inner.delete(code).await
    }

    async fn purge_expired(&self) -> Result<Vec<LapsedCode>, RegistryError> {
        self.hit();
        self.inner.purge_expired().await
    }

    async fn requeue_lapsed(&self, lapsed: Vec<LapsedCode>) -> Result<(), RegistryError> {
        self.hit();
        self.inner.requeue_lapsed(lapsed).await
    }
}

/// Registry whose writes always fail; reads see an empty registry.
pub struct DownRegistry;

#[async_trait]
impl CodeRegistry for DownRegistry {
    async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    async fn insert_if_absent(&self, _: &str, _: &str, _: Duration) -> Result<bool, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _: &str) -> Result<Option<String>, RegistryError> {
        Ok(None)
    }

    async fn delete(&self, _: &str) -> Result<bool, RegistryError> {
        Ok(false)
    }

    async fn purge_expired(&self) -> Result<Vec<LapsedCode>, RegistryError> {
        Ok(Vec::new())
    }

    async fn requeue_lapsed(&self, _: Vec<LapsedCode>) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }
}

/// Stager that refuses every upload.
pub struct FullDiskStager;

#[async_trait]
impl ObjectStager for FullDiskStager {
    async fn put(&self, _: PutObject) -> Result<String, StagerError> {
        Err(StagerError::Io(std::io::Error::other("no space left on device")))
    }

    async fn presign(&self, locator: &str, _: Duration) -> Result<String, StagerError> {
        Err(StagerError::InvalidLocator(locator.to_string()))
    }

    async fn get(&self, _: &str) -> Result<Option<StoredObject>, StagerError> {
        Ok(None)
    }
}

/// SQLite store whose next `mark_expired` fails once.
pub struct FlakyExpiryStore {
    inner: Arc<SqliteTransferStore>,
    fail_next_expiry: AtomicBool,
}

impl FlakyExpiryStore {
    pub fn new(inner: Arc<SqliteTransferStore>) -> Self {
        Self {
            inner,
            fail_next_expiry: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl TransferRecordStore for FlakyExpiryStore {
    async fn create(&self, record: NewTransferRecord) -> anyhow::Result<TransferRecord> {
        self.inner.create(record).await
    }

    async fn get_by_transfer_id(&self, transfer_id: &str) -> anyhow::Result<Option<TransferRecord>> {
        self.inner.get_by_transfer_id(transfer_id).await
    }

    async fn mark_sent(&self, transfer_id: &str) -> anyhow::Result<bool> {
        self.inner.mark_sent(transfer_id).await
    }

    async fn mark_received(&self, transfer_id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        self.inner.mark_received(transfer_id, at).await
    }

    async fn mark_expired(&self, transfer_ids: &[String]) -> anyhow::Result<u64> {
        if self.fail_next_expiry.swap(false, Ordering::SeqCst) {
            anyhow::bail!("database is locked");
        }
        self.inner.mark_expired(transfer_ids).await
    }

    async fn query_sent_today(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<TransferRecord>> {
        self.inner.query_sent_today(now).await
    }

    async fn query_received_today(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<TransferRecord>> {
        self.inner.query_received_today(now).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.inner.ping().await
    }
}
