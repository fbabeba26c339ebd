use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parcel_backends::{CodeRegistry, ObjectStager, PutObject};
use parcel_storage::{NewTransferRecord, TransferRecord, TransferRecordStore};
use parcel_transfer::naming::sanitize_file_name;
use parcel_transfer::{
    package_entries, validate_text, ExpiryWindow, ObjectName, ObjectNaming, PickupCode, SendReceipt,
    TransferKind, ValidationError,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{at, DependencyStage, TransferError};

/// Tries before giving up on finding an unused server-generated code.
const MAX_CODE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone)]
pub struct SendSettings {
    /// Validity of the download URL handed back to the sender.
    pub download_ttl: Duration,
    /// Longest pickup-code lifetime a sender may request.
    pub max_expiry_secs: u64,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            download_ttl: Duration::from_secs(15 * 60),
            max_expiry_secs: 30 * 86_400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub body: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

/// A send request as submitted, before validation.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub kind: String,
    pub expire_amount: String,
    pub expire_unit: String,
    pub text: Option<String>,
    pub files: Vec<UploadedFile>,
    pub pickup_code: Option<String>,
}

#[derive(Debug)]
enum Payload {
    Text(String),
    Single(UploadedFile),
    Bundle(Vec<UploadedFile>),
}

#[derive(Debug)]
enum CodeChoice {
    Requested(PickupCode),
    Generated,
}

#[derive(Debug)]
struct ValidatedSend {
    kind: TransferKind,
    expiry: ExpiryWindow,
    unit_token: String,
    payload: Payload,
    code: CodeChoice,
}

/// Drives a send: stage bytes, persist the record, register the code,
/// mark the record sent.
///
/// Steps run strictly in order and are not compensated. A failure after
/// staging leaves the object in place; a failure after persisting leaves an
/// unsent record.
pub struct SendWorkflow {
    store: Arc<dyn TransferRecordStore>,
    registry: Arc<dyn CodeRegistry>,
    stager: Arc<dyn ObjectStager>,
    settings: SendSettings,
}

impl SendWorkflow {
    pub fn new(
        store: Arc<dyn TransferRecordStore>,
        registry: Arc<dyn CodeRegistry>,
        stager: Arc<dyn ObjectStager>,
        settings: SendSettings,
    ) -> Self {
        Self {
            store,
            registry,
            stager,
            settings,
        }
    }

    pub async fn send(&self, request: SendRequest) -> Result<SendReceipt, TransferError> {
        let validated = self.validate(request).await?;
        let naming = ObjectNaming::at(Utc::now().timestamp_nanos_opt().unwrap_or_default());

        let (name, body) = match validated.payload {
            Payload::Text(text) => (naming.text(), Bytes::from(text)),
            Payload::Single(file) => (naming.file(&file.name), file.body),
            Payload::Bundle(files) => (naming.archive(), package(files).await?),
        };
        let size = body.len() as u64;

        let locator = self
            .stager
            .put(PutObject {
                key: name.object_key.clone(),
                size,
                content_type: name.content_type.to_string(),
                body,
            })
            .await
            .map_err(at(DependencyStage::StageObject))?;

        let transfer_id = Uuid::new_v4().to_string();
        let download_url = self
            .stager
            .presign(&locator, self.settings.download_ttl)
            .await
            .map_err(at(DependencyStage::Presign))?;

        self.persist(&transfer_id, &name, size, &locator, validated.kind)
            .await?;

        let ttl = validated.expiry.ttl();
        let code = self.register(validated.code, &transfer_id, ttl).await?;

        let marked = self
            .store
            .mark_sent(&transfer_id)
            .await
            .map_err(at(DependencyStage::MarkSent))?;
        if !marked {
            warn!(transfer_id = %transfer_id, "record was already marked sent");
        }

        info!(
            transfer_id = %transfer_id,
            kind = %validated.kind,
            size,
            ttl_secs = ttl.as_secs(),
            "transfer sent"
        );

        Ok(SendReceipt {
            display_name: name.display_name,
            size_bytes: size,
            download_url,
            transfer_id,
            pickup_code: code.to_string(),
            expires_in_secs: validated.expiry.ttl_secs(),
            unit: validated.unit_token,
            kind: validated.kind,
        })
    }

    /// Records created today (UTC) whose send completed.
    pub async fn send_records(&self) -> Result<Vec<TransferRecord>, TransferError> {
        self.store
            .query_sent_today(Utc::now())
            .await
            .map_err(at(DependencyStage::QueryRecords))
    }

    async fn validate(&self, request: SendRequest) -> Result<ValidatedSend, TransferError> {
        let expiry = ExpiryWindow::parse(&request.expire_amount, &request.expire_unit)?;
        expiry.ensure_within(self.settings.max_expiry_secs)?;
        let kind: TransferKind = request.kind.parse()?;

        let payload = match kind {
            TransferKind::Text => {
                let text = request.text.unwrap_or_default();
                validate_text(&text)?;
                Payload::Text(text)
            }
            TransferKind::File => {
                let mut files = request.files;
                match files.len() {
                    0 => return Err(ValidationError::NoFiles.into()),
                    1 => Payload::Single(files.remove(0)),
                    _ => Payload::Bundle(files),
                }
            }
        };

        let code = match request.pickup_code.as_deref().map(str::trim) {
            None | Some("") => CodeChoice::Generated,
            Some(raw) => {
                let code = PickupCode::parse(raw)?;
                let active = self
                    .registry
                    .get(code.as_str())
                    .await
                    .map_err(at(DependencyStage::LookupCode))?;
                if active.is_some() {
                    return Err(ValidationError::PickupCodeInUse.into());
                }
                CodeChoice::Requested(code)
            }
        };

        Ok(ValidatedSend {
            kind,
            expiry,
            unit_token: request.expire_unit.trim().to_string(),
            payload,
            code,
        })
    }

    async fn persist(
        &self,
        transfer_id: &str,
        name: &ObjectName,
        size: u64,
        locator: &str,
        kind: TransferKind,
    ) -> Result<(), TransferError> {
        self.store
            .create(NewTransferRecord {
                transfer_id: transfer_id.to_string(),
                display_name: name.display_name.clone(),
                size_bytes: size,
                storage_locator: locator.to_string(),
                kind,
            })
            .await
            .map_err(at(DependencyStage::PersistRecord))?;
        Ok(())
    }

    async fn register(
        &self,
        choice: CodeChoice,
        transfer_id: &str,
        ttl: Duration,
    ) -> Result<PickupCode, TransferError> {
        match choice {
            CodeChoice::Requested(code) => {
                let inserted = self
                    .registry
                    .insert_if_absent(code.as_str(), transfer_id, ttl)
                    .await
                    .map_err(at(DependencyStage::RegisterCode))?;
                if !inserted {
                    return Err(ValidationError::PickupCodeInUse.into());
                }
                Ok(code)
            }
            CodeChoice::Generated => {
                for _ in 0..MAX_CODE_ATTEMPTS {
                    let code = PickupCode::generate();
                    let inserted = self
                        .registry
                        .insert_if_absent(code.as_str(), transfer_id, ttl)
                        .await
                        .map_err(at(DependencyStage::RegisterCode))?;
                    if inserted {
                        return Ok(code);
                    }
                }
                Err(TransferError::dependency(
                    DependencyStage::RegisterCode,
                    anyhow::anyhow!("no free pickup code after {MAX_CODE_ATTEMPTS} attempts"),
                ))
            }
        }
    }
}

/// Zips the files on the blocking pool; entry names are the sanitized
/// client file names.
async fn package(files: Vec<UploadedFile>) -> Result<Bytes, TransferError> {
    let archive = tokio::task::spawn_blocking(move || {
        package_entries(
            files
                .into_iter()
                .map(|file| (sanitize_file_name(&file.name), Cursor::new(file.body))),
        )
    })
    .await
    .map_err(at(DependencyStage::Package))?
    .map_err(at(DependencyStage::Package))?;
    Ok(Bytes::from(archive.bytes))
}
