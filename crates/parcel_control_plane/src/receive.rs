use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parcel_backends::{CodeRegistry, ObjectStager};
use parcel_storage::{TransferRecord, TransferRecordStore};
use parcel_transfer::{PickupCode, PickupTicket, ValidationError};
use tracing::info;

use crate::error::{at, DependencyStage, TransferError};

pub struct ReceiveWorkflow {
    store: Arc<dyn TransferRecordStore>,
    registry: Arc<dyn CodeRegistry>,
    stager: Arc<dyn ObjectStager>,
    download_ttl: Duration,
}

impl ReceiveWorkflow {
    pub fn new(
        store: Arc<dyn TransferRecordStore>,
        registry: Arc<dyn CodeRegistry>,
        stager: Arc<dyn ObjectStager>,
        download_ttl: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            stager,
            download_ttl,
        }
    }

    /// Resolves a pickup code to its transfer with a freshly signed URL.
    ///
    /// Unknown codes, lapsed codes, missing records and records flagged
    /// expired all yield `NotFoundOrExpired`.
    pub async fn receive(&self, raw_code: &str) -> Result<PickupTicket, TransferError> {
        if raw_code.is_empty() {
            return Err(ValidationError::MissingField("pickupCode").into());
        }
        let code = PickupCode::parse(raw_code)?;

        let transfer_id = self
            .registry
            .get(code.as_str())
            .await
            .map_err(at(DependencyStage::LookupCode))?
            .ok_or(TransferError::NotFoundOrExpired)?;

        let record = self
            .store
            .get_by_transfer_id(&transfer_id)
            .await
            .map_err(at(DependencyStage::LoadRecord))?
            .ok_or(TransferError::NotFoundOrExpired)?;
        if record.expired {
            return Err(TransferError::NotFoundOrExpired);
        }

        let download_url = self
            .stager
            .presign(&record.storage_locator, self.download_ttl)
            .await
            .map_err(at(DependencyStage::Presign))?;

        info!(transfer_id = %record.transfer_id, "pickup code resolved");
        Ok(PickupTicket {
            size_bytes: record.size(),
            display_name: record.display_name,
            transfer_id: record.transfer_id,
            expired: record.expired,
            download_url,
        })
    }

    /// Marks a transfer received. Repeating the call is harmless and moves
    /// `receivedAt` to the latest confirmation.
    pub async fn confirm_received(&self, transfer_id: &str) -> Result<DateTime<Utc>, TransferError> {
        let transfer_id = transfer_id.trim();
        if transfer_id.is_empty() {
            return Err(ValidationError::MissingTransferId.into());
        }

        let received_at = Utc::now();
        let updated = self
            .store
            .mark_received(transfer_id, received_at)
            .await
            .map_err(at(DependencyStage::MarkReceived))?;
        if !updated {
            return Err(TransferError::NotFoundOrExpired);
        }

        info!(transfer_id = %transfer_id, "transfer marked received");
        Ok(received_at)
    }

    /// Records created today (UTC) that have been picked up.
    pub async fn receive_records(&self) -> Result<Vec<TransferRecord>, TransferError> {
        self.store
            .query_received_today(Utc::now())
            .await
            .map_err(at(DependencyStage::QueryRecords))
    }
}
