use serde::{Deserialize, Serialize};

use crate::TransferKind;

/// Result of a completed send, in the shape the browser client reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReceipt {
    #[serde(rename = "fileName")]
    pub display_name: String,
    #[serde(rename = "fileSize")]
    pub size_bytes: u64,
    #[serde(rename = "fileDownloadURL")]
    pub download_url: String,
    #[serde(rename = "fileUuid")]
    pub transfer_id: String,
    #[serde(rename = "accessKey")]
    pub pickup_code: String,
    #[serde(rename = "expiresIn")]
    pub expires_in_secs: u64,
    pub unit: String,
    #[serde(rename = "type")]
    pub kind: TransferKind,
}

/// What a receiver gets back for a valid pickup code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PickupTicket {
    #[serde(rename = "fileName")]
    pub display_name: String,
    #[serde(rename = "fileUuid")]
    pub transfer_id: String,
    #[serde(rename = "fileSize")]
    pub size_bytes: u64,
    pub expired: bool,
    #[serde(rename = "fileDownloadUrl")]
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFileStatusRequest {
    #[serde(rename = "fileUuid")]
    pub transfer_id: String,
}
