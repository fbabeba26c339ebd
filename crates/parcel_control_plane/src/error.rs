use std::fmt;

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use parcel_transfer::ValidationError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// The backend call that failed inside a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStage {
    Package,
    StageObject,
    Presign,
    PersistRecord,
    LookupCode,
    RegisterCode,
    MarkSent,
    LoadRecord,
    MarkReceived,
    QueryRecords,
}

impl DependencyStage {
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyStage::Package => "package",
            DependencyStage::StageObject => "stage_object",
            DependencyStage::Presign => "presign",
            DependencyStage::PersistRecord => "persist_record",
            DependencyStage::LookupCode => "lookup_code",
            DependencyStage::RegisterCode => "register_code",
            DependencyStage::MarkSent => "mark_sent",
            DependencyStage::LoadRecord => "load_record",
            DependencyStage::MarkReceived => "mark_received",
            DependencyStage::QueryRecords => "query_records",
        }
    }
}

impl fmt::Display for DependencyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("transfer not found or expired")]
    NotFoundOrExpired,
    #[error("{stage} failed: {source:#}")]
    Dependency {
        stage: DependencyStage,
        #[source]
        source: anyhow::Error,
    },
}

impl TransferError {
    pub fn dependency(stage: DependencyStage, source: impl Into<anyhow::Error>) -> Self {
        TransferError::Dependency {
            stage,
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TransferError::Validation(_) => StatusCode::BAD_REQUEST,
            TransferError::NotFoundOrExpired => StatusCode::NOT_FOUND,
            TransferError::Dependency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Shorthand for `map_err` at a workflow step.
pub(crate) fn at<E>(stage: DependencyStage) -> impl FnOnce(E) -> TransferError
where
    E: Into<anyhow::Error>,
{
    move |source| TransferError::dependency(stage, source)
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            TransferError::Validation(reason) => {
                warn!(reason = %reason, "request rejected");
                json!({ "error": "validation_error", "message": reason.to_string() })
            }
            TransferError::NotFoundOrExpired => {
                json!({ "error": "not_found_or_expired", "message": self.to_string() })
            }
            TransferError::Dependency { stage, source } => {
                error!(stage = %stage, error = ?source, "request failed");
                json!({ "error": "internal_error", "message": "internal server error" })
            }
        };
        (status, Json(body)).into_response()
    }
}
