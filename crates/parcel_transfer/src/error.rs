use thiserror::Error;

/// Rejections raised while checking a request, before any backend is touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("expiry amount must be a positive integer, got `{0}`")]
    InvalidExpireAmount(String),
    #[error("unrecognized expiry unit `{0}`")]
    InvalidExpireUnit(String),
    #[error("expiry of {requested_secs}s exceeds the maximum of {max_secs}s")]
    ExpiryTooLong { requested_secs: u64, max_secs: u64 },
    #[error("unknown transfer type `{0}`")]
    UnknownKind(String),
    #[error("text content cannot be empty")]
    EmptyText,
    #[error("text content is {size} bytes, the limit is {max} bytes")]
    TextTooLarge { size: usize, max: usize },
    #[error("no files were supplied")]
    NoFiles,
    #[error("pickup code must be exactly six digits")]
    InvalidPickupCode,
    #[error("pickup code is already in use")]
    PickupCodeInUse,
    #[error("transfer id cannot be empty")]
    MissingTransferId,
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}
