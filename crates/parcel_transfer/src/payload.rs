use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Largest inline text payload accepted, in bytes (10 MiB).
pub const MAX_TEXT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Text,
    File,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferKind::Text => "text",
            TransferKind::File => "file",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "text" => Ok(TransferKind::Text),
            "file" => Ok(TransferKind::File),
            "" => Err(ValidationError::MissingField("type")),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

pub fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    if text.len() > MAX_TEXT_BYTES {
        return Err(ValidationError::TextTooLarge {
            size: text.len(),
            max: MAX_TEXT_BYTES,
        });
    }
    Ok(())
}
