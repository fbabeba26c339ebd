use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

pub const PICKUP_CODE_LEN: usize = 6;

/// A six-digit decimal pickup code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PickupCode(String);

impl PickupCode {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.len() == PICKUP_CODE_LEN && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ValidationError::InvalidPickupCode)
        }
    }

    pub fn generate() -> Self {
        let value: u32 = rand::rng().random_range(0..1_000_000);
        Self(format!("{value:06}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PickupCode {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for PickupCode {
    type Error = ValidationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<PickupCode> for String {
    fn from(code: PickupCode) -> Self {
        code.0
    }
}

impl fmt::Display for PickupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
