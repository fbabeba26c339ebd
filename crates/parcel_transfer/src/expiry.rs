use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpireUnit {
    Minute,
    Hour,
    Day,
}

impl ExpireUnit {
    pub fn seconds(self) -> u64 {
        match self {
            ExpireUnit::Minute => 60,
            ExpireUnit::Hour => 3_600,
            ExpireUnit::Day => 86_400,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExpireUnit::Minute => "minute",
            ExpireUnit::Hour => "hour",
            ExpireUnit::Day => "day",
        }
    }
}

impl fmt::Display for ExpireUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpireUnit {
    type Err = ValidationError;

    /// Accepts the English tokens (singular or plural, any case) and the
    /// Chinese tokens the browser client sends.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim();
        match token {
            "分钟" => return Ok(ExpireUnit::Minute),
            "小时" => return Ok(ExpireUnit::Hour),
            "天" => return Ok(ExpireUnit::Day),
            _ => {}
        }

        match token.to_ascii_lowercase().as_str() {
            "minute" | "minutes" => Ok(ExpireUnit::Minute),
            "hour" | "hours" => Ok(ExpireUnit::Hour),
            "day" | "days" => Ok(ExpireUnit::Day),
            _ => Err(ValidationError::InvalidExpireUnit(raw.to_string())),
        }
    }
}

/// How long a pickup code stays resolvable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryWindow {
    pub amount: u64,
    pub unit: ExpireUnit,
}

impl ExpiryWindow {
    pub fn new(amount: u64, unit: ExpireUnit) -> Result<Self, ValidationError> {
        if amount == 0 {
            return Err(ValidationError::InvalidExpireAmount(amount.to_string()));
        }
        Ok(Self { amount, unit })
    }

    pub fn parse(amount: &str, unit: &str) -> Result<Self, ValidationError> {
        if amount.trim().is_empty() {
            return Err(ValidationError::MissingField("expireTip"));
        }
        if unit.trim().is_empty() {
            return Err(ValidationError::MissingField("expireUnit"));
        }

        let parsed = amount
            .trim()
            .parse::<u64>()
            .map_err(|_| ValidationError::InvalidExpireAmount(amount.to_string()))?;
        Self::new(parsed, unit.parse()?)
    }

    pub fn ttl_secs(&self) -> u64 {
        self.amount.saturating_mul(self.unit.seconds())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs())
    }

    pub fn ensure_within(&self, max_secs: u64) -> Result<(), ValidationError> {
        let requested_secs = self.ttl_secs();
        if requested_secs > max_secs {
            return Err(ValidationError::ExpiryTooLong {
                requested_secs,
                max_secs,
            });
        }
        Ok(())
    }
}
