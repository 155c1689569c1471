use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("malformed work unit: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid work unit: {0}")]
    Invalid(String),
}

/// One (endpoint, date, page) fetch-and-store task.
///
/// Wire form is `{"endpoint": "api-a", "ingestion_date": "2024-01-15", "page": 3}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    pub endpoint: String,
    #[serde(rename = "ingestion_date")]
    pub date: NaiveDate,
    pub page: u32,
}

impl WorkUnit {
    pub fn new(endpoint: impl Into<String>, date: NaiveDate, page: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            date,
            page,
        }
    }

    /// Serialize to the queue message body
    pub fn to_body(&self) -> Result<Vec<u8>, UnitError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a queue message body
    pub fn from_body(body: &[u8]) -> Result<Self, UnitError> {
        let unit: WorkUnit = serde_json::from_slice(body)?;
        unit.validate()?;
        Ok(unit)
    }

    fn validate(&self) -> Result<(), UnitError> {
        if self.endpoint.trim().is_empty() {
            return Err(UnitError::Invalid("endpoint is empty".to_string()));
        }
        // Endpoint becomes a path segment of the storage key
        if !is_valid_endpoint_name(&self.endpoint) {
            return Err(UnitError::Invalid(format!(
                "endpoint may only contain ASCII letters, digits, '-' and '_': {}",
                self.endpoint
            )));
        }
        if self.page == 0 {
            return Err(UnitError::Invalid("page must be positive".to_string()));
        }
        Ok(())
    }
}

/// Endpoint names are used verbatim in storage keys and queue partition
/// names, so only characters that need no escaping in either are allowed
pub fn is_valid_endpoint_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Payload fetched for a work unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub endpoint: String,
    pub date: NaiveDate,
    pub page: u32,
    pub fetched_at: String,
    pub items: Vec<Value>,
}

impl FetchResult {
    pub fn new(unit: &WorkUnit, fetched_at: DateTime<Utc>, items: Vec<Value>) -> Self {
        Self {
            endpoint: unit.endpoint.clone(),
            date: unit.date,
            page: unit.page,
            fetched_at: fetched_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            items,
        }
    }
}
