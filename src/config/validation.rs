use super::models::{Config, FetchMode, StorageProvider};
use crate::ingest::is_valid_endpoint_name;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No endpoints configured for the planner")]
    NoEndpointsConfigured,

    #[error("Endpoint '{0}' is listed more than once")]
    DuplicateEndpoint(String),

    #[error("Endpoint name '{0}' must be non-empty ASCII letters, digits, '-' or '_'")]
    InvalidEndpointName(String),

    #[error("Page count for '{endpoint}' must be positive")]
    InvalidPageCount { endpoint: String },

    #[error("Page override for unknown endpoint '{0}'")]
    UnknownPageOverride(String),

    #[error("Real fetch mode requires a URL for endpoint '{0}'")]
    MissingEndpointUrl(String),

    #[error("Invalid URL for endpoint '{endpoint}': {url}")]
    InvalidEndpointUrl { endpoint: String, url: String },

    #[error("{field} must be at least 1")]
    ZeroAttempts { field: &'static str },

    #[error("base_backoff ({base}) exceeds max_backoff ({max})")]
    BackoffOrder { base: String, max: String },

    #[error("queue.concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("Storage provider is S3 but bucket is empty")]
    MissingBucket,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_planner(config)?;
    validate_fetch(config)?;
    validate_queue(config)?;
    validate_storage(config)?;
    Ok(())
}

fn validate_planner(config: &Config) -> Result<(), ValidationError> {
    let planner = &config.planner;

    if planner.endpoints.is_empty() {
        return Err(ValidationError::NoEndpointsConfigured);
    }

    let mut seen = HashSet::new();
    for endpoint in &planner.endpoints {
        if !is_valid_endpoint_name(endpoint) {
            return Err(ValidationError::InvalidEndpointName(endpoint.clone()));
        }
        if !seen.insert(endpoint.as_str()) {
            return Err(ValidationError::DuplicateEndpoint(endpoint.clone()));
        }
        if planner.pages_for(endpoint) == 0 {
            return Err(ValidationError::InvalidPageCount {
                endpoint: endpoint.clone(),
            });
        }
    }

    if let Some(unknown) = planner.pages.keys().find(|name| !seen.contains(name.as_str())) {
        return Err(ValidationError::UnknownPageOverride(unknown.clone()));
    }

    if planner.publish_max_attempts == 0 {
        return Err(ValidationError::ZeroAttempts {
            field: "planner.publish_max_attempts",
        });
    }

    Ok(())
}

/// Real mode must resolve every planned endpoint to a URL up front
fn validate_fetch(config: &Config) -> Result<(), ValidationError> {
    let fetch = &config.fetch;

    if fetch.max_attempts == 0 {
        return Err(ValidationError::ZeroAttempts {
            field: "fetch.max_attempts",
        });
    }

    if fetch.base_backoff > fetch.max_backoff {
        return Err(ValidationError::BackoffOrder {
            base: fetch.base_backoff.to_string(),
            max: fetch.max_backoff.to_string(),
        });
    }

    if fetch.mode == FetchMode::Real {
        for endpoint in &config.planner.endpoints {
            let url = fetch
                .endpoint_urls
                .get(endpoint)
                .ok_or_else(|| ValidationError::MissingEndpointUrl(endpoint.clone()))?;

            if reqwest::Url::parse(url).is_err() {
                return Err(ValidationError::InvalidEndpointUrl {
                    endpoint: endpoint.clone(),
                    url: url.clone(),
                });
            }
        }
    }

    Ok(())
}

fn validate_queue(config: &Config) -> Result<(), ValidationError> {
    if config.queue.max_receive_count == 0 {
        return Err(ValidationError::ZeroAttempts {
            field: "queue.max_receive_count",
        });
    }

    if config.queue.concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }

    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.provider == StorageProvider::S3 && config.storage.bucket.trim().is_empty() {
        return Err(ValidationError::MissingBucket);
    }

    Ok(())
}
