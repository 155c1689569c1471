//! Page sources: deterministic mock data or the real upstream APIs

use super::http::{FetchError, HttpConfig, HttpFetcher, Result};
use crate::config::{FetchConfig, FetchMode};
use crate::ingest::{FetchResult, WorkUnit};
use crate::observability::Metrics;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where the records for a work unit come from
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, unit: &WorkUnit) -> Result<FetchResult>;
}

/// Build the source selected by `fetch.mode`
pub fn from_config(config: &FetchConfig, metrics: Arc<Metrics>) -> Result<Arc<dyn DataSource>> {
    match config.mode {
        FetchMode::Mock => Ok(Arc::new(MockSource::new(config.mock_items_per_page))),
        FetchMode::Real => Ok(Arc::new(HttpSource::new(config, metrics)?)),
    }
}

/// Generates the same records for the same unit, without network access
#[derive(Debug, Clone)]
pub struct MockSource {
    items_per_page: usize,
}

impl MockSource {
    pub fn new(items_per_page: usize) -> Self {
        Self { items_per_page }
    }

    pub fn items_for(&self, unit: &WorkUnit) -> Vec<Value> {
        (0..self.items_per_page)
            .map(|i| {
                json!({
                    "id": format!("{}-{}-{}-{}", unit.endpoint, unit.date, unit.page, i),
                    "value": i,
                })
            })
            .collect()
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl DataSource for MockSource {
    async fn fetch(&self, unit: &WorkUnit) -> Result<FetchResult> {
        Ok(FetchResult::new(unit, Utc::now(), self.items_for(unit)))
    }
}

/// Fetches `GET <base>?date=YYYY-MM-DD&page=N` from each endpoint's base URL
pub struct HttpSource {
    fetcher: HttpFetcher,
    urls: BTreeMap<String, Url>,
}

impl HttpSource {
    pub fn new(config: &FetchConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let urls = config
            .endpoint_urls
            .iter()
            .map(|(endpoint, raw)| {
                Url::parse(raw)
                    .map(|url| (endpoint.clone(), url))
                    .map_err(|e| FetchError::InvalidUrl(format!("{endpoint}: {e}")))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let fetcher = HttpFetcher::new(HttpConfig::from(config), metrics)?;
        Ok(Self { fetcher, urls })
    }
}

#[async_trait]
impl DataSource for HttpSource {
    async fn fetch(&self, unit: &WorkUnit) -> Result<FetchResult> {
        let url = self
            .urls
            .get(&unit.endpoint)
            .ok_or_else(|| FetchError::UnknownEndpoint(unit.endpoint.clone()))?;

        let query = [("date", unit.date.to_string()), ("page", unit.page.to_string())];
        let body = self.fetcher.get_json(url, &query).await?;

        Ok(FetchResult::new(unit, Utc::now(), records_from_body(body)))
    }
}

/// A bare array is the record list; an object carrying an `items` array
/// contributes that array; anything else is stored as a single record.
fn records_from_body(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                map.insert("items".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        other => vec![other],
    }
}
