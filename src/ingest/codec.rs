//! Gzip-compressed JSON encoding for stored pages

use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::FetchResult;

pub const CONTENT_TYPE: &str = "application/json";
pub const CONTENT_ENCODING: &str = "gzip";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Compact JSON, gzip-compressed
pub async fn encode(result: &FetchResult) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(result)?;

    let mut encoder = GzipEncoder::new(Vec::with_capacity(json.len() / 2));
    encoder.write_all(&json).await?;
    encoder.shutdown().await?;

    Ok(encoder.into_inner())
}

pub async fn decode(bytes: &[u8]) -> Result<FetchResult> {
    let mut decoder = GzipDecoder::new(bytes);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).await?;

    Ok(serde_json::from_slice(&json)?)
}
