//! Units of work and the records produced for them
//!
//! - [`WorkUnit`] - one (endpoint, date, page) fetch-and-store task
//! - [`FetchResult`] - payload fetched for a unit, held only while processing
//! - [`storage_key`] - deterministic blob key for a unit
//! - [`codec`] - gzip JSON encoding of stored objects

pub mod codec;
mod keys;
mod types;

pub use keys::{RAW_PREFIX, storage_key};
pub use types::{FetchResult, UnitError, WorkUnit, is_valid_endpoint_name};
