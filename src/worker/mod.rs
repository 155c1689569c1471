//! Ingestion worker
//!
//! Consumes work units from an endpoint queue, fetches the page (mock or
//! real HTTP), gzips it and writes it to the blob store under a
//! deterministic key. A message is only acknowledged after the write
//! succeeds; permanent failures are rejected into the dead-letter queue.

pub mod http;
pub mod pool;
pub mod retry;
pub mod runner;
pub mod source;

pub use http::{FetchError, HttpConfig, HttpFetcher};
pub use pool::{DrainSummary, drain, run};
pub use retry::RetryPolicy;
pub use runner::{Outcome, Worker, WorkerSettings};
pub use source::{DataSource, HttpSource, MockSource};
