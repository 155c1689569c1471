use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP server configuration (`serve` command)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Planner fan-out configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    /// Known endpoints; each one gets its own queue
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    /// Page count used for endpoints without an override
    #[serde(default = "default_pages_per_endpoint")]
    pub pages_per_endpoint: u32,
    /// Per-endpoint page count overrides
    #[serde(default)]
    pub pages: BTreeMap<String, u32>,
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,
    #[serde(default = "default_publish_backoff")]
    pub publish_backoff: HumanDuration,
}

impl PlannerConfig {
    pub fn pages_for(&self, endpoint: &str) -> u32 {
        self.pages
            .get(endpoint)
            .copied()
            .unwrap_or(self.pages_per_endpoint)
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            pages_per_endpoint: default_pages_per_endpoint(),
            pages: BTreeMap::new(),
            publish_max_attempts: default_publish_max_attempts(),
            publish_backoff: default_publish_backoff(),
        }
    }
}

fn default_endpoints() -> Vec<String> {
    ["api-a", "api-b", "api-c", "api-d"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_pages_per_endpoint() -> u32 {
    10
}

fn default_publish_max_attempts() -> u32 {
    3
}

fn default_publish_backoff() -> HumanDuration {
    HumanDuration::from_millis(200)
}

/// Where page payloads come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Mock,
    Real,
}

/// Data source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub mode: FetchMode,
    /// Endpoint name -> base URL (real mode only)
    #[serde(default)]
    pub endpoint_urls: BTreeMap<String, String>,
    #[serde(default = "default_mock_items_per_page")]
    pub mock_items_per_page: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff: HumanDuration,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: HumanDuration,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    /// Delay before each fetch to stay under upstream rate limits
    #[serde(default = "default_throttle")]
    pub throttle: HumanDuration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::default(),
            endpoint_urls: BTreeMap::new(),
            mock_items_per_page: default_mock_items_per_page(),
            max_attempts: default_max_attempts(),
            base_backoff: default_base_backoff(),
            max_backoff: default_max_backoff(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            throttle: default_throttle(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_mock_items_per_page() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff() -> HumanDuration {
    HumanDuration::from_millis(500)
}

fn default_max_backoff() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(20)
}

fn default_throttle() -> HumanDuration {
    HumanDuration::from_millis(50)
}

fn default_user_agent() -> String {
    format!("ingestbox/{}", env!("CARGO_PKG_VERSION"))
}

/// Local durable queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    /// How long a received message stays invisible to other consumers
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: HumanDuration,
    /// Deliveries allowed before a message is moved to the dead-letter queue
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    /// In-flight units per queue
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            visibility_timeout: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
            concurrency: default_concurrency(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queues")
}

fn default_visibility_timeout() -> HumanDuration {
    HumanDuration::from_secs(180)
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_concurrency() -> usize {
    2
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_secs(1)
}

/// Storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Memory,
    #[default]
    Local,
    S3,
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Root directory for the local provider
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
    /// Skip fetching when the target object already exists
    #[serde(default = "default_skip_existing")]
    pub skip_existing: bool,
    #[serde(default = "default_write_timeout")]
    pub write_timeout: HumanDuration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            bucket: default_bucket(),
            local_root: default_local_root(),
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            skip_existing: default_skip_existing(),
            write_timeout: default_write_timeout(),
        }
    }
}

fn default_bucket() -> String {
    "ingestbox-data-lake".to_string()
}

fn default_local_root() -> PathBuf {
    PathBuf::from("data/lake")
}

fn default_skip_existing() -> bool {
    true
}

fn default_write_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
