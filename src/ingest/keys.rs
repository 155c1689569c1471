use super::WorkUnit;

/// Top-level prefix for raw ingested pages
pub const RAW_PREFIX: &str = "raw";

/// Deterministic blob key for a unit:
/// `raw/source={endpoint}/ingestion_date={YYYY-MM-DD}/page={page:06}.json.gz`
pub fn storage_key(unit: &WorkUnit) -> String {
    format!(
        "{}/source={}/ingestion_date={}/page={:06}.json.gz",
        RAW_PREFIX,
        unit.endpoint,
        unit.date.format("%Y-%m-%d"),
        unit.page
    )
}
