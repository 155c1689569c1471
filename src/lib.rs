pub mod config;
pub mod humanize;
pub mod ingest;
pub mod observability;
pub mod planner;
pub mod queue;
pub mod server;
pub mod storage;
pub mod worker;
