pub mod agent;
pub mod clock;
pub mod config;
pub mod export;
pub mod ingest;
pub mod server;
pub mod sink;
