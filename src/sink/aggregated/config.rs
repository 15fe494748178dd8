// Re-export the aggregated sink config types from the central config module.
// The actual types live in crate::config to keep YAML deserialization in one place.
pub use crate::config::{FileSinkConfig, FlushConfig, SinksConfig};
