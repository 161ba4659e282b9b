use serde::{Deserialize, Serialize};

/// Configuration for the datastream file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DatastreamConfig {
    /// Path of the stream file.
    pub path: String,

    /// Wire protocol version. Version 3 adds block-end entries.
    pub version: u8,
}

impl DatastreamConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            path: "datastream.bin".to_string(),
            version: 3,
        }
    }
}
