use serde::Deserialize;
use std::path::Path;

/// TOML configuration for the `recorder-demo`/`reader-demo` binaries: where
/// the ring file lives, how it's sized the first time it's created, and what
/// log level to run at.
#[derive(Deserialize, Debug)]
pub struct EventRingConfig {
    #[serde(default = "defaults::ring_file_path")]
    pub ring_file_path: String,

    /// `descriptor_capacity = 1 << descriptor_shift`.
    #[serde(default = "defaults::descriptor_shift")]
    pub descriptor_shift: u32,

    /// `payload_buf_size = 1 << payload_shift`.
    #[serde(default = "defaults::payload_shift")]
    pub payload_shift: u32,

    /// Number of large pages (2 MiB) reserved for the ring's context area.
    #[serde(default = "defaults::context_large_pages")]
    pub context_large_pages: u64,

    #[serde(default = "defaults::content_type")]
    pub content_type: u16,

    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn ring_file_path() -> String {
        "/tmp/eventring_demo_bus".into()
    }

    pub fn descriptor_shift() -> u32 {
        16 // 65536 slots
    }

    pub fn payload_shift() -> u32 {
        27 // 128 MiB
    }

    pub fn context_large_pages() -> u64 {
        0
    }

    pub fn content_type() -> u16 {
        1 // eventring-registry::ContentTypeId::DEMO
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for EventRingConfig {
    fn default() -> Self {
        Self {
            ring_file_path: defaults::ring_file_path(),
            descriptor_shift: defaults::descriptor_shift(),
            payload_shift: defaults::payload_shift(),
            context_large_pages: defaults::context_large_pages(),
            content_type: defaults::content_type(),
            log_level: defaults::log_level(),
        }
    }
}

impl EventRingConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: EventRingConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}
