//! # Client Configuration
//!
//! Purpose: Group the knobs of the synchronous and asynchronous clients into
//! plain structs with sensible defaults, loadable from JSON documents.
//!
//! ## Design Principles
//! 1. **Defaults First**: `Default` yields a working local setup; documents
//!    only override what they mention (`#[serde(default)]`).
//! 2. **Milliseconds on the Wire**: Durations are written as integer
//!    milliseconds (`*_ms` keys) and held as `Duration` in memory.
//! 3. **Typed Failures**: Load errors surface as `Error::Config`.

use std::time::Duration;

use minired_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Retained free capacity above which an idle reader buffer is reallocated.
pub const DEFAULT_READER_MAX_BUFFER: usize = 64 * 1024;

/// Connect timeout used by the asynchronous client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Period of the reconnect check.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Descriptor slots reserved by the asynchronous client's event loop.
pub const DEFAULT_SETSIZE: usize = 1024;

/// Configuration for `Connection` and the blocking `Client`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Optional TCP connect timeout.
    #[serde(rename = "connect_timeout_ms", with = "opt_duration_ms")]
    pub connect_timeout: Option<Duration>,
    /// Optional read/write timeout applied while the connection blocks.
    #[serde(rename = "io_timeout_ms", with = "opt_duration_ms")]
    pub io_timeout: Option<Duration>,
    /// Reader memory-pressure ceiling in bytes.
    pub reader_max_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout: None,
            io_timeout: None,
            reader_max_buffer: DEFAULT_READER_MAX_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| Error::Config(err.to_string()))
    }
}

/// Configuration for `AsyncClient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncConfig {
    pub host: String,
    pub port: u16,
    /// Sent with `AUTH` after every (re)connect when set.
    pub password: Option<String>,
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Fixed period between reconnect attempts while disconnected. No backoff.
    #[serde(rename = "reconnect_interval_ms", with = "duration_ms")]
    pub reconnect_interval: Duration,
    /// Event loop slot table size; descriptors must be below it.
    pub setsize: usize,
    pub reader_max_buffer: usize,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        AsyncConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            setsize: DEFAULT_SETSIZE,
            reader_max_buffer: DEFAULT_READER_MAX_BUFFER,
        }
    }
}

impl AsyncConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: AsyncConfig =
            serde_json::from_str(text).map_err(|err| Error::Config(err.to_string()))?;
        if config.setsize == 0 {
            return Err(Error::Config("setsize must be positive".into()));
        }
        Ok(config)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
