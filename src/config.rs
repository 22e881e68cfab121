//! Socket and framer configuration.
//!
//! Both configs deserialize from JSON with every field optional. Timeouts
//! are written in seconds:
//!
//! - `null` waits forever
//! - `0` is non-blocking
//! - a positive number is a deadline in (fractional) seconds
//!
//! # Example
//!
//! ```
//! use bufsock::config::SocketConfig;
//! use bufsock::Timeout;
//! use std::time::Duration;
//!
//! let config = SocketConfig::from_json(r#"{"timeout": 2.5, "max_buffer_size": 4096}"#).unwrap();
//! assert_eq!(config.timeout, Timeout::After(Duration::from_millis(2500)));
//! assert_eq!(config.effective_chunk_read_size(), 4096);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, SocketError};
use crate::timeout::{Timeout, DEFAULT_MAX_BUFFER_SIZE};

/// Default maximum netstring payload size (32 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024;

/// Configuration for a [`BufferedSocket`](crate::BufferedSocket).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketConfig {
    /// Default timeout for blocking operations.
    #[serde(with = "timeout_secs")]
    pub timeout: Timeout,
    /// Default cap on the receive buffer for bounded reads.
    pub max_buffer_size: usize,
    /// Bytes requested per transport read; `None` uses `max_buffer_size`.
    pub chunk_read_size: Option<usize>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            timeout: Timeout::default(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            chunk_read_size: None,
        }
    }
}

impl SocketConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Chunk size actually used for transport reads.
    #[inline]
    pub fn effective_chunk_read_size(&self) -> usize {
        self.chunk_read_size.unwrap_or(self.max_buffer_size)
    }

    /// Reject configurations that could never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_size == 0 {
            return Err(SocketError::InvalidConfig(
                "max_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_read_size == Some(0) {
            return Err(SocketError::InvalidConfig(
                "chunk_read_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`NetstringSocket`](crate::NetstringSocket).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetstringConfig {
    /// Default timeout for each step of a read or write.
    #[serde(with = "timeout_secs")]
    pub timeout: Timeout,
    /// Maximum payload length of a single message.
    pub max_message_size: usize,
    /// Settings for the underlying buffered socket.
    pub socket: SocketConfig,
}

impl Default for NetstringConfig {
    fn default() -> Self {
        Self {
            timeout: Timeout::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            socket: SocketConfig::default(),
        }
    }
}

impl NetstringConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate this config and the nested socket config.
    pub fn validate(&self) -> Result<()> {
        self.socket.validate()
    }
}

/// Serde adapter: `Timeout` as optional seconds.
mod timeout_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::timeout::Timeout;

    pub(super) fn serialize<S: Serializer>(
        timeout: &Timeout,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match timeout.as_secs_f64() {
            Some(secs) => serializer.serialize_some(&secs),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Timeout, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        Timeout::from_secs_f64(secs).ok_or_else(|| {
            D::Error::custom("timeout must be null or a finite, non-negative number of seconds")
        })
    }
}
