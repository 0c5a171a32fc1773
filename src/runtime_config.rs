//! # Runtime Configuration Module
//!
//! Environment variable based configuration for a [`Smoker`](crate::Smoker)
//! server.
//!
//! ## Environment Variables
//!
//! ### `SMOKER_HOST`
//!
//! Interface to bind. Default: `0.0.0.0`
//!
//! ### `SMOKER_PORT`
//!
//! Port to bind. `0` asks the OS for an ephemeral port. Default: `0`
//!
//! ### `SMOKER_HIGH_WATER_MARK`
//!
//! Buffered response bytes at which streamed writes wait for the connection
//! to catch up. Accepts values in:
//! - Decimal: `16384` (16 KB)
//! - Hexadecimal: `0x4000` (16 KB)
//!
//! Default: `0x4000` (16 KB)
//!
//! Invalid values fall back to the default.
//!
//! ## Usage
//!
//! ```rust
//! use smoker::runtime_config::SmokerConfig;
//!
//! let config = SmokerConfig::from_env();
//! println!("Listening on {}", config.bind_addr());
//! ```
//!
//! ```bash
//! export SMOKER_PORT=9000
//! export SMOKER_HIGH_WATER_MARK=0x8000
//! smoker serve --mocks mocks.yaml
//! ```

use crate::server::DEFAULT_HIGH_WATER_MARK;
use std::env;

pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokerConfig {
    /// Interface to bind (default: `0.0.0.0`)
    pub host: String,
    /// Port to bind; `0` picks an ephemeral port
    pub port: u16,
    /// Backpressure threshold for streamed responses in bytes (default: 16 KB)
    pub high_water_mark: usize,
}

impl Default for SmokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

impl SmokerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("SMOKER_HOST")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.host);

        let port = lookup("SMOKER_PORT")
            .and_then(|v| parse_number(&v))
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(defaults.port);

        let high_water_mark = lookup("SMOKER_HIGH_WATER_MARK")
            .and_then(|v| parse_number(&v))
            .filter(|v| *v > 0)
            .unwrap_or(defaults.high_water_mark);

        SmokerConfig {
            host,
            port,
            high_water_mark,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` string suitable for binding. IPv6 hosts are bracketed.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
fn parse_number(value: &str) -> Option<usize> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> SmokerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SmokerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, SmokerConfig::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:0");
        assert_eq!(config.high_water_mark, 0x4000);
    }

    #[test]
    fn test_decimal_and_hex_values() {
        let config = config_from(&[
            ("SMOKER_HOST", "127.0.0.1"),
            ("SMOKER_PORT", "8080"),
            ("SMOKER_HIGH_WATER_MARK", "0x8000"),
        ]);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.high_water_mark, 32768);

        let config = config_from(&[("SMOKER_PORT", "0x1F90")]);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("SMOKER_HOST", "  "),
            ("SMOKER_PORT", "70000"),
            ("SMOKER_HIGH_WATER_MARK", "lots"),
        ]);
        assert_eq!(config, SmokerConfig::default());

        let config = config_from(&[("SMOKER_HIGH_WATER_MARK", "0")]);
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn test_ipv6_bind_addr_is_bracketed() {
        let config = SmokerConfig {
            host: "::1".to_string(),
            ..SmokerConfig::default()
        }
        .with_port(9000);
        assert_eq!(config.bind_addr(), "[::1]:9000");
    }
}
