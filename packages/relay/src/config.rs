//! Process configuration, read from the environment.

use std::{num::ParseIntError, path::PathBuf, time::Duration};

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {name} '{value}': {source}")]
    InvalidNumber {
        name: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    /// `SQLite` ledger location. The ledger is kept in memory when unset.
    pub database_path: Option<PathBuf>,
    pub max_frame_length: usize,
    pub write_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            database_path: None,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

fn parse_number<T: std::str::FromStr<Err = ParseIntError>>(
    name: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|source| ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
            source,
        })
}

impl Config {
    /// Reads the process arguments and environment.
    ///
    /// # Errors
    ///
    /// * If a numeric setting fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(std::env::args().skip(1), |name| std::env::var(name).ok())
    }

    /// Resolves the configuration from positional `args` (program name excluded) and a variable
    /// lookup. The first argument, when present, is the port and wins over `PORT`.
    ///
    /// # Errors
    ///
    /// * If a numeric setting fails to parse
    /// * If `MAX_FRAME_LENGTH` or `WRITE_TIMEOUT_MS` is zero
    pub fn from_sources(
        args: impl IntoIterator<Item = String>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind_addr) = var("BIND_ADDR").filter(|value| !value.is_empty()) {
            config.bind_addr = bind_addr;
        }

        let port = args.into_iter().next().map(|arg| ("port argument", arg));
        let port = port.or_else(|| var("PORT").map(|value| ("PORT", value)));
        if let Some((name, value)) = port {
            config.port = parse_number(name, &value)?;
        }

        config.database_path = var("DATABASE_PATH")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        if let Some(value) = var("MAX_FRAME_LENGTH") {
            config.max_frame_length = parse_number("MAX_FRAME_LENGTH", &value)?;
            if config.max_frame_length == 0 {
                return Err(ConfigError::Zero {
                    name: "MAX_FRAME_LENGTH",
                });
            }
        }

        if let Some(value) = var("WRITE_TIMEOUT_MS") {
            let millis: u64 = parse_number("WRITE_TIMEOUT_MS", &value)?;
            if millis == 0 {
                return Err(ConfigError::Zero {
                    name: "WRITE_TIMEOUT_MS",
                });
            }
            config.write_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}
