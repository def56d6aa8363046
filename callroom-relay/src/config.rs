//! Relay settings, merged from the command line, the environment, an
//! optional TOML file and built-in defaults (in that order of precedence).
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:3000"
//! public_dir = "/srv/callroom/public"
//! max_message_size = 65536
//!
//! [log]
//! level = "callroom_relay=debug,info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::relay::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PUBLIC_DIR};

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read, or an explicitly
    /// requested file is missing.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has a field of the wrong type.
    #[error("invalid config in {}: {source}", path.display())]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// On-disk layout. Every key is optional so a file may set only a few.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    server: ServerSection,
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    bind_addr: Option<String>,
    public_dir: Option<PathBuf>,
    max_message_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
}

/// Command-line flags. Each one can also come from a `CALLROOM_*` variable.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Callroom signaling relay")]
pub struct RelayCliArgs {
    /// Socket address to listen on.
    #[arg(short, long, env = "CALLROOM_ADDR")]
    pub bind: Option<String>,

    /// Directory holding the static client bundle.
    #[arg(long, env = "CALLROOM_PUBLIC_DIR")]
    pub public_dir: Option<PathBuf>,

    /// Largest inbound WebSocket frame, in bytes. Bigger frames close the
    /// connection.
    #[arg(long, env = "CALLROOM_MAX_MESSAGE_SIZE")]
    pub max_message_size: Option<usize>,

    /// `tracing` filter directive, e.g. `debug` or `callroom_relay=trace`.
    #[arg(long, env = "CALLROOM_LOG")]
    pub log_level: Option<String>,

    /// TOML file to read instead of `~/.config/callroom/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Settings the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Socket address to listen on.
    pub bind_addr: String,
    /// Directory the static client bundle is served from.
    pub public_dir: PathBuf,
    /// Largest inbound WebSocket frame, in bytes.
    pub max_message_size: usize,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Reads the config file named by `--config`, or the per-user default if
    /// there is one, and layers `cli` on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if an explicit `--config` file cannot be
    /// read, and [`ConfigError::Parse`] if any file that was read is invalid.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_settings(path)?,
            None => match default_path() {
                Some(path) if path.exists() => read_settings(&path)?,
                _ => FileSettings::default(),
            },
        };
        Ok(Self::merge(cli, file))
    }

    fn merge(cli: &RelayCliArgs, file: FileSettings) -> Self {
        let fallback = Self::default();
        let FileSettings { server, log } = file;
        Self {
            bind_addr: cli.bind.clone().or(server.bind_addr).unwrap_or(fallback.bind_addr),
            public_dir: cli
                .public_dir
                .clone()
                .or(server.public_dir)
                .unwrap_or(fallback.public_dir),
            max_message_size: cli
                .max_message_size
                .or(server.max_message_size)
                .unwrap_or(fallback.max_message_size),
            log_level: cli.log_level.clone().or(log.level).unwrap_or(fallback.log_level),
        }
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("callroom").join("config.toml"))
}

fn read_settings(path: &Path) -> Result<FileSettings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
