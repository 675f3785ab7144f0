use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::gateway::GatewaySettings;

/// Command line options for the chat server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory holding the database.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Directory holding `chat.db`.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Lifetime of issued login tokens.
    pub token_ttl_hours: i64,
    /// Secret used to sign login tokens. Random per process when unset.
    pub token_secret: Option<String>,
    /// Per connection outbound event buffer.
    pub outbound_capacity: usize,
    /// Socket write timeout in milliseconds.
    pub write_timeout_ms: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("logging_enabled", &self.logging_enabled)
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("outbound_capacity", &self.outbound_capacity)
            .field("write_timeout_ms", &self.write_timeout_ms)
            .finish()
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    gateway: FileGateway,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    data_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize)]
struct FileAuth {
    #[serde(default = "default_token_ttl")]
    token_ttl_hours: i64,
    #[serde(default)]
    token_secret: Option<String>,
}

#[derive(Deserialize)]
struct FileGateway {
    #[serde(default = "default_outbound_capacity")]
    outbound_capacity: usize,
    #[serde(default = "default_write_timeout")]
    write_timeout_ms: u64,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_token_ttl() -> i64 {
    24
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_write_timeout() -> u64 {
    5000
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: None,
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileAuth {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl(),
            token_secret: None,
        }
    }
}

impl Default for FileGateway {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("ROOM_CHAT_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/room_chat.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };
        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;

        // environment overrides
        if let Ok(p) = std::env::var("ROOM_CHAT_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("ROOM_CHAT_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if file_cfg.gateway.outbound_capacity == 0 {
            anyhow::bail!("invalid_outbound_capacity");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| std::env::var("DATA_DIR").ok().map(PathBuf::from))
            .or(file_cfg.server.data_dir)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
            token_ttl_hours: file_cfg.auth.token_ttl_hours,
            token_secret: file_cfg.auth.token_secret,
            outbound_capacity: file_cfg.gateway.outbound_capacity,
            write_timeout_ms: file_cfg.gateway.write_timeout_ms,
        })
    }

    /// Defaults suitable for tests and local runs against a given data dir.
    pub fn for_data_dir(bind: String, data_dir: PathBuf) -> Self {
        Self {
            bind,
            data_dir,
            logging_enabled: false,
            token_ttl_hours: default_token_ttl(),
            token_secret: None,
            outbound_capacity: default_outbound_capacity(),
            write_timeout_ms: default_write_timeout(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chat.db")
    }

    pub fn gateway(&self) -> GatewaySettings {
        GatewaySettings {
            outbound_capacity: self.outbound_capacity,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/room_chat");
        p
    } else {
        PathBuf::from("./room_chat_data")
    }
}
