//! Runtime configuration from `SUME_*` environment variables and `.env`.

use crate::crypto::KeyStrategy;
use crate::error::{ChatError, Result};
use crate::models::input::{ValidateExt, MAX_PEER_ID_LENGTH};
use crate::session::SessionSettings;
use garde::Validate;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9001";
pub const DEFAULT_DB_PATH: &str = "sume.db";

#[derive(Debug, Clone, Validate)]
#[garde(context(()))]
pub struct ChatConfig {
    /// Identifier advertised to peers. Derived from the listen port when unset.
    #[garde(length(min = 1, max = MAX_PEER_ID_LENGTH))]
    pub peer_id: Option<String>,
    #[garde(length(min = 1))]
    pub listen_addr: String,
    #[garde(range(min = 1, max = 300))]
    pub connect_timeout_secs: u64,
    #[garde(range(min = 16, max = 512))]
    pub frame_size: usize,
    #[garde(range(max = 1000))]
    pub frame_delay_ms: u64,
    #[garde(skip)]
    pub key_strategy: KeyStrategy,
    #[garde(skip)]
    pub allow_plaintext: bool,
    #[garde(length(min = 1))]
    pub db_path: String,
    #[garde(range(min = 1, max = 3600))]
    pub probe_interval_secs: u64,
    #[garde(skip)]
    pub log_dir: Option<PathBuf>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            connect_timeout_secs: 10,
            frame_size: 180,
            frame_delay_ms: 40,
            key_strategy: KeyStrategy::Agreement,
            allow_plaintext: false,
            db_path: DEFAULT_DB_PATH.to_string(),
            probe_interval_secs: 5,
            log_dir: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ChatError::Config(format!("{} has an invalid value: {}", name, raw))),
        _ => Ok(default),
    }
}

fn parse_flag(name: &str, value: Option<String>) -> Result<bool> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ChatError::Config(format!(
            "{} must be true or false, got {}",
            name, other
        ))),
    }
}

impl ChatConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "Ignoring unreadable .env file");
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let key_strategy = match lookup("SUME_KEY_STRATEGY") {
            Some(raw) if !raw.trim().is_empty() => KeyStrategy::parse(raw.trim()).ok_or_else(|| {
                ChatError::Config(format!("SUME_KEY_STRATEGY has an invalid value: {}", raw))
            })?,
            _ => defaults.key_strategy,
        };

        let config = Self {
            peer_id: lookup("SUME_PEER_ID")
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            listen_addr: parse_var("SUME_LISTEN_ADDR", lookup("SUME_LISTEN_ADDR"), defaults.listen_addr)?,
            connect_timeout_secs: parse_var(
                "SUME_CONNECT_TIMEOUT_SECS",
                lookup("SUME_CONNECT_TIMEOUT_SECS"),
                defaults.connect_timeout_secs,
            )?,
            frame_size: parse_var("SUME_FRAME_SIZE", lookup("SUME_FRAME_SIZE"), defaults.frame_size)?,
            frame_delay_ms: parse_var(
                "SUME_FRAME_DELAY_MS",
                lookup("SUME_FRAME_DELAY_MS"),
                defaults.frame_delay_ms,
            )?,
            key_strategy,
            allow_plaintext: parse_flag("SUME_ALLOW_PLAINTEXT", lookup("SUME_ALLOW_PLAINTEXT"))?,
            db_path: parse_var("SUME_DB_PATH", lookup("SUME_DB_PATH"), defaults.db_path)?,
            probe_interval_secs: parse_var(
                "SUME_PROBE_INTERVAL_SECS",
                lookup("SUME_PROBE_INTERVAL_SECS"),
                defaults.probe_interval_secs,
            )?,
            log_dir: lookup("SUME_LOG_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
        };

        config
            .validate_input()
            .map_err(|e| ChatError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|_| {
            ChatError::Config(format!(
                "SUME_LISTEN_ADDR must be ip:port, got {}",
                self.listen_addr
            ))
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            strategy: self.key_strategy,
            allow_plaintext: self.allow_plaintext,
        }
    }

    /// The id peers dial: the configured one, else `ws://<local-ip>:<port>`.
    pub fn advertised_id(&self, bound: SocketAddr) -> String {
        if let Some(id) = &self.peer_id {
            return id.clone();
        }
        let ip = if bound.ip().is_unspecified() {
            local_ip_address::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            bound.ip()
        };
        format!("ws://{}", SocketAddr::new(ip, bound.port()))
    }
}
