//! Engine configuration from the environment

use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// SQLite file used by the durable store
    pub db_path: PathBuf,
    /// Model round trips allowed per submitted turn
    pub max_tool_rounds: usize,
    /// Request streamed responses from the transport
    pub streaming: bool,
    pub max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(None),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            streaming: true,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

fn default_db_path(home: Option<String>) -> PathBuf {
    let home = home.unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(home)
        .join(".conversation-engine")
        .join("conversations.db")
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; unparseable values keep their default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("ENGINE_DB_PATH")
            .map_or_else(|| default_db_path(lookup("HOME")), PathBuf::from);

        Self {
            db_path,
            max_tool_rounds: parse_or(&lookup, "ENGINE_MAX_TOOL_ROUNDS", DEFAULT_MAX_TOOL_ROUNDS),
            streaming: lookup("ENGINE_STREAMING").map_or(true, |v| parse_flag("ENGINE_STREAMING", &v)),
            max_tokens: parse_or(&lookup, "ENGINE_MAX_TOKENS", DEFAULT_MAX_TOKENS),
        }
    }

    /// Create the directory holding `db_path` if it does not exist yet
    pub fn ensure_db_dir(&self) -> std::io::Result<()> {
        match self.db_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = %raw, default = %default, "Invalid config value, using default");
        default
    })
}

fn parse_flag(key: &str, raw: &str) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => true,
        "0" | "false" | "off" | "no" => false,
        _ => {
            tracing::warn!(key, value = %raw, "Invalid config flag, using default");
            true
        }
    }
}
