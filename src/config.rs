//! Process configuration
//!
//! Everything comes from environment variables (a `.env` file is loaded
//! first by `main`). Tool providers are described in a separate JSON file.

use crate::llm::LlmConfig;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_TOOL_CYCLES: u32 = 25;
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub max_tool_cycles: u32,
    pub tool_providers: Option<PathBuf>,
    pub system_prompt: Option<String>,
    pub alphavantage_api_key: Option<String>,
    pub llm: LlmConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let db_path = var("THREADLOOM_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".threadloom").join("threadloom.db")
            },
            PathBuf::from,
        );

        let port = parse_or("THREADLOOM_PORT", var("THREADLOOM_PORT"), DEFAULT_PORT)?;
        let max_tool_cycles = parse_or(
            "THREADLOOM_MAX_TOOL_CYCLES",
            var("THREADLOOM_MAX_TOOL_CYCLES"),
            DEFAULT_MAX_TOOL_CYCLES,
        )?;

        Ok(Self {
            db_path,
            port,
            max_tool_cycles,
            tool_providers: var("THREADLOOM_TOOL_PROVIDERS").map(PathBuf::from),
            system_prompt: var("THREADLOOM_SYSTEM_PROMPT"),
            alphavantage_api_key: var("ALPHAVANTAGE_API_KEY"),
            llm: LlmConfig::from_lookup(&var),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

// ==================== Tool Providers ====================

/// One external tool provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_MS
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportConfig {
    Stdio(StdioConfig),
    StreamableHttp(HttpConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StdioConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Read the provider file at `path`, expanding `${VAR}` references in
/// `env` and `headers` values from the process environment.
///
/// Providers are returned ordered by name.
pub fn load_providers(path: &Path) -> Result<BTreeMap<String, ProviderConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_providers(&raw, |name| std::env::var(name).ok()).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_providers(
    raw: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<BTreeMap<String, ProviderConfig>, serde_json::Error> {
    let mut providers: BTreeMap<String, ProviderConfig> = serde_json::from_str(raw)?;
    for (name, provider) in &mut providers {
        let values = match &mut provider.transport {
            TransportConfig::Stdio(cfg) => &mut cfg.env,
            TransportConfig::StreamableHttp(cfg) => &mut cfg.headers,
        };
        for value in values.values_mut() {
            *value = expand_vars(name, value, &lookup);
        }
    }
    Ok(providers)
}

/// Replace each `${NAME}` with the variable's value. Unset variables expand
/// to the empty string; an unterminated `${` is kept literally.
fn expand_vars(provider: &str, value: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some((before, after)) = rest.split_once("${") {
        out.push_str(before);
        let Some((name, tail)) = after.split_once('}') else {
            out.push_str("${");
            rest = after;
            break;
        };
        if let Some(resolved) = lookup(name) {
            out.push_str(&resolved);
        } else {
            tracing::warn!(provider, variable = name, "Provider config references unset variable");
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}
