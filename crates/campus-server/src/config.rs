//! Server Configuration

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_POLL_QUOTA: u32 = 30;
const DEFAULT_POLL_WINDOW_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Bearer token → operator id
    pub operator_tokens: HashMap<String, String>,

    /// Status polls allowed per caller and reference within one window
    pub poll_quota: u32,
    pub poll_window: Duration,

    /// JSON array of user records loaded at startup
    pub users_seed_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            operator_tokens: HashMap::new(),
            poll_quota: DEFAULT_POLL_QUOTA,
            poll_window: Duration::from_secs(DEFAULT_POLL_WINDOW_SECS),
            users_seed_path: None,
        }
    }
}

impl ServerConfig {
    /// Load from `BIND_ADDR`, `OPERATOR_TOKENS`, `POLL_QUOTA`,
    /// `POLL_WINDOW_SECS` and `USERS_SEED_PATH`
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let operator_tokens = match var("OPERATOR_TOKENS") {
            Some(raw) => parse_operator_tokens(&raw)?,
            None => HashMap::new(),
        };

        let poll_quota = match var("POLL_QUOTA") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("POLL_QUOTA '{raw}' is not a number"))?,
            None => DEFAULT_POLL_QUOTA,
        };
        let poll_window_secs: u64 = match var("POLL_WINDOW_SECS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("POLL_WINDOW_SECS '{raw}' is not a number"))?,
            None => DEFAULT_POLL_WINDOW_SECS,
        };
        if poll_quota == 0 || poll_window_secs == 0 {
            bail!("POLL_QUOTA and POLL_WINDOW_SECS must be positive");
        }

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            operator_tokens,
            poll_quota,
            poll_window: Duration::from_secs(poll_window_secs),
            users_seed_path: var("USERS_SEED_PATH").map(PathBuf::from),
        })
    }
}

/// `id:token,id:token` → token → id
fn parse_operator_tokens(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut tokens = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((id, token)) = entry.split_once(':') else {
            bail!("OPERATOR_TOKENS entry '{entry}' is not id:token");
        };
        let (id, token) = (id.trim(), token.trim());
        if id.is_empty() || token.is_empty() {
            bail!("OPERATOR_TOKENS entry for '{id}' is incomplete");
        }
        if tokens.insert(token.to_string(), id.to_string()).is_some() {
            bail!("OPERATOR_TOKENS reuses a token for '{id}'");
        }
    }
    Ok(tokens)
}
