use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const ENV_HOST: &str = "UNSEAL_HOST";
pub const ENV_PORT: &str = "UNSEAL_PORT";
pub const ENV_LOG_FORMAT: &str = "UNSEAL_LOG_FORMAT";
pub const ENV_LOG_LEVEL: &str = "UNSEAL_LOG_LEVEL";
pub const ENV_ROOT_TOKEN: &str = "UNSEAL_ROOT_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Standard,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "standard" => Ok(LogFormat::Standard),
            other => Err(format!(
                "unknown log format `{other}`; expected `json` or `standard`"
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Standard => f.write_str("standard"),
        }
    }
}

/// Broker settings after every layer has been applied.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub log_level: String,
    /// Fixed id for the bootstrap root token; generated when unset.
    pub root_token: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8200,
            log_format: LogFormat::Standard,
            log_level: "info".into(),
            root_token: None,
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_format", &self.log_format)
            .field("log_level", &self.log_level)
            .field("root_token", &self.root_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Values given on the command line; `None` keeps the lower layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_format: Option<LogFormat>,
    pub log_level: Option<String>,
    pub root_token: Option<String>,
}

impl BrokerConfig {
    /// Defaults, then the optional TOML file, then `UNSEAL_*` variables, then
    /// command-line overrides.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PORT} must be a port number, got `{port}`"))?;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log_format = format
                .parse()
                .map_err(|err: String| anyhow!(err))
                .with_context(|| format!("invalid {ENV_LOG_FORMAT}"))?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(token) = lookup(ENV_ROOT_TOKEN) {
            self.root_token = Some(token);
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
        if let Some(token) = &overrides.root_token {
            self.root_token = Some(token.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.http_addr()?;
        if self
            .root_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            anyhow::bail!("root token must not be empty when set");
        }
        Ok(())
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .trim()
            .parse()
            .with_context(|| format!("host must be an IP address, got `{}`", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
