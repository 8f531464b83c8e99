use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::mcp::server::ServerInfo;
use crate::oracle::ARCHETHIC_API_URL;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SERVER_NAME: &str = "Archethic UCO Price Oracle";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub oracle: Option<OracleConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OracleConfig {
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    pub name: Option<String>,
    pub version: Option<String>,
}

const EXAMPLE: &str = r#"# uco-price-mcp config (TOML)

[oracle]
# endpoint can be omitted to use env var ARCHETHIC_API_URL or the mainnet API
endpoint = "https://mainnet.archethic.net/api"
# per-request timeout; env var UCO_ORACLE_TIMEOUT_MS is used when unset
timeout_ms = 10000

[server]
# name and version reported to MCP clients in serverInfo
# name = "Archethic UCO Price Oracle"
# version = "1.0.0"
"#;

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(p) = path {
            let text = fs::read_to_string(p).with_context(|| format!("reading config at {p}"))?;
            return parse(&text).with_context(|| "parsing config");
        }
        let default = Self::default_path()?;
        if default.exists() {
            let text = fs::read_to_string(&default)
                .with_context(|| format!("reading config at {}", default.display()))?;
            parse(&text).with_context(|| "parsing config")
        } else {
            Ok(Self::default())
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| anyhow!("cannot resolve config dir"))?;
        Ok(base.join("uco-price-mcp").join("config.toml"))
    }

    pub fn write_example_if_absent() -> Result<PathBuf> {
        let path = Self::default_path()?;
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, EXAMPLE)
                .with_context(|| format!("writing config at {}", path.display()))?;
        }
        Ok(path)
    }

    pub fn oracle(&self) -> OracleConfig {
        self.oracle.clone().unwrap_or_default()
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }
}

fn parse(text: &str) -> Result<Config> {
    toml::from_str(text).map_err(|e| anyhow!(e))
}

impl OracleConfig {
    pub fn effective_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .or_else(|| std::env::var("ARCHETHIC_API_URL").ok())
            .unwrap_or_else(|| ARCHETHIC_API_URL.into())
    }

    pub fn effective_timeout(&self) -> Duration {
        let ms = self
            .timeout_ms
            .or_else(|| {
                std::env::var("UCO_ORACLE_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Duration::from_millis(ms)
    }
}

impl ServerConfig {
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.into()),
            version: self
                .version
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").into()),
        }
    }
}
