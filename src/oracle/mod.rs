pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

use crate::config::OracleConfig;

pub const ARCHETHIC_API_URL: &str = "https://mainnet.archethic.net/api";

pub const UCO_PRICE_QUERY: &str = r#"
  query {
    oracleData {
      timestamp
      services {
        uco {
          eur
          usd
        }
      }
    }
  }
"#;

const LOG_PREFIX: &str = "Error fetching Archethic UCO price";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{0}")]
    Transport(#[source] BoxError),
    #[error("HTTP error! status: {0}")]
    HttpStatus(u16),
    #[error("invalid JSON in oracle response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("GraphQL error: {0}")]
    Upstream(String),
    #[error("Invalid response structure from Archethic API (missing {0})")]
    InvalidStructure(&'static str),
}

/// One oracle reading. Values are copied verbatim from the response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    /// Unix seconds as reported by the oracle.
    pub timestamp: i64,
    pub usd: f64,
    pub eur: f64,
}

/// Outbound POST used by [`OracleClient`]. Tests swap in a canned transport.
#[async_trait]
pub trait OracleTransport: Send + Sync {
    async fn post(&self, url: &str, body: &Value) -> Result<Box<dyn OracleReply>, BoxError>;
}

/// A response whose body is only pulled when `text` is called.
#[async_trait]
pub trait OracleReply: Send {
    fn status(&self) -> u16;
    async fn text(self: Box<Self>) -> Result<String, BoxError>;
}

#[derive(Clone)]
pub struct OracleClient {
    endpoint: String,
    transport: Arc<dyn OracleTransport>,
}

impl OracleClient {
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn OracleTransport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
        }
    }

    pub fn from_config(cfg: &OracleConfig) -> Result<Self, OracleError> {
        let transport = http::HttpTransport::new(cfg.effective_timeout())
            .map_err(|e| OracleError::Transport(Box::new(e)))?;
        Ok(Self::new(cfg.effective_endpoint(), Arc::new(transport)))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Queries the oracle once. Every failure is logged before it is returned.
    pub async fn fetch(&self) -> Result<PriceQuote, OracleError> {
        self.try_fetch()
            .await
            .inspect_err(|e| error!(error = ?e, endpoint = %self.endpoint, "{LOG_PREFIX}: {e}"))
    }

    async fn try_fetch(&self) -> Result<PriceQuote, OracleError> {
        let body = json!({ "query": UCO_PRICE_QUERY });
        let reply = self
            .transport
            .post(&self.endpoint, &body)
            .await
            .map_err(OracleError::Transport)?;

        let status = reply.status();
        if !(200..300).contains(&status) {
            return Err(OracleError::HttpStatus(status));
        }

        let text = reply.text().await.map_err(OracleError::Transport)?;
        let value: Value = serde_json::from_str(&text)?;
        extract_quote(&value)
    }
}

/// Walks `data.oracleData.services.uco` one step at a time. GraphQL errors win
/// over any partial data in the same payload.
pub fn extract_quote(body: &Value) -> Result<PriceQuote, OracleError> {
    if let Some(messages) = graphql_errors(body) {
        return Err(OracleError::Upstream(messages));
    }

    let data = step(body, "data", "data")?;
    let oracle = step(data, "oracleData", "data.oracleData")?;
    let services = step(oracle, "services", "data.oracleData.services")?;
    let uco = step(services, "uco", "data.oracleData.services.uco")?;

    let timestamp = step(oracle, "timestamp", "data.oracleData.timestamp")?
        .as_i64()
        .ok_or(OracleError::InvalidStructure("data.oracleData.timestamp"))?;
    let usd = step(uco, "usd", "data.oracleData.services.uco.usd")?
        .as_f64()
        .ok_or(OracleError::InvalidStructure("data.oracleData.services.uco.usd"))?;
    let eur = step(uco, "eur", "data.oracleData.services.uco.eur")?
        .as_f64()
        .ok_or(OracleError::InvalidStructure("data.oracleData.services.uco.eur"))?;

    Ok(PriceQuote { timestamp, usd, eur })
}

fn step<'a>(value: &'a Value, key: &str, path: &'static str) -> Result<&'a Value, OracleError> {
    match value.get(key) {
        Some(v) if !v.is_null() => Ok(v),
        _ => Err(OracleError::InvalidStructure(path)),
    }
}

fn graphql_errors(body: &Value) -> Option<String> {
    let errors = body.get("errors")?;
    let messages: Vec<String> = match errors {
        Value::Null => return None,
        Value::Array(list) if list.is_empty() => return None,
        Value::Array(list) => list.iter().map(error_message).collect(),
        other => vec![error_message(other)],
    };
    Some(messages.join(", "))
}

fn error_message(err: &Value) -> String {
    match err.get("message").and_then(Value::as_str) {
        Some(m) => m.to_string(),
        None => match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}
