use super::{Tool, ToolOutput, ToolSpec};
use crate::oracle::{OracleClient, OracleError, PriceQuote};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

pub const TOOL_NAME: &str = "getUcoPrice";
pub const TOOL_DESCRIPTION: &str =
    "Fetches the latest UCO price (USD and EUR) from the Archethic network oracle";

const SOURCE: &str = "Archethic Oracle";
const ASSET: &str = "UCO";

#[derive(Debug, Error)]
pub enum PriceToolError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("invalid oracle timestamp: {0}")]
    Timestamp(#[from] time::Error),
    #[error("encoding price report: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceReport {
    pub source: &'static str,
    pub asset: &'static str,
    pub price_usd: f64,
    pub price_eur: f64,
    pub timestamp: String,
    pub raw_timestamp: i64,
}

impl PriceReport {
    pub fn from_quote(quote: &PriceQuote) -> Result<Self, time::Error> {
        Ok(Self {
            source: SOURCE,
            asset: ASSET,
            price_usd: quote.usd,
            price_eur: quote.eur,
            timestamp: iso_timestamp(quote.timestamp)?,
            raw_timestamp: quote.timestamp,
        })
    }
}

/// `2023-11-14T22:13:20.000Z`: UTC with millisecond precision.
pub fn iso_timestamp(unix_secs: i64) -> Result<String, time::Error> {
    let at = OffsetDateTime::from_unix_timestamp(unix_secs)?;
    let fmt =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    Ok(at.format(fmt)?)
}

pub struct GetUcoPrice {
    oracle: OracleClient,
}

impl GetUcoPrice {
    pub fn new(oracle: OracleClient) -> Self {
        Self { oracle }
    }

    async fn report(&self) -> Result<String, PriceToolError> {
        let quote = self.oracle.fetch().await?;
        let report = PriceReport::from_quote(&quote)?;
        Ok(serde_json::to_string_pretty(&report)?)
    }
}

#[async_trait]
impl Tool for GetUcoPrice {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_NAME.into(),
            description: TOOL_DESCRIPTION.into(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": false
            }),
            read_only: true,
        }
    }

    // Arguments are ignored; the query is fixed.
    async fn call(&self, _args: &Value) -> ToolOutput {
        match self.report().await {
            Ok(text) => ToolOutput::text(text),
            Err(e) => ToolOutput::error(format!("Error fetching UCO price: {e}")),
        }
    }
}
