use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use super::{BoxError, OracleReply, OracleTransport};

/// reqwest-backed transport. No connection is held between calls beyond
/// reqwest's own pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

struct HttpReply(reqwest::Response);

#[async_trait]
impl OracleReply for HttpReply {
    fn status(&self) -> u16 {
        self.0.status().as_u16()
    }

    async fn text(self: Box<Self>) -> Result<String, BoxError> {
        let HttpReply(resp) = *self;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl OracleTransport for HttpTransport {
    async fn post(&self, url: &str, body: &Value) -> Result<Box<dyn OracleReply>, BoxError> {
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        Ok(Box::new(HttpReply(resp)))
    }
}
