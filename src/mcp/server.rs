use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::tools::ToolRegistry;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on a `Content-Length` framed body.
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct RpcReq {
    #[serde(rename = "jsonrpc", default)]
    _jsonrpc: Option<String>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct RpcResp {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl RpcResp {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Error, Serialize)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn parse(e: impl std::fmt::Display) -> Self {
        Self { code: -32700, message: format!("parse error: {e}") }
    }
    fn invalid_request(e: impl std::fmt::Display) -> Self {
        Self { code: -32600, message: format!("invalid request: {e}") }
    }
    fn method_not_found(method: &str) -> Self {
        Self { code: -32601, message: format!("method not found: {method}") }
    }
    fn invalid_params(msg: impl Into<String>) -> Self {
        Self { code: -32602, message: msg.into() }
    }
    fn internal(e: impl std::fmt::Display) -> Self {
        Self { code: -32603, message: format!("internal error: {e}") }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// How a request arrived; replies go back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Lines,
    ContentLength,
}

/// JSON-RPC 2.0 tool server speaking MCP over a byte stream (stdio in practice).
pub struct McpServer {
    info: ServerInfo,
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(info: ServerInfo, tools: ToolRegistry) -> Self {
        Self { info, tools }
    }

    pub async fn serve_stdio(&self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Runs until the reader hits EOF.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some((framing, body)) = read_message(&mut reader)
            .await
            .context("reading MCP request")?
        {
            if let Some(resp) = self.handle(&body).await {
                let text = serde_json::to_string(&resp)?;
                write_message(&mut writer, framing, &text)
                    .await
                    .context("writing MCP response")?;
            }
        }
        debug!("stdin closed, stopping server");
        Ok(())
    }

    async fn handle(&self, raw: &str) -> Option<RpcResp> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "malformed JSON-RPC message");
                return Some(RpcResp::err(Value::Null, RpcError::parse(e)));
            }
        };
        // Only a missing `id` marks a notification; `"id": null` still gets a reply.
        let id = value.get("id").cloned();
        let req: RpcReq = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return Some(RpcResp::err(
                    id.unwrap_or(Value::Null),
                    RpcError::invalid_request(e),
                ));
            }
        };

        let Some(id) = id else {
            debug!(method = %req.method, "notification");
            return None;
        };

        let resp = match self.dispatch(&req.method, req.params).await {
            Ok(result) => RpcResp::ok(id, result),
            Err(e) => {
                warn!(method = %req.method, error = %e, "request failed");
                RpcResp::err(id, e)
            }
        };
        Some(resp)
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "initialize" => {
                let version = params
                    .as_ref()
                    .and_then(|p| p.get("protocolVersion"))
                    .and_then(Value::as_str)
                    .unwrap_or(PROTOCOL_VERSION);
                info!(client_version = version, "initialize");
                Ok(json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": self.info,
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .tools
                    .list()
                    .into_iter()
                    .map(|spec| {
                        json!({
                            "name": spec.name,
                            "description": spec.description,
                            "inputSchema": spec.parameters,
                            "annotations": { "readOnlyHint": spec.read_only },
                        })
                    })
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
                let call: CallParams = serde_json::from_value(params)
                    .map_err(|e| RpcError::invalid_params(format!("invalid params: {e}")))?;
                let tool = self
                    .tools
                    .get(&call.name)
                    .ok_or_else(|| RpcError::invalid_params(format!("unknown tool: {}", call.name)))?;
                info!(tool = %call.name, "tools/call");
                let output = tool.call(&call.arguments).await;
                serde_json::to_value(output).map_err(RpcError::internal)
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

async fn read_message<R>(reader: &mut R) -> std::io::Result<Option<(Framing, String)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.to_ascii_lowercase().starts_with("content-length:") {
            let len = parse_content_length(trimmed)?;
            // remaining header lines up to the blank separator
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
                    break;
                }
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            return Ok(Some((
                Framing::ContentLength,
                String::from_utf8_lossy(&body).into_owned(),
            )));
        }
        return Ok(Some((Framing::Lines, trimmed.to_string())));
    }
}

fn parse_content_length(header: &str) -> std::io::Result<usize> {
    let raw = header.split_once(':').map(|x| x.1.trim()).unwrap_or("");
    let len: usize = raw.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("bad Content-Length {raw:?}: {e}"),
        )
    })?;
    if len > MAX_MESSAGE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Content-Length {len} exceeds limit of {MAX_MESSAGE_BYTES} bytes"),
        ));
    }
    Ok(len)
}

async fn write_message<W>(writer: &mut W, framing: Framing, body: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::Lines => {
            writer.write_all(body.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(body.as_bytes()).await?;
        }
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::{StubTransport, client, sample_response};
    use std::sync::Arc;

    fn server(stub: Arc<StubTransport>) -> McpServer {
        McpServer::new(
            ServerInfo {
                name: "Archethic UCO Price Oracle".into(),
                version: "1.0.0".into(),
            },
            ToolRegistry::with_default(client(stub)),
        )
    }

    async fn run(server: &McpServer, input: &str) -> Vec<Value> {
        let mut out: Vec<u8> = Vec::new();
        server.serve(input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let srv = server(StubTransport::json(sample_response()));
        let replies = run(
            &srv,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#,
        )
        .await;

        assert_eq!(replies.len(), 1);
        let result = &replies[0]["result"];
        assert_eq!(replies[0]["id"], json!(1));
        assert_eq!(result["protocolVersion"], json!("2025-03-26"));
        assert_eq!(result["serverInfo"]["name"], json!("Archethic UCO Price Oracle"));
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn lists_price_tool_with_empty_schema() {
        let srv = server(StubTransport::json(sample_response()));
        let replies = run(&srv, r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#).await;

        let tools = replies[0]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], json!("getUcoPrice"));
        assert_eq!(tools[0]["inputSchema"]["type"], json!("object"));
        assert_eq!(tools[0]["annotations"]["readOnlyHint"], json!(true));
    }

    #[tokio::test]
    async fn tool_call_returns_price_text() {
        let srv = server(StubTransport::json(sample_response()));
        let replies = run(
            &srv,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"getUcoPrice","arguments":{}}}"#,
        )
        .await;

        let result = &replies[0]["result"];
        assert!(result.get("isError").is_none());
        let text = result["content"][0]["text"].as_str().unwrap();
        let report: Value = serde_json::from_str(text).unwrap();
        assert_eq!(report["raw_timestamp"], json!(1700000000));
        assert_eq!(report["timestamp"], json!("2023-11-14T22:13:20.000Z"));
    }

    #[tokio::test]
    async fn failed_fetch_is_an_error_envelope_not_an_rpc_error() {
        let srv = server(StubTransport::respond(500, ""));
        let replies = run(
            &srv,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"getUcoPrice"}}"#,
        )
        .await;

        assert!(replies[0].get("error").is_none());
        let result = &replies[0]["result"];
        assert_eq!(result["isError"], json!(true));
        assert!(
            result["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("status: 500")
        );
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let srv = server(StubTransport::json(sample_response()));
        let replies = run(
            &srv,
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
             {\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"ping\"}\n",
        )
        .await;

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], json!(3));
        assert_eq!(replies[0]["result"], json!({}));
    }

    #[tokio::test]
    async fn protocol_errors_use_jsonrpc_codes() {
        let srv = server(StubTransport::json(sample_response()));
        let replies = run(
            &srv,
            "not json\n\
             {\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"resources/list\"}\n\
             {\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"tools/call\",\"params\":{\"name\":\"nope\"}}\n\
             {\"jsonrpc\":\"2.0\",\"id\":6,\"method\":\"tools/call\"}\n",
        )
        .await;

        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["error"]["code"], json!(-32700));
        assert_eq!(replies[1]["error"]["code"], json!(-32601));
        assert_eq!(replies[2]["error"]["code"], json!(-32602));
        assert!(
            replies[2]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("nope")
        );
        assert_eq!(replies[3]["error"]["code"], json!(-32602));
    }

    #[tokio::test]
    async fn null_id_is_a_request_not_a_notification() {
        let srv = server(StubTransport::json(sample_response()));
        let replies = run(&srv, r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).await;

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0], json!({ "jsonrpc": "2.0", "id": null, "result": {} }));
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected_without_allocating() {
        let srv = server(StubTransport::json(sample_response()));
        let mut out: Vec<u8> = Vec::new();
        let err = srv
            .serve(
                "Content-Length: 18446744073709551615\r\n\r\n{}".as_bytes(),
                &mut out,
            )
            .await
            .unwrap_err();

        assert!(out.is_empty());
        assert!(format!("{err:#}").contains("exceeds limit"));
    }

    #[tokio::test]
    async fn unparseable_content_length_stops_instead_of_answering_twice() {
        let srv = server(StubTransport::json(sample_response()));
        let mut out: Vec<u8> = Vec::new();
        let err = srv
            .serve(
                "Content-Length: lots\r\n\r\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n"
                    .as_bytes(),
                &mut out,
            )
            .await
            .unwrap_err();

        assert!(out.is_empty());
        assert!(format!("{err:#}").contains("bad Content-Length"));
    }

    #[tokio::test]
    async fn content_length_requests_get_framed_replies() {
        let srv = server(StubTransport::json(sample_response()));
        let body = r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#;
        let input = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);

        let mut out: Vec<u8> = Vec::new();
        srv.serve(input.as_bytes(), &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();

        let (header, reply) = out.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", reply.len()));
        let reply: Value = serde_json::from_str(reply).unwrap();
        assert_eq!(reply["id"], json!(9));
    }
}
