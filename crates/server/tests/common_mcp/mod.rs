use anyhow::Context as _;
use futures::StreamExt as _;
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncBufReadExt as _;
use tokio_util::io::StreamReader;

/// Minimal MCP client for the rmcp-native streamable HTTP endpoint.
///
/// Test-only; production code never speaks MCP as a client.
pub struct McpStreamableHttpSession {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
}

impl McpStreamableHttpSession {
    pub async fn connect(endpoint: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::new();
        let endpoint = endpoint.to_string();

        // initialize → creates session id header and returns first response over event-stream
        let init_resp = post_mcp(&client, &endpoint, None, json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "mcp-xray-integration-tests", "version": "0" }
            }
        }))
        .await?;

        let session_id = init_resp
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|h| h.to_str().ok())
            .context("missing Mcp-Session-Id header")?
            .to_string();

        let init_msg = read_first_event_stream_json_message(init_resp).await?;
        anyhow::ensure!(init_msg.get("id") == Some(&json!(0)), "unexpected init id");
        anyhow::ensure!(
            init_msg.pointer("/result/serverInfo/name") == Some(&json!("mcp-xray")),
            "unexpected serverInfo: {init_msg}"
        );

        let initialized_resp = post_mcp(
            &client,
            &endpoint,
            Some(&session_id),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await?;

        anyhow::ensure!(
            initialized_resp.status().as_u16() == 202,
            "notifications/initialized returned {}",
            initialized_resp.status()
        );

        Ok(Self {
            client,
            endpoint,
            session_id,
        })
    }

    pub async fn request(
        &self,
        id: u64,
        method: &str,
        params: serde_json::Value,
        timeout_dur: Duration,
    ) -> anyhow::Result<serde_json::Value> {
        let resp = post_mcp(
            &self.client,
            &self.endpoint,
            Some(&self.session_id),
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }),
        )
        .await?;

        let msg = tokio::time::timeout(timeout_dur, read_first_event_stream_json_message(resp))
            .await
            .context("timeout waiting for event-stream response")??;

        Ok(msg)
    }
}

/// Extract the tool call response body as JSON.
///
/// - If `result.structuredContent.body` is present, it is returned.
/// - Otherwise, `result.content[0].text` is parsed as JSON.
///
/// # Errors
///
/// Returns an error if the message is missing a tool call result, or if the body cannot be
/// extracted/parsed as JSON.
#[allow(dead_code)]
pub fn tool_call_body_json(msg: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let result = msg.get("result").context("tools/call missing result")?;

    if let Some(sc) = result.get("structuredContent") {
        return sc
            .get("body")
            .cloned()
            .context("tools/call missing result.structuredContent.body");
    }

    let text = result
        .get("content")
        .and_then(serde_json::Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("text"))
        .and_then(serde_json::Value::as_str)
        .context("tools/call missing result.content[0].text")?;

    serde_json::from_str(text).context("tools/call text is not JSON")
}

async fn post_mcp(
    client: &reqwest::Client,
    endpoint: &str,
    session_id: Option<&str>,
    body: serde_json::Value,
) -> anyhow::Result<reqwest::Response> {
    let mut req = client
        .post(endpoint)
        .header("Accept", "application/json, text/event-stream")
        .header("Content-Type", "application/json")
        .json(&body);

    if let Some(session_id) = session_id {
        req = req.header("Mcp-Session-Id", session_id);
    }

    req.send()
        .await
        .with_context(|| format!("POST {endpoint}"))?
        .error_for_status()
        .with_context(|| format!("POST {endpoint} status"))
}

pub async fn read_first_event_stream_json_message(
    resp: reqwest::Response,
) -> anyhow::Result<serde_json::Value> {
    let mut stream = resp.bytes_stream();
    let byte_stream = futures::stream::poll_fn(move |cx| stream.poll_next_unpin(cx))
        .map(|r| r.map_err(std::io::Error::other));
    let reader = StreamReader::new(byte_stream);
    let mut lines = tokio::io::BufReader::new(reader).lines();

    let mut data_lines: Vec<String> = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end().to_string();

        if line.is_empty() {
            if data_lines.is_empty() {
                continue;
            }
            let data = data_lines.join("\n");
            return serde_json::from_str(&data).context("parse event-stream data as JSON");
        }

        // Priming events carry an empty `data:` line.
        if let Some(v) = line.strip_prefix("data:").map(str::trim)
            && !v.is_empty()
        {
            data_lines.push(v.to_string());
        }
    }

    anyhow::bail!("event-stream ended without a JSON message")
}
