use anyhow::Context as _;
use axum::Router;
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::process::Child;
use std::time::{Duration, Instant};

pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Pick an unused TCP port on localhost.
///
/// Note: this does not reserve the port; it's still possible for another process to bind it
/// before you do.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails or if the bound socket's
/// local address cannot be read.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll an HTTP URL until it returns a success status (2xx/3xx).
///
/// # Errors
///
/// Returns an error if the timeout elapses before the endpoint returns a success status.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

/// A small slice of the Xray Server REST API, matching [`spawn_mock_xray`].
pub const XRAY_SPEC_YAML: &str = r#"
openapi: "3.0.0"
info:
  title: Xray Server REST API
  version: "1.0"
paths:
  /rest/raven/1.0/api/test:
    get:
      operationId: getTests
      summary: Get tests by key
      parameters:
        - name: keys
          in: query
          schema: { type: string }
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items: { type: object }
  /rest/raven/1.0/api/test/{testKey}/step:
    post:
      operationId: createTestStep
      parameters:
        - name: testKey
          in: path
          required: true
          schema: { type: string }
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [step]
              properties:
                step: { type: string }
      responses:
        "200":
          description: ok
  /rest/raven/1.0/api/testrun/{id}:
    delete:
      operationId: deleteTestRun
      parameters:
        - name: id
          in: path
          required: true
          schema: { type: integer }
      responses:
        "204":
          description: deleted
"#;

/// Serve a mock Xray API on an ephemeral port.
///
/// `GET .../api/test` echoes the `keys` query and the `Authorization` header it received. Any
/// request without `Bearer test-token` gets a 401.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn spawn_mock_xray() -> anyhow::Result<SocketAddr> {
    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer test-token")
    }

    let app = Router::new()
        .route(
            "/rest/raven/1.0/api/test",
            get(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    if !authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "unauthorized"})));
                    }
                    let keys = q.get("keys").cloned().unwrap_or_default();
                    (
                        StatusCode::OK,
                        axum::Json(json!([{ "key": keys, "type": "Manual" }])),
                    )
                },
            ),
        )
        .route(
            "/rest/raven/1.0/api/test/{test_key}/step",
            axum::routing::post(
                |Path(test_key): Path<String>, axum::Json(body): axum::Json<Value>| async move {
                    axum::Json(json!({ "testKey": test_key, "received": body }))
                },
            ),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind mock xray")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}
