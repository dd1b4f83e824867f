#![allow(dead_code)]

use anyhow::Context as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub use mcp_xray_test_support::{KillOnDrop, XRAY_SPEC_YAML, spawn_mock_xray};

pub const BIN: &str = env!("CARGO_BIN_EXE_mcp-xray");

/// Variables the binary reads; cleared so the host environment cannot leak into tests.
pub const ENV_VARS: [&str; 12] = [
    "XRAY_URL",
    "XRAY_AUTH_TYPE",
    "XRAY_PERSONAL_TOKEN",
    "XRAY_OPENAPI_SPEC",
    "XRAY_CONFIG_FILE",
    "XRAY_MCP_NAMES_FILE",
    "XRAY_TIMEOUT",
    "XRAY_READ_ONLY",
    "TRANSPORT",
    "PORT",
    "HOST",
    "STREAMABLE_HTTP_PATH",
];

pub fn pick_unused_port() -> anyhow::Result<u16> {
    mcp_xray_test_support::pick_unused_port()
}

pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    mcp_xray_test_support::wait_http_ok(url, timeout_dur).await
}

/// A `mcp-xray` command running in `workdir` with a clean environment.
pub fn mcp_xray_command(workdir: &Path) -> Command {
    let mut cmd = Command::new(BIN);
    cmd.current_dir(workdir).env_remove("RUST_LOG");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

pub fn write_spec(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join("xray-openapi.yaml");
    std::fs::write(&path, XRAY_SPEC_YAML).context("write spec")?;
    Ok(path)
}

/// Start `mcp-xray` over an HTTP transport against the mock Xray API at `xray_base`.
pub fn spawn_http_server(
    workdir: &Path,
    spec: &Path,
    xray_base: &str,
    transport: &str,
    port: u16,
    extra: &[&str],
) -> anyhow::Result<Child> {
    mcp_xray_command(workdir)
        .arg("--transport")
        .arg(transport)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .arg("--xray-url")
        .arg(xray_base)
        .arg("--xray-personal-token")
        .arg("test-token")
        .arg("--xray-openapi-spec")
        .arg(spec)
        .arg("-v")
        .args(extra)
        .stdout(Stdio::null())
        .spawn()
        .context("spawn mcp-xray")
}
