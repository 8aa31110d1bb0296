//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests: a mock relay and a sandboxed
//! `relay-rpc` invocation.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use relaybridge_config::{BridgeSettings, parse_server_url};
use serde_json::Value;
use tempfile::TempDir;
use tokio::process::Command;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SUBMIT_PATH: &str = "/api/v1/send/msg";
pub const POLL_PATH: &str = "/api/v1/send/poll";
pub const PING_URL: &str = "syft://alice@openmined.org/app_data/my_app/rpc/ping";

/// Relay answers the submission with 202 and `remote_id`.
pub async fn mount_accept(server: &MockServer, remote_id: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(SUBMIT_PATH))
        .respond_with(
            ResponseTemplate::new(202).set_body_json(serde_json::json!({"request_id": remote_id})),
        )
        .expect(times)
        .mount(server)
        .await;
}

/// Relay answers the submission directly with `body`.
pub async fn mount_inline(server: &MockServer, body: Value, times: u64) {
    Mock::given(method("POST"))
        .and(path(SUBMIT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}

/// Poll for `remote_id` resolves with `{"response": result}`.
pub async fn mount_poll_result(server: &MockServer, remote_id: &str, result: Value) {
    Mock::given(method("GET"))
        .and(path(POLL_PATH))
        .and(query_param("x-syft-request-id", remote_id))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": result})),
        )
        .mount(server)
        .await;
}

/// Isolated home directory with a config tuned for fast polling.
pub struct Sandbox {
    home: TempDir,
    server_uri: String,
}

impl Sandbox {
    pub fn new(server: &MockServer) -> Self {
        let home = tempfile::tempdir().expect("temp home");
        let config = "[polling]\nmax_attempts = 5\ninterval_ms = 10\n";
        std::fs::write(home.path().join("config.toml"), config).expect("write config");
        Self {
            home,
            server_uri: server.uri(),
        }
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.home.path().join("store")
    }

    /// Settings equivalent to what the binary runs with in this sandbox.
    pub fn settings(&self) -> BridgeSettings {
        let mut settings = BridgeSettings::new(parse_server_url(&self.server_uri).unwrap());
        settings.poll_attempts = 5;
        settings.poll_interval = Duration::from_millis(10);
        settings.refresh_interval = Duration::from_millis(20);
        settings.auto_resume = false;
        settings.store_dir = self.store_dir();
        settings
    }

    pub async fn run(&self, args: &[&str]) -> Outcome {
        let output = Command::new(env!("CARGO_BIN_EXE_relay-rpc"))
            .args(args)
            .arg("--server")
            .arg(&self.server_uri)
            .arg("--store-dir")
            .arg(self.store_dir())
            .arg("--config")
            .arg(self.home.path().join("config.toml"))
            .env("HOME", self.home.path())
            .env_remove("RELAYBRIDGE_SERVER_URL")
            .env_remove("RELAYBRIDGE_FROM")
            .env_remove("RUST_LOG")
            .output()
            .await
            .expect("run relay-rpc");
        Outcome::from(output)
    }
}

pub struct Outcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.stdout)
            .unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {}", self.stdout))
    }
}

impl From<Output> for Outcome {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}
