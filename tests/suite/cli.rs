//! End-to-end runs of the `relay-rpc` binary against a mock relay.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    PING_URL, SUBMIT_PATH, Sandbox, mount_accept, mount_inline, mount_poll_result,
};

#[tokio::test]
async fn send_waits_for_polled_result() {
    let server = MockServer::start().await;
    mount_accept(&server, "r1", 1).await;
    mount_poll_result(&server, "r1", json!({"pong": true})).await;
    let sandbox = Sandbox::new(&server);

    let out = sandbox.run(&["send", PING_URL, "--body", r#"{"n":1}"#]).await;
    assert!(out.success, "stderr: {}", out.stderr);

    let record = out.json();
    assert_eq!(record["status"], "SUCCESS");
    assert_eq!(record["result"], json!({"pong": true}));
    assert_eq!(record["remoteRequestId"], "r1");
    assert_eq!(record["callData"]["body"], json!({"n": 1}));
}

#[tokio::test]
async fn send_forwards_method_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SUBMIT_PATH))
        .and(header("x-syft-method", "PUT"))
        .and(header("x-trace", "abc"))
        .and(header("x-syft-from", "guest@syft.local"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("stored")))
        .expect(1)
        .mount(&server)
        .await;
    let sandbox = Sandbox::new(&server);

    let out = sandbox
        .run(&["send", PING_URL, "--method", "PUT", "--header", "x-trace=abc"])
        .await;
    assert!(out.success, "stderr: {}", out.stderr);
    assert_eq!(out.json()["result"], "stored");
}

#[tokio::test]
async fn failed_send_exits_nonzero_and_keeps_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SUBMIT_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;
    let sandbox = Sandbox::new(&server);

    let out = sandbox.run(&["send", PING_URL]).await;
    assert!(!out.success);
    assert!(out.stderr.contains("Error 500: boom"), "stderr: {}", out.stderr);

    let listed = sandbox.run(&["list"]).await.json();
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["status"], "ERROR");
}

#[tokio::test]
async fn malformed_url_is_rejected_without_network() {
    let server = MockServer::start().await;
    mount_inline(&server, json!(null), 0).await;
    let sandbox = Sandbox::new(&server);

    let out = sandbox
        .run(&["send", "syft://alice@openmined.org/app_data/my_app/ping"])
        .await;
    assert!(!out.success);
    assert!(out.stderr.contains("malformed syft url"), "stderr: {}", out.stderr);
}

#[tokio::test]
async fn repeated_send_is_served_from_store() {
    let server = MockServer::start().await;
    mount_inline(&server, json!({"once": true}), 1).await;
    let sandbox = Sandbox::new(&server);

    let first = sandbox.run(&["send", PING_URL, "--body", "hi"]).await.json();
    let second = sandbox.run(&["send", PING_URL, "--body", "hi"]).await.json();
    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["result"], json!({"once": true}));
}

#[tokio::test]
async fn no_wait_then_resume_then_show() {
    let server = MockServer::start().await;
    mount_accept(&server, "r7", 1).await;
    mount_poll_result(&server, "r7", json!("late answer")).await;
    let sandbox = Sandbox::new(&server);

    let queued = sandbox.run(&["send", PING_URL, "--no-wait"]).await.json();
    assert_eq!(queued["status"], "PENDING");
    let id = queued["id"].as_str().unwrap().to_string();

    let resumed = sandbox.run(&["resume"]).await.json();
    assert_eq!(
        resumed,
        json!([{"id": id, "status": "SUCCESS", "result": "late answer"}])
    );

    let shown = sandbox.run(&["show", &id]).await.json();
    assert_eq!(shown["status"], "SUCCESS");
    assert_eq!(shown["pollAttempt"], 0);

    let missing = sandbox.run(&["show", "req_missing"]).await;
    assert!(!missing.success);
}

#[tokio::test]
async fn send_after_no_wait_delivers_queued_request() {
    let server = MockServer::start().await;
    mount_inline(&server, json!("delivered"), 1).await;
    let sandbox = Sandbox::new(&server);

    let queued = sandbox.run(&["send", PING_URL, "--no-wait"]).await.json();
    assert_eq!(queued["status"], "PENDING");

    let sent = tokio::time::timeout(Duration::from_secs(10), sandbox.run(&["send", PING_URL]))
        .await
        .expect("send finished");
    assert!(sent.success, "stderr: {}", sent.stderr);
    let record = sent.json();
    assert_eq!(record["id"], queued["id"]);
    assert_eq!(record["status"], "SUCCESS");
    assert_eq!(record["result"], "delivered");
}

#[tokio::test]
async fn clear_one_and_all() {
    let server = MockServer::start().await;
    let sandbox = Sandbox::new(&server);

    let first = sandbox.run(&["send", PING_URL, "--body", "1", "--no-wait"]).await.json();
    sandbox.run(&["send", PING_URL, "--body", "2", "--no-wait"]).await;
    sandbox.run(&["send", PING_URL, "--body", "3", "--no-wait"]).await;

    let id = first["id"].as_str().unwrap();
    assert_eq!(sandbox.run(&["clear", id]).await.json(), json!({"cleared": 1}));
    assert_eq!(sandbox.run(&["clear", id]).await.json(), json!({"cleared": 0}));
    assert_eq!(
        sandbox.run(&["clear", "--all"]).await.json(),
        json!({"cleared": 2})
    );
    assert_eq!(sandbox.run(&["list"]).await.json(), json!([]));

    assert!(!sandbox.run(&["clear"]).await.success);
}
