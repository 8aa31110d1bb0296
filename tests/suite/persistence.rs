//! Requests outliving the bridge that created them, over the file store.

use std::sync::Arc;
use std::time::Duration;

use relaybridge_engine::{Bridge, KeyValueStore, RemoteRequestId, RequestRecord, RequestStatus};
use relaybridge_store::{FileStore, RecordStore};
use serde_json::json;
use wiremock::MockServer;

use crate::common::{PING_URL, Sandbox, mount_inline, mount_poll_result};

fn file_store(sandbox: &Sandbox) -> Arc<dyn KeyValueStore> {
    Arc::new(FileStore::new(sandbox.store_dir()))
}

#[tokio::test]
async fn queued_request_is_sent_by_a_later_bridge() {
    let server = MockServer::start().await;
    mount_inline(&server, json!({"from": "second bridge"}), 1).await;
    let sandbox = Sandbox::new(&server);

    let id = {
        let first = Bridge::new(sandbox.settings(), file_store(&sandbox)).unwrap();
        let call = first.call_data(PING_URL).unwrap();
        first.enqueue(call).id().clone()
    };

    let second = Bridge::new(sandbox.settings(), file_store(&sandbox)).unwrap();
    assert_eq!(second.get(&id).unwrap().status(), RequestStatus::Pending);
    assert_eq!(
        second.resume(&id).await.unwrap(),
        json!({"from": "second bridge"})
    );

    let third = Bridge::new(sandbox.settings(), file_store(&sandbox)).unwrap();
    assert_eq!(third.get(&id).unwrap().status(), RequestStatus::Success);
}

#[tokio::test]
async fn reopened_bridge_resumes_polling_record() {
    let server = MockServer::start().await;
    mount_inline(&server, json!(null), 0).await;
    mount_poll_result(&server, "r1", json!("eventually")).await;
    let sandbox = Sandbox::new(&server);

    // Left behind by a bridge that stopped after the relay accepted the call.
    let record = {
        let bridge = Bridge::new(sandbox.settings(), file_store(&sandbox)).unwrap();
        let call = bridge.call_data(PING_URL).unwrap();
        let mut record = RequestRecord::new(bridge.fingerprint(&call), call);
        record.accept(RemoteRequestId::new("r1").unwrap()).unwrap();
        record
    };
    let store = RecordStore::new(file_store(&sandbox), sandbox.settings().store_key);
    let mut records = store.read_all();
    records.insert(record.id().clone(), record.clone());
    store.write_all(&records).unwrap();

    let reopened = Bridge::new(sandbox.settings(), file_store(&sandbox)).unwrap();
    assert_eq!(reopened.get(record.id()).unwrap().status(), RequestStatus::Polling);
    assert_eq!(reopened.resume(record.id()).await.unwrap(), json!("eventually"));

    let stored = reopened.get(record.id()).unwrap();
    assert_eq!(stored.status(), RequestStatus::Success);
    assert_eq!(stored.remote_request_id().map(RemoteRequestId::as_str), Some("r1"));
}

#[tokio::test]
async fn open_picks_up_unfinished_work() {
    let server = MockServer::start().await;
    mount_inline(&server, json!("resumed on open"), 1).await;
    let sandbox = Sandbox::new(&server);

    let id = {
        let bridge = Bridge::new(sandbox.settings(), file_store(&sandbox)).unwrap();
        let call = bridge.call_data(PING_URL).unwrap();
        bridge.enqueue(call).id().clone()
    };

    let mut settings = sandbox.settings();
    settings.auto_resume = true;
    let bridge = Bridge::open(settings, file_store(&sandbox)).await.unwrap();
    let value = tokio::time::timeout(Duration::from_secs(5), bridge.wait(&id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, json!("resumed on open"));
}

#[tokio::test]
async fn unreadable_store_file_starts_empty() {
    let server = MockServer::start().await;
    let sandbox = Sandbox::new(&server);
    let store = FileStore::new(sandbox.store_dir());
    store
        .set(&sandbox.settings().store_key, "[definitely not records")
        .unwrap();

    let bridge = Bridge::new(sandbox.settings(), Arc::new(store)).unwrap();
    assert!(bridge.list().is_empty());
}
