//! HTTP API tests: a real server on an ephemeral port, backed by the
//! in-memory workspace.

mod common;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use coda_sentinel::config::Config;
use coda_sentinel::models::AccessLevel;
use coda_sentinel::remediate::RemediationDispatcher;
use coda_sentinel::scan::Scanner;
use coda_sentinel::server::run_server;

use common::{anonymous_viewer, blocks, email_grant, row, FakeWorkspace};

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Poll `/api/status` until a scan report is available.
async fn wait_for_scan(base: &str) -> Value {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        let status: Value = client
            .get(format!("{}/api/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if !status["lastScan"].is_null() && status["running"] == json!(false) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("initial scan did not finish");
}

fn workspace() -> FakeWorkspace {
    FakeWorkspace::new()
        .with_document("doc-a", "Alpha", 40)
        .with_document("doc-b", "Beta", 0)
        .with_permission("doc-a", anonymous_viewer("perm-anon"))
        .with_permission(
            "doc-b",
            email_grant("perm-ext", "eve@example.org", AccessLevel::ReadOnly),
        )
        .with_rows(
            "doc-a",
            "table-1",
            vec![row("row-1", json!({ "password": "hunter2" }))],
        )
        .with_page(
            "doc-b",
            "page-1",
            "Keys",
            "<p>token: abc</p>",
            vec![blocks(&["secret value"])],
        )
}

/// Start a server and return its base URL and the workspace behind it.
async fn start(workspace: FakeWorkspace, scan_on_startup: bool) -> (String, Arc<FakeWorkspace>) {
    let port = find_free_port();
    let mut config = Config::default();
    config.server.bind = format!("127.0.0.1:{}", port);
    config.scan.scan_on_startup = scan_on_startup;

    let workspace = Arc::new(workspace);
    let scanner = Arc::new(Scanner::new(&config, workspace.clone()));
    let dispatcher = Arc::new(RemediationDispatcher::new(workspace.clone()));

    tokio::spawn(async move { run_server(&config, scanner, dispatcher).await });
    wait_for_server(port).await;

    (format!("http://127.0.0.1:{}", port), workspace)
}

#[tokio::test]
async fn test_health_reports_version() {
    let (base, _) = start(FakeWorkspace::new(), false).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_initial_scan_fills_alerts() {
    let (base, _) = start(workspace(), true).await;
    let status = wait_for_scan(&base).await;
    assert_eq!(status["alerts"], 6);

    let alerts: Vec<Value> = reqwest::get(format!("{}/api/alerts", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let kinds: Vec<&str> = alerts.iter().filter_map(|a| a["type"].as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            "UNUSED_DOCUMENT",
            "PUBLIC_DOCUMENT",
            "EXTERNAL_SHARE",
            "SENSITIVE_DATA_IN_ROW",
            "SENSITIVE_TEXT_ON_PAGE",
            "SENSITIVE_PAGE_CONTENT",
        ]
    );
    assert_eq!(alerts[1]["severity"], 9);
    assert_eq!(alerts[1]["subjectId"], "doc-a");
}

#[tokio::test]
async fn test_alert_pagination() {
    let (base, _) = start(workspace(), true).await;
    wait_for_scan(&base).await;
    let client = reqwest::Client::new();

    let page: Vec<Value> = client
        .get(format!("{}/api/alerts?page=2&limit=4", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["type"], "SENSITIVE_TEXT_ON_PAGE");

    let window: Vec<Value> = client
        .get(format!("{}/api/alerts?offset=1&limit=1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0]["type"], "PUBLIC_DOCUMENT");

    let resp = client
        .get(format!("{}/api/alerts?limit=0", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .get(format!("{}/api/alerts?limit=abc", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_rescan_returns_report() {
    let (base, _) = start(workspace(), false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/rescan", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Scan complete");
    assert_eq!(body["report"]["alerts"], 6);
    assert_eq!(body["report"]["cancelled"], false);

    // A second rescan replaces the alerts rather than adding to them.
    client
        .post(format!("{}/api/rescan", base))
        .send()
        .await
        .unwrap();
    let alerts: Vec<Value> = client
        .get(format!("{}/api/alerts?limit=100", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts.len(), 6);
}

#[tokio::test]
async fn test_concurrent_rescan_conflicts() {
    let gate = Arc::new(Notify::new());
    let workspace = FakeWorkspace {
        gate: Some(gate.clone()),
        ..FakeWorkspace::new()
    }
    .with_document("doc-1", "Old", 90);
    let (base, _) = start(workspace, false).await;
    let client = reqwest::Client::new();

    let first = {
        let client = client.clone();
        let url = format!("{}/api/rescan", base);
        tokio::spawn(async move { client.post(url).send().await.unwrap().status() })
    };

    let mut running = false;
    for _ in 0..50 {
        let status: Value = client
            .get(format!("{}/api/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if status["running"] == json!(true) {
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(running, "first rescan never started");

    let resp = client
        .post(format!("{}/api/rescan", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "conflict");

    gate.notify_one();
    assert_eq!(first.await.unwrap(), 200);
}

#[tokio::test]
async fn test_documents_passthrough() {
    let (base, _) = start(workspace(), false).await;
    let client = reqwest::Client::new();

    let docs: Vec<Value> = client
        .get(format!("{}/api/documents", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["id"], "doc-a");

    let doc: Value = client
        .get(format!("{}/api/documents/doc-b", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["name"], "Beta");

    let resp = client
        .get(format!("{}/api/documents/nope", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_remediate_actions() {
    let (base, workspace) = start(workspace(), false).await;
    let client = reqwest::Client::new();

    let outcome: Value = client
        .post(format!("{}/api/remediate/doc-a", base))
        .json(&json!({ "action": "removePublicAccess" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["message"], "Public access removed successfully");
    assert_eq!(
        *workspace.deleted_permissions.lock().unwrap(),
        vec!["perm-anon"]
    );

    // No body means delete.
    let outcome: Value = client
        .post(format!("{}/api/remediate/doc-b", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(*workspace.deleted_documents.lock().unwrap(), vec!["doc-b"]);

    let resp = client
        .post(format!("{}/api/remediate/missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["message"], "Document missing not found");

    let resp = client
        .post(format!("{}/api/remediate/doc-a", base))
        .header("content-type", "application/json")
        .body(r#"{"action": "shred"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_rescan_survives_client_disconnect() {
    let gate = Arc::new(Notify::new());
    let workspace = FakeWorkspace {
        gate: Some(gate.clone()),
        ..FakeWorkspace::new()
    }
    .with_document("doc-1", "Old", 90)
    .with_permission("doc-1", anonymous_viewer("perm-anon"));
    let (base, _) = start(workspace, false).await;

    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let result = impatient.post(format!("{}/api/rescan", base)).send().await;
    assert!(result.is_err(), "rescan should still be blocked on the gate");

    gate.notify_one();
    let status = wait_for_scan(&base).await;
    assert_eq!(status["alerts"], 2);
    assert_eq!(status["lastScan"]["cancelled"], false);
    assert_eq!(status["lastScan"]["documents"], 1);
}
