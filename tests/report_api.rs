//! The report read API served over a real socket.

use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;

use report_analyst::db;
use report_analyst::server::run_server_with_store;
use report_analyst::store::{ReportStore, SqliteReportStore};

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start(store: Arc<dyn ReportStore>) -> String {
    let port = find_free_port();
    let bind = format!("127.0.0.1:{}", port);
    tokio::spawn(async move {
        run_server_with_store(&bind, store).await.ok();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn seeded_store(tmp: &TempDir) -> Arc<SqliteReportStore> {
    let store = Arc::new(SqliteReportStore::new(tmp.path().join("data/reports.sqlite")));
    assert!(
        store
            .upsert_report(
                "sales_w12.xlsx",
                "Sales rose 4% week over week.",
                Some("http://localhost:9000/excel-reports/sales_w12.xlsx"),
            )
            .await
    );
    assert!(
        store
            .upsert_report("inventory_w12.xlsx", "Stock levels are stable.", None)
            .await
    );
    store
}

#[tokio::test]
async fn health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let base = start(seeded_store(&tmp).await).await;

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
async fn lists_reports_and_names() {
    let tmp = TempDir::new().unwrap();
    let base = start(seeded_store(&tmp).await).await;

    let resp = reqwest::get(format!("{}/get/report", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    for entry in data {
        assert!(entry["id"].is_i64());
        assert!(entry["report_name"].is_string());
        assert!(entry["create_time"].as_str().unwrap().ends_with('Z'));
    }

    let body: Value = reqwest::get(format!("{}/get/report/name", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    let mut names: Vec<&str> = body["report_names"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["inventory_w12.xlsx", "sales_w12.xlsx"]);
}

#[tokio::test]
async fn returns_description_by_name() {
    let tmp = TempDir::new().unwrap();
    let base = start(seeded_store(&tmp).await).await;

    let resp = reqwest::get(format!("{}/get/report/description/sales_w12.xlsx", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["description"], "Sales rose 4% week over week.");
}

#[tokio::test]
async fn unknown_report_is_not_successful() {
    let tmp = TempDir::new().unwrap();
    let base = start(seeded_store(&tmp).await).await;

    let resp = reqwest::get(format!("{}/get/report/description/missing.xlsx", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("missing.xlsx"));
}

#[tokio::test]
async fn unreachable_database_is_server_error() {
    let tmp = TempDir::new().unwrap();
    // A regular file where the database directory should be.
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let store = Arc::new(SqliteReportStore::new(blocker.join("reports.sqlite")));
    let base = start(store).await;

    for path in [
        "/get/report",
        "/get/report/name",
        "/get/report/description/sales_w12.xlsx",
    ] {
        let resp = reqwest::get(format!("{}{}", base, path)).await.unwrap();
        assert_eq!(resp.status(), 500, "{}", path);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn legacy_table_fails_listing_softly_and_description_hard() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("legacy.sqlite");
    let pool = db::connect(&path).await.unwrap();
    sqlx::query("CREATE TABLE ai_analysis (id INTEGER PRIMARY KEY, report_name TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;
    let base = start(Arc::new(SqliteReportStore::new(path))).await;

    for path in ["/get/report", "/get/report/name"] {
        let resp = reqwest::get(format!("{}{}", base, path)).await.unwrap();
        assert_eq!(resp.status(), 200, "{}", path);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(
            body["error"].as_str().unwrap().contains("create_time"),
            "{}: {}",
            path,
            body["error"]
        );
    }

    let resp = reqwest::get(format!("{}/get/report/description/sales_w12.xlsx", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
}
