//! `RagflowClient` against an in-process fake of the RAGFlow v1 API.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};

use report_analyst::analysis::{AnalysisService, RagflowClient};
use report_analyst::models::{ChunkConfig, ParseStatus, Session};

const API_KEY: &str = "ragflow-test-key";

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", API_KEY);
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
}

async fn list_datasets(headers: HeaderMap) -> Json<Value> {
    if !authorized(&headers) {
        return Json(json!({"code": 109, "message": "Authentication error: API key is invalid!"}));
    }
    Json(json!({
        "code": 0,
        "data": [
            {"id": "ds-1", "name": "weekly_report", "chunk_count": 12},
            {"id": "ds-2"}
        ]
    }))
}

async fn create_dataset(Json(body): Json<Value>) -> Json<Value> {
    if body["name"] == "taken" {
        return Json(json!({"code": 102, "message": "Duplicated dataset name"}));
    }
    assert_eq!(body["parser_config"]["chunk_token_num"], 2048);
    assert_eq!(body["chunk_method"], "naive");
    Json(json!({"code": 0, "data": {"id": "ds-new", "name": body["name"]}}))
}

async fn list_documents(
    Path(dataset_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    assert_eq!(dataset_id, "ds-1");
    if let Some(id) = query.get("id") {
        if id == "missing" {
            return Json(json!({"code": 0, "data": {"docs": [], "total": 0}}));
        }
        return Json(json!({
            "code": 0,
            "data": {"docs": [{"id": id, "name": "sales_w12.xlsx", "run": "DONE"}], "total": 1}
        }));
    }
    // Keyword search is a substring match.
    Json(json!({
        "code": 0,
        "data": {
            "docs": [
                {"id": "doc-1", "name": "sales_w12.xlsx", "run": "RUNNING"},
                {"id": "doc-2", "name": "sales_w12.xlsx.bak", "run": "DONE"}
            ],
            "total": 2
        }
    }))
}

async fn create_session(Path(chat_id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "code": 0,
        "data": {"id": "sess-1", "chat_id": chat_id, "name": body["name"], "messages": []}
    }))
}

async fn completions(Path(chat_id): Path<String>, Json(body): Json<Value>) -> impl IntoResponse {
    assert_eq!(body["stream"], true);
    assert_eq!(body["session_id"], "sess-1");
    if chat_id == "chat-broken" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            "boom".to_string(),
        );
    }
    let events = [
        r#"data:{"code":0,"data":{"answer":"Sales","reference":{}}}"#,
        r#"data:{"code":0,"data":{"answer":"Sales rose 4%","reference":{}}}"#,
        r#"data:{"code":0,"data":true}"#,
    ];
    let body = events
        .iter()
        .map(|e| format!("{}\n\n", e))
        .collect::<String>();
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn spawn_fake() -> String {
    let app = Router::new()
        .route("/api/v1/datasets", get(list_datasets).post(create_dataset))
        .route("/api/v1/datasets/{id}/documents", get(list_documents))
        .route("/api/v1/chats/{id}/sessions", post(create_session))
        .route("/api/v1/chats/{id}/completions", post(completions));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str, key: &str) -> RagflowClient {
    RagflowClient::new(base_url, key, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn lists_datasets_with_optional_names() {
    let base = spawn_fake().await;
    let datasets = client(&base, API_KEY).list_datasets().await.unwrap();

    assert_eq!(datasets.len(), 2);
    assert_eq!(datasets[0].name.as_deref(), Some("weekly_report"));
    assert_eq!(datasets[1].name, None);
}

#[tokio::test]
async fn envelope_error_becomes_service_error() {
    let base = spawn_fake().await;

    let err = client(&base, "wrong-key").list_datasets().await.unwrap_err();
    assert_eq!(err.operation, "list_datasets");
    assert!(err.cause.contains("109"), "{}", err.cause);
    assert!(err.cause.contains("API key is invalid"), "{}", err.cause);

    let err = client(&base, API_KEY)
        .create_dataset("taken", "", "embedding-3", ChunkConfig { chunk_token_num: 2048 })
        .await
        .unwrap_err();
    assert_eq!(err.operation, "create_dataset");
    assert!(err.cause.contains("Duplicated dataset name"));
}

#[tokio::test]
async fn creates_dataset() {
    let base = spawn_fake().await;
    let dataset = client(&base, API_KEY)
        .create_dataset(
            "weekly_report",
            "Weekly report dataset",
            "embedding-3",
            ChunkConfig { chunk_token_num: 2048 },
        )
        .await
        .unwrap();
    assert_eq!(dataset.id, "ds-new");
    assert_eq!(dataset.name.as_deref(), Some("weekly_report"));
}

#[tokio::test]
async fn find_documents_keeps_exact_name_matches_only() {
    let base = spawn_fake().await;
    let docs = client(&base, API_KEY)
        .find_documents("ds-1", "sales_w12.xlsx")
        .await
        .unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "doc-1");
    assert_eq!(docs[0].status, ParseStatus::Running);
}

#[tokio::test]
async fn document_status_reads_run_field() {
    let base = spawn_fake().await;
    let rag = client(&base, API_KEY);

    let doc = rag.document_status("ds-1", "doc-1").await.unwrap();
    assert_eq!(doc.status, ParseStatus::Done);

    let err = rag.document_status("ds-1", "missing").await.unwrap_err();
    assert_eq!(err.operation, "document_status");
}

#[tokio::test]
async fn streams_answer_snapshots_until_done() {
    let base = spawn_fake().await;
    let rag = client(&base, API_KEY);

    let session = rag.create_session("chat-1", "analysis_sales_w12_1700000000").await.unwrap();
    assert_eq!(session.id, "sess-1");
    assert_eq!(session.assistant_id, "chat-1");
    assert_eq!(session.name, "analysis_sales_w12_1700000000");

    let snapshots: Vec<String> = rag
        .ask(&session, "How did sales do?")
        .await
        .unwrap()
        .map(|s| s.unwrap().text)
        .collect::<Vec<_>>()
        .await;
    assert_eq!(snapshots, vec!["Sales".to_string(), "Sales rose 4%".to_string()]);
}

#[tokio::test]
async fn ask_http_error_is_service_error() {
    let base = spawn_fake().await;
    let session = Session {
        id: "sess-1".into(),
        assistant_id: "chat-broken".into(),
        name: "analysis_x_1".into(),
    };

    let err = match client(&base, API_KEY).ask(&session, "q").await {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    };
    assert_eq!(err.operation, "ask");
    assert!(err.cause.contains("500"), "{}", err.cause);
}
