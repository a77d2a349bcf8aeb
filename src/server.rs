//! Report read API.
//!
//! Serves stored analyses over JSON for the dashboard front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/get/report` | All reports, newest first |
//! | `GET`  | `/get/report/name` | Distinct report names |
//! | `GET`  | `/get/report/description/{name}` | Analysis text of one report |
//!
//! # Response Contract
//!
//! Every report response carries a `success` flag:
//!
//! ```json
//! { "success": false, "error": "report not found: sales_w12.xlsx" }
//! ```
//!
//! An unknown report name or a failing list query is answered with `200`
//! and `success: false`. An unreachable database, or any store failure on
//! the description path, is answered with `500` and the same body shape.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the dashboard can be
//! served from a different origin.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::StoreError;
use crate::store::{ReportStore, SqliteReportStore};

/// Starts the report API on `[server].bind` backed by the SQLite store.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteReportStore::new(config.db.path.clone()));
    run_server_with_store(&config.server.bind, store).await
}

/// Starts the report API with an arbitrary [`ReportStore`].
pub async fn run_server_with_store(
    bind_addr: &str,
    store: Arc<dyn ReportStore>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "report API listening");
    println!("Report API listening on http://{}", bind_addr);

    axum::serve(listener, router(store)).await?;
    Ok(())
}

/// The API routes over `store`, with CORS applied.
pub fn router(store: Arc<dyn ReportStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/get/report", get(handle_list_reports))
        .route("/get/report/name", get(handle_report_names))
        .route("/get/report/description/{name}", get(handle_description))
        .layer(cors)
        .with_state(store)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Listing failure: connection → 500, query → 200.
fn list_error(err: StoreError) -> AppError {
    tracing::error!(error = %err, "report store read failed");
    let status = if err.is_connect() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    AppError {
        status,
        message: err.to_string(),
    }
}

/// Any store failure → 500.
fn store_error(err: StoreError) -> AppError {
    tracing::error!(error = %err, "report store read failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: err.to_string(),
    }
}

/// Missing report → 200 with `success: false`.
fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::OK,
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /get/report ============

#[derive(Serialize)]
struct ReportListResponse {
    success: bool,
    data: Vec<ReportEntry>,
}

#[derive(Serialize)]
struct ReportEntry {
    id: i64,
    report_name: String,
    /// ISO-8601 UTC.
    create_time: String,
}

async fn handle_list_reports(
    State(store): State<Arc<dyn ReportStore>>,
) -> Result<Json<ReportListResponse>, AppError> {
    let reports = store.list_reports().await.map_err(list_error)?;
    let data = reports
        .into_iter()
        .map(|r| ReportEntry {
            id: r.id,
            report_name: r.report_name,
            create_time: format_ts_iso(r.create_time),
        })
        .collect();
    Ok(Json(ReportListResponse {
        success: true,
        data,
    }))
}

// ============ GET /get/report/name ============

#[derive(Serialize)]
struct ReportNamesResponse {
    success: bool,
    report_names: Vec<String>,
}

async fn handle_report_names(
    State(store): State<Arc<dyn ReportStore>>,
) -> Result<Json<ReportNamesResponse>, AppError> {
    let report_names = store.report_names().await.map_err(list_error)?;
    Ok(Json(ReportNamesResponse {
        success: true,
        report_names,
    }))
}

// ============ GET /get/report/description/{name} ============

#[derive(Serialize)]
struct DescriptionResponse {
    success: bool,
    report_name: String,
    description: String,
}

async fn handle_description(
    State(store): State<Arc<dyn ReportStore>>,
    Path(name): Path<String>,
) -> Result<Json<DescriptionResponse>, AppError> {
    match store.get_report(&name).await.map_err(store_error)? {
        Some(report) => Ok(Json(DescriptionResponse {
            success: true,
            report_name: report.report_name,
            description: report.ai_description,
        })),
        None => Err(not_found(format!("report not found: {}", name))),
    }
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
