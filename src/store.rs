//! Report persistence.
//!
//! The [`ReportStore`] trait is what the orchestrator and the HTTP API talk
//! to. [`SqliteReportStore`] keeps reports in the `ai_analysis` table;
//! [`InMemoryReportStore`] backs tests.
//!
//! Reports are keyed by name. Upserting an existing name updates its text,
//! path and `update_time` in place, so a name never maps to more than one row.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::db;
use crate::error::{PersistenceError, StoreError};
use crate::migrate;
use crate::models::{Report, ReportSummary};

/// Storage backend for analysis reports.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_report`](ReportStore::upsert_report) | Insert or update a report by name |
/// | [`list_reports`](ReportStore::list_reports) | All reports, newest first |
/// | [`report_names`](ReportStore::report_names) | Distinct report names |
/// | [`get_report`](ReportStore::get_report) | One report by name |
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert or update the report called `name`.
    ///
    /// Returns `false` instead of an error when the backend is unreachable or
    /// the statement fails; the failure is logged here. A `None` storage path
    /// leaves any previously stored path untouched.
    async fn upsert_report(
        &self,
        name: &str,
        analysis_text: &str,
        storage_path: Option<&str>,
    ) -> bool;

    async fn list_reports(&self) -> Result<Vec<ReportSummary>, StoreError>;

    async fn report_names(&self) -> Result<Vec<String>, StoreError>;

    async fn get_report(&self, name: &str) -> Result<Option<Report>, StoreError>;
}

/// What an upsert did to the row for a report name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upserted {
    Inserted,
    Updated,
}

// ============ SQLite ============

/// SQLite-backed [`ReportStore`].
///
/// The pool is opened on first use and reopened whenever it has been closed,
/// so a store can be constructed before the database is reachable.
pub struct SqliteReportStore {
    path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: Mutex::new(None),
        }
    }

    /// Current pool, (re)connecting if there is none or it was closed.
    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
            tracing::info!(path = %self.path.display(), "database connection closed, reconnecting");
        }

        let pool = db::connect(&self.path)
            .await
            .map_err(|e| StoreError::Connect(format!("{:#}", e)))?;
        migrate::ensure_schema(&pool)
            .await
            .map_err(|e| StoreError::Query(format!("schema: {:#}", e)))?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    /// Close the pool. The next operation reconnects.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
    }

    async fn try_upsert(
        &self,
        name: &str,
        analysis_text: &str,
        storage_path: Option<&str>,
    ) -> Result<Upserted, PersistenceError> {
        let pool = self
            .pool()
            .await
            .map_err(|e| PersistenceError(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM ai_analysis WHERE report_name = ?")
                .bind(name)
                .fetch_optional(&pool)
                .await
                .map_err(|e| PersistenceError(format!("lookup: {}", e)))?;

        if existing.is_some() {
            sqlx::query(
                r#"
                UPDATE ai_analysis
                SET ai_description = ?,
                    minio_report_path = COALESCE(?, minio_report_path),
                    update_time = ?
                WHERE report_name = ?
                "#,
            )
            .bind(analysis_text)
            .bind(storage_path)
            .bind(now)
            .bind(name)
            .execute(&pool)
            .await
            .map_err(|e| PersistenceError(format!("update: {}", e)))?;
            return Ok(Upserted::Updated);
        }

        // A concurrent writer may have inserted the name since the lookup.
        sqlx::query(
            r#"
            INSERT INTO ai_analysis (report_name, ai_description, minio_report_path, create_time, update_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(report_name) DO UPDATE SET
                ai_description = excluded.ai_description,
                minio_report_path = COALESCE(excluded.minio_report_path, ai_analysis.minio_report_path),
                update_time = excluded.update_time
            "#,
        )
        .bind(name)
        .bind(analysis_text)
        .bind(storage_path)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .map_err(|e| PersistenceError(format!("insert: {}", e)))?;

        Ok(Upserted::Inserted)
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn upsert_report(
        &self,
        name: &str,
        analysis_text: &str,
        storage_path: Option<&str>,
    ) -> bool {
        match self.try_upsert(name, analysis_text, storage_path).await {
            Ok(Upserted::Updated) => {
                tracing::info!(report = name, "updated existing report");
                true
            }
            Ok(Upserted::Inserted) => {
                tracing::info!(report = name, "inserted new report");
                true
            }
            Err(e) => {
                tracing::error!(report = name, error = %e, "failed to save report");
                false
            }
        }
    }

    async fn list_reports(&self) -> Result<Vec<ReportSummary>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT id, report_name, create_time FROM ai_analysis ORDER BY create_time DESC, id DESC",
        )
        .fetch_all(&pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ReportSummary {
                id: row.get("id"),
                report_name: row.get("report_name"),
                create_time: row.get("create_time"),
            })
            .collect())
    }

    async fn report_names(&self) -> Result<Vec<String>, StoreError> {
        let pool = self.pool().await?;
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT report_name FROM ai_analysis ORDER BY report_name")
                .fetch_all(&pool)
                .await?;
        Ok(names)
    }

    async fn get_report(&self, name: &str) -> Result<Option<Report>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            "SELECT id, report_name, ai_description, minio_report_path, create_time, update_time FROM ai_analysis WHERE report_name = ?",
        )
        .bind(name)
        .fetch_optional(&pool)
        .await?;

        Ok(row.map(|row| Report {
            id: row.get("id"),
            report_name: row.get("report_name"),
            ai_description: row.get("ai_description"),
            minio_report_path: row.get("minio_report_path"),
            create_time: row.get("create_time"),
            update_time: row.get("update_time"),
        }))
    }
}

// ============ In-memory ============

/// In-memory [`ReportStore`] for tests.
pub struct InMemoryReportStore {
    reports: RwLock<BTreeMap<String, Report>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.reports.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn upsert_report(
        &self,
        name: &str,
        analysis_text: &str,
        storage_path: Option<&str>,
    ) -> bool {
        let Ok(mut reports) = self.reports.write() else {
            return false;
        };
        let now = chrono::Utc::now().timestamp();
        let next_id = reports.len() as i64 + 1;

        reports
            .entry(name.to_string())
            .and_modify(|r| {
                r.ai_description = analysis_text.to_string();
                if let Some(path) = storage_path {
                    r.minio_report_path = Some(path.to_string());
                }
                r.update_time = now;
            })
            .or_insert_with(|| Report {
                id: next_id,
                report_name: name.to_string(),
                ai_description: analysis_text.to_string(),
                minio_report_path: storage_path.map(str::to_string),
                create_time: now,
                update_time: now,
            });
        true
    }

    async fn list_reports(&self) -> Result<Vec<ReportSummary>, StoreError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StoreError::Query("report store lock poisoned".to_string()))?;
        let mut out: Vec<ReportSummary> = reports
            .values()
            .map(|r| ReportSummary {
                id: r.id,
                report_name: r.report_name.clone(),
                create_time: r.create_time,
            })
            .collect();
        out.sort_by(|a, b| b.create_time.cmp(&a.create_time).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn report_names(&self) -> Result<Vec<String>, StoreError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StoreError::Query("report store lock poisoned".to_string()))?;
        Ok(reports.keys().cloned().collect())
    }

    async fn get_report(&self, name: &str) -> Result<Option<Report>, StoreError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StoreError::Query("report store lock poisoned".to_string()))?;
        Ok(reports.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_store(tmp: &TempDir) -> SqliteReportStore {
        SqliteReportStore::new(tmp.path().join("data").join("reports.sqlite"))
    }

    #[tokio::test]
    async fn upsert_same_name_keeps_one_row_with_latest_text() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp);

        assert!(
            store
                .upsert_report("sales_w12.xlsx", "first draft", Some("http://m/b/sales_w12.xlsx"))
                .await
        );
        assert!(store.upsert_report("sales_w12.xlsx", "second draft", None).await);

        let summaries = store.list_reports().await.unwrap();
        assert_eq!(summaries.len(), 1);

        let report = store.get_report("sales_w12.xlsx").await.unwrap().unwrap();
        assert_eq!(report.ai_description, "second draft");
        assert!(report.update_time >= report.create_time);
    }

    #[tokio::test]
    async fn update_without_path_keeps_previous_path() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp);

        store
            .upsert_report("a.xlsx", "v1", Some("http://minio:9000/excel-reports/a.xlsx"))
            .await;
        store.upsert_report("a.xlsx", "v2", None).await;

        let report = store.get_report("a.xlsx").await.unwrap().unwrap();
        assert_eq!(
            report.minio_report_path.as_deref(),
            Some("http://minio:9000/excel-reports/a.xlsx")
        );
    }

    #[tokio::test]
    async fn update_with_new_path_replaces_it() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp);

        store.upsert_report("a.xlsx", "v1", None).await;
        store.upsert_report("a.xlsx", "v2", Some("http://new/b/a.xlsx")).await;

        let report = store.get_report("a.xlsx").await.unwrap().unwrap();
        assert_eq!(report.minio_report_path.as_deref(), Some("http://new/b/a.xlsx"));
    }

    #[tokio::test]
    async fn names_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp);

        store.upsert_report("b.xlsx", "beta", None).await;
        store.upsert_report("a.xlsx", "alpha", None).await;

        assert_eq!(
            store.report_names().await.unwrap(),
            vec!["a.xlsx".to_string(), "b.xlsx".to_string()]
        );
        assert!(store.get_report("missing.xlsx").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconnects_after_close() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp);

        assert!(store.upsert_report("a.xlsx", "v1", None).await);
        store.close().await;
        assert!(store.upsert_report("a.xlsx", "v2", None).await);

        let report = store.get_report("a.xlsx").await.unwrap().unwrap();
        assert_eq!(report.ai_description, "v2");
    }

    #[tokio::test]
    async fn unreachable_database_returns_false() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file in the way").unwrap();

        let store = SqliteReportStore::new(blocker.join("reports.sqlite"));
        assert!(!store.upsert_report("a.xlsx", "text", None).await);
        assert!(store.list_reports().await.unwrap_err().is_connect());
    }

    #[tokio::test]
    async fn legacy_table_shape_is_query_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("legacy.sqlite");
        let pool = db::connect(&path).await.unwrap();
        sqlx::query("CREATE TABLE ai_analysis (id INTEGER PRIMARY KEY, report_name TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let store = SqliteReportStore::new(path);
        let err = store.report_names().await.unwrap_err();
        assert!(!err.is_connect(), "{}", err);
        assert!(err.to_string().contains("create_time"), "{}", err);
        assert!(!store.upsert_report("a.xlsx", "text", None).await);
    }

    #[tokio::test]
    async fn in_memory_store_upserts_by_name() {
        let store = InMemoryReportStore::new();
        store.upsert_report("a.xlsx", "v1", Some("p1")).await;
        store.upsert_report("a.xlsx", "v2", None).await;

        assert_eq!(store.len(), 1);
        let report = store.get_report("a.xlsx").await.unwrap().unwrap();
        assert_eq!(report.ai_description, "v2");
        assert_eq!(report.minio_report_path.as_deref(), Some("p1"));
    }
}
