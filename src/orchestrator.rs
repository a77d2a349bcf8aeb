//! Ingestion and analysis orchestration.
//!
//! Takes one report file through the whole pipeline:
//!
//! ```text
//! validate → resolve dataset → resolve document (upload if new)
//!          → ensure parsed (poll) → resolve assistant → new session
//!          → ask (stream) → persist
//! ```
//!
//! [`Orchestrator::analyze`] is the error boundary for a run: every failure
//! ends up in the `error` field of the returned [`AnalysisResult`]. The one
//! exception is persistence, which is logged and otherwise ignored so that a
//! produced answer always counts as success.
//!
//! Idempotency comes from name lookups: a dataset, document or assistant that
//! already exists under the expected name is reused, and a document whose
//! parse is already `DONE` is never parsed again. Only the session is created
//! fresh on every run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisService, RagflowClient};
use crate::config::Config;
use crate::error::{AnalysisError, PersistenceError, ServiceError, StorageError};
use crate::models::{AnalysisResult, Assistant, ChunkConfig, Dataset, ParseStatus, Session};
use crate::object_store::{ObjectStore, S3Client};
use crate::progress::{answer_delta, NoProgress, ProgressEvent, ProgressReporter};
use crate::store::{ReportStore, SqliteReportStore};

/// Run-independent settings, normally taken from [`Config`].
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub dataset_name: String,
    pub dataset_description: String,
    pub embedding_model: String,
    pub chunk_token_num: u32,
    pub bucket: String,
    /// `{name}` is replaced by the file name without extension.
    pub question_template: String,
    pub wait_for_parsing: bool,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub save_to_db: bool,
}

impl AnalysisSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dataset_name: config.analysis.dataset_name.clone(),
            dataset_description: config.analysis.dataset_description.clone(),
            embedding_model: config.analysis.embedding_model.clone(),
            chunk_token_num: config.analysis.chunk_token_num,
            bucket: config.object_store.bucket.clone(),
            question_template: config.analysis.question_template.clone(),
            wait_for_parsing: config.polling.wait_for_parsing,
            max_wait: config.polling.max_wait(),
            poll_interval: config.polling.poll_interval(),
            save_to_db: true,
        }
    }

    /// `floor(max_wait / poll_interval)` status checks.
    pub fn max_attempts(&self) -> u64 {
        let interval = self.poll_interval.as_millis();
        if interval == 0 {
            return 0;
        }
        (self.max_wait.as_millis() / interval) as u64
    }

    fn default_question(&self, stem: &str) -> String {
        self.question_template.replace("{name}", stem)
    }
}

/// One file to analyze, with optional per-run overrides.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub path: PathBuf,
    pub question: Option<String>,
    pub save_to_db: Option<bool>,
    pub wait_for_parsing: Option<bool>,
}

impl AnalyzeRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            question: None,
            save_to_db: None,
            wait_for_parsing: None,
        }
    }

    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    pub fn save_to_db(mut self, save: bool) -> Self {
        self.save_to_db = Some(save);
        self
    }

    pub fn wait_for_parsing(mut self, wait: bool) -> Self {
        self.wait_for_parsing = Some(wait);
        self
    }
}

/// Drives the analysis pipeline against injected collaborators.
pub struct Orchestrator {
    objects: Arc<dyn ObjectStore>,
    service: Arc<dyn AnalysisService>,
    reports: Arc<dyn ReportStore>,
    settings: AnalysisSettings,
    progress: Arc<dyn ProgressReporter>,
}

/// Document ids resolved for a file, plus the object URL when this run
/// uploaded it.
struct ResolvedDocument {
    ids: Vec<String>,
    storage_path: Option<String>,
}

impl Orchestrator {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        service: Arc<dyn AnalysisService>,
        reports: Arc<dyn ReportStore>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            objects,
            service,
            reports,
            settings,
            progress: Arc::new(NoProgress),
        }
    }

    /// Wire the production clients from config: S3-compatible object store,
    /// RAGFlow service and the SQLite report store.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let objects = S3Client::from_config(&config.object_store)?;
        let service = RagflowClient::from_config(&config.analysis)?;
        let reports = SqliteReportStore::new(config.db.path.clone());
        Ok(Self::new(
            Arc::new(objects),
            Arc::new(service),
            Arc::new(reports),
            AnalysisSettings::from_config(config),
        ))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Analyze one file. Never fails; see [`AnalysisResult`].
    pub async fn analyze(&self, request: &AnalyzeRequest) -> AnalysisResult {
        match self.run(request).await {
            Ok(answer) => AnalysisResult::answered(answer),
            Err(e) => {
                warn!(path = %request.path.display(), error = %e, "analysis failed");
                AnalysisResult::failed(e.to_string())
            }
        }
    }

    async fn run(&self, request: &AnalyzeRequest) -> Result<String, AnalysisError> {
        let path = request.path.as_path();
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(AnalysisError::FileNotFound(path.to_path_buf()));
        }

        let file_name = file_name(path);
        let stem = file_stem(path);
        let question = request
            .question
            .clone()
            .unwrap_or_else(|| self.settings.default_question(&stem));
        info!(file = %file_name, question = %question, "analyzing report");

        let dataset = self.resolve_dataset().await?;
        let document = self.resolve_document(&dataset, path, &file_name).await?;

        let wait = request
            .wait_for_parsing
            .unwrap_or(self.settings.wait_for_parsing);
        self.ensure_parsed(&dataset, &document.ids, &file_name, wait)
            .await?;

        let assistant = self.resolve_assistant(&dataset, &file_name).await?;

        let session_name = format!("analysis_{}_{}", stem, chrono::Utc::now().timestamp());
        let session = self
            .service
            .create_session(&assistant.id, &session_name)
            .await?;
        info!(session = %session.name, "created session");

        let answer = self.ask(&session, &question, &file_name).await?;

        if request.save_to_db.unwrap_or(self.settings.save_to_db) {
            self.persist(&file_name, &answer, document.storage_path.as_deref())
                .await;
        }

        Ok(answer)
    }

    /// Find the configured dataset by name, creating it when absent.
    async fn resolve_dataset(&self) -> Result<Dataset, ServiceError> {
        let name = self.settings.dataset_name.as_str();
        let existing = self
            .service
            .list_datasets()
            .await?
            .into_iter()
            .find(|d| d.name.as_deref() == Some(name));

        if let Some(dataset) = existing {
            debug!(dataset = name, id = %dataset.id, "reusing dataset");
            return Ok(dataset);
        }

        let dataset = self
            .service
            .create_dataset(
                name,
                &self.settings.dataset_description,
                &self.settings.embedding_model,
                ChunkConfig {
                    chunk_token_num: self.settings.chunk_token_num,
                },
            )
            .await?;
        info!(dataset = name, id = %dataset.id, "created dataset");
        Ok(dataset)
    }

    /// Reuse the dataset's document for this file or upload it.
    ///
    /// A fresh upload goes to the object store first and then to the
    /// dataset. Reused documents carry no storage path.
    async fn resolve_document(
        &self,
        dataset: &Dataset,
        path: &Path,
        file_name: &str,
    ) -> Result<ResolvedDocument, AnalysisError> {
        let existing = self.service.find_documents(&dataset.id, file_name).await?;
        if !existing.is_empty() {
            info!(file = file_name, "document already in dataset, skipping upload");
            return Ok(ResolvedDocument {
                ids: existing.into_iter().map(|d| d.id).collect(),
                storage_path: None,
            });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::new("read source file", e))?;

        self.objects.ensure_bucket(&self.settings.bucket).await?;
        let storage_path = self
            .objects
            .upload(&self.settings.bucket, file_name, bytes.clone())
            .await?;

        self.service
            .upload_document(&dataset.id, file_name, bytes)
            .await?;
        info!(file = file_name, dataset = %dataset.id, "uploaded document");

        let ids: Vec<String> = self
            .service
            .find_documents(&dataset.id, file_name)
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect();
        if ids.is_empty() {
            return Err(ServiceError::new("find_documents", "uploaded document not found").into());
        }

        Ok(ResolvedDocument {
            ids,
            storage_path: Some(storage_path),
        })
    }

    /// Make sure the document is parsed, polling when `wait` is set.
    async fn ensure_parsed(
        &self,
        dataset: &Dataset,
        document_ids: &[String],
        file_name: &str,
        wait: bool,
    ) -> Result<(), AnalysisError> {
        let Some(first) = document_ids.first() else {
            return Err(ServiceError::new("find_documents", "no document ids resolved").into());
        };

        let current = self.service.document_status(&dataset.id, first).await?;
        if current.status == ParseStatus::Done {
            debug!(file = file_name, "document already parsed");
            return Ok(());
        }

        self.service.trigger_parse(&dataset.id, document_ids).await?;
        info!(file = file_name, status = %current.status, "parse started");
        if !wait {
            return Ok(());
        }

        let max_attempts = self.settings.max_attempts();
        let mut last = current.status;
        for attempt in 1..=max_attempts {
            let doc = self.service.document_status(&dataset.id, first).await?;
            last = doc.status;
            debug!(file = file_name, attempt, max_attempts, status = %last, "parse status");
            self.progress.report(ProgressEvent::Polling {
                file: file_name.to_string(),
                attempt,
                max_attempts,
                status: last.to_string(),
            });

            match last {
                ParseStatus::Done => {
                    info!(file = file_name, attempt, "parse finished");
                    return Ok(());
                }
                ParseStatus::Fail => return Err(AnalysisError::ParseFailed(last)),
                ParseStatus::Cancel => return Err(AnalysisError::ParseCancelled(last)),
                _ => {}
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        Err(AnalysisError::ParseTimeout {
            attempts: max_attempts,
            last,
        })
    }

    /// Find the assistant named after the file, creating it on `dataset`.
    async fn resolve_assistant(
        &self,
        dataset: &Dataset,
        file_name: &str,
    ) -> Result<Assistant, ServiceError> {
        let existing = self
            .service
            .list_assistants()
            .await?
            .into_iter()
            .find(|a| a.name.as_deref() == Some(file_name));

        if let Some(assistant) = existing {
            debug!(assistant = file_name, id = %assistant.id, "reusing assistant");
            return Ok(assistant);
        }

        let assistant = self
            .service
            .create_assistant(file_name, std::slice::from_ref(&dataset.id))
            .await?;
        info!(assistant = file_name, id = %assistant.id, "created assistant");
        Ok(assistant)
    }

    /// Stream the answer and keep the last snapshot.
    async fn ask(
        &self,
        session: &Session,
        question: &str,
        file_name: &str,
    ) -> Result<String, AnalysisError> {
        let mut stream = self.service.ask(session, question).await?;
        let mut answer = String::new();
        let mut snapshots = 0usize;

        while let Some(snapshot) = stream.next().await {
            let snapshot = snapshot?;
            snapshots += 1;
            let delta = answer_delta(&answer, &snapshot.text);
            if !delta.is_empty() {
                self.progress.report(ProgressEvent::AnswerDelta {
                    file: file_name.to_string(),
                    text: delta.to_string(),
                });
            }
            answer = snapshot.text;
        }

        self.progress.report(ProgressEvent::AnswerDone {
            file: file_name.to_string(),
            chars: answer.chars().count(),
        });
        debug!(file = file_name, snapshots, "answer stream ended");

        if answer.is_empty() {
            return Err(AnalysisError::EmptyAnswer);
        }
        Ok(answer)
    }

    async fn persist(&self, file_name: &str, answer: &str, storage_path: Option<&str>) {
        if self
            .reports
            .upsert_report(file_name, answer, storage_path)
            .await
        {
            info!(report = file_name, "saved analysis");
        } else {
            let err = PersistenceError(format!("could not save analysis for {}", file_name));
            warn!(report = file_name, error = %err, "continuing without persisted result");
        }
    }
}

/// CLI entry point for `report-analyst analyze`. Prints the answer to stdout
/// and fails when the run does.
pub async fn run_analyze(
    config: &Config,
    request: AnalyzeRequest,
    progress: Arc<dyn ProgressReporter>,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?.with_progress(progress);
    let result = orchestrator.analyze(&request).await;
    if !result.success {
        anyhow::bail!("analysis of {} failed: {}", request.path.display(), result.error);
    }
    println!("{}", result.answer);
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name(path))
}
