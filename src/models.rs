//! Core data models used throughout the analysis pipeline.
//!
//! Service records mirror what the analysis service returns. Fields the
//! service may omit are typed as `Option` so lookups can filter on them
//! without inspecting the payload dynamically.

use serde::{Deserialize, Serialize};

/// Named document collection in the analysis service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Dataset {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Parse progress of an uploaded document, as reported in its `run` field.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParseStatus {
    #[default]
    Unstart,
    Running,
    Done,
    Fail,
    Cancel,
    #[serde(other)]
    Unknown,
}

impl ParseStatus {
    /// DONE, FAIL and CANCEL never change for a given upload.
    pub fn is_terminal(self) -> bool {
        matches!(self, ParseStatus::Done | ParseStatus::Fail | ParseStatus::Cancel)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParseStatus::Unstart => "UNSTART",
            ParseStatus::Running => "RUNNING",
            ParseStatus::Done => "DONE",
            ParseStatus::Fail => "FAIL",
            ParseStatus::Cancel => "CANCEL",
            ParseStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded file bound to a dataset.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "run")]
    pub status: ParseStatus,
}

/// Conversational agent bound to one or more datasets.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A conversational context. The service addresses sessions through their
/// assistant, so the owning assistant id travels with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub assistant_id: String,
    pub name: String,
}

/// A streamed partial answer. `text` is everything accumulated so far.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSnapshot {
    pub text: String,
}

/// Chunking parameters sent when a dataset is created.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChunkConfig {
    pub chunk_token_num: u32,
}

/// A stored report row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Report {
    pub id: i64,
    pub report_name: String,
    pub ai_description: String,
    pub minio_report_path: Option<String>,
    pub create_time: i64,
    pub update_time: i64,
}

/// Listing shape used by `/get/report` and `report-analyst reports`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportSummary {
    pub id: i64,
    pub report_name: String,
    pub create_time: i64,
}

/// Outcome of one analysis run.
///
/// Exactly one of `answer` or `error` is non-empty. `success` only reflects
/// whether an answer was produced, never the persistence outcome.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct AnalysisResult {
    pub success: bool,
    pub answer: String,
    pub error: String,
}

impl AnalysisResult {
    pub fn answered(answer: String) -> Self {
        Self {
            success: true,
            answer,
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            answer: String::new(),
            error: error.into(),
        }
    }
}
