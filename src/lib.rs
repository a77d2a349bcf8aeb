//! # Report Analyst
//!
//! Automated analysis of periodic report files.
//!
//! Each report file is stored in an S3-compatible object store, ingested
//! into a retrieval dataset on a RAGFlow analysis service, parsed, and then
//! questioned through a fresh chat session. The streamed answer is saved per
//! report name in SQLite and served back over a small JSON API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────┐
//! │  Upload  │──▶│ Orchestrator │──▶│ Analysis (SSE) │
//! │   dir    │   │              │   └────────────────┘
//! └──────────┘   │              │──▶ Object store (S3)
//!                │              │──▶ SQLite reports ──▶ HTTP API
//!                └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! report-analyst init                          # create database
//! report-analyst analyze uploads/sales.xlsx    # analyze one report
//! report-analyst sweep                         # analyze the upload dir
//! report-analyst serve                         # start the report API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and env overrides |
//! | [`models`] | Core data types |
//! | [`error`] | Analysis error taxonomy |
//! | [`object_store`] | S3-compatible uploads |
//! | [`analysis`] | RAGFlow client and streamed answers |
//! | [`store`] | Report persistence |
//! | [`orchestrator`] | Per-file analysis pipeline |
//! | [`progress`] | Poll and answer progress on stderr |
//! | [`sweep`] | Batch runs over the upload directory |
//! | [`reports`] | `reports` command output |
//! | [`server`] | Report read API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod orchestrator;
pub mod progress;
pub mod reports;
pub mod server;
pub mod store;
pub mod sweep;
