//! Retrieval Eval - scores filtered retrieval from a hosted vector-search service.
//!
//! Reference PDFs are uploaded to the ColiVara API, tagged with the benchmark
//! questions each document serves. Every question is then searched with a
//! metadata filter restricting results to its own candidate documents, and
//! the retrieved document ids are compared with ground truth.
//!
//! # Quick Start
//!
//! ```no_run
//! use retrieval_eval::{
//!     client::ColivaraClient,
//!     config::Config,
//!     fixtures::Fixtures,
//!     runner::RunDriver,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = Config::load(None)?;
//!     config.validate()?;
//!
//!     let fixtures = Fixtures::load(&config.paths.questions, &config.paths.ground_truths)?;
//!
//!     // One client for the whole run
//!     let client = ColivaraClient::new(config.service.clone())?;
//!     let driver = RunDriver::new(&client, &fixtures, &config);
//!
//!     let summary = driver.run(&config.eval.qids).await;
//!     summary.print_summary();
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Fixtures**: questions and ground truths keyed by qid
//! - **MembershipIndex**: (category, document) → questions citing it
//! - **IndexedSetTracker**: JSONL checkpoint of uploaded documents
//! - **DocumentSync**: idempotent upload with membership metadata
//! - **RetrievalEvaluator**: filtered search, scoring, result log
//! - **RunDriver**: sequential per-question orchestration

pub mod client;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod fixtures;
pub mod membership;
pub mod naming;
pub mod persistence;
pub mod render;
pub mod runner;
pub mod sync;
pub mod tracker;

// Re-export commonly used types
pub use client::{ColivaraClient, VectorService};
pub use config::Config;
pub use error::{EvalError, Result};
pub use evaluate::{ResultLog, ResultRecord, RetrievalEvaluator};
pub use fixtures::{Fixtures, GroundTruth, Question};
pub use membership::{CompositeKey, MembershipEncoding, MembershipIndex};
pub use render::{PageRenderer, Rasterizer};
pub use runner::{RunDriver, RunSummary};
pub use sync::{DocumentSync, SyncReport, UploadMode};
pub use tracker::IndexedSetTracker;
