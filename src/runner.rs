//! Evaluation run driver.
//!
//! Walks the evaluation question list in order. Each question is synced and
//! then evaluated before the next one starts; a failure is recorded against
//! its qid and the run continues.

use crate::client::VectorService;
use crate::config::Config;
use crate::error::{EvalError, Result};
use crate::evaluate::{Accuracy, ResultLog, ResultRecord, RetrievalEvaluator};
use crate::fixtures::Fixtures;
use crate::membership::MembershipIndex;
use crate::render::PageRenderer;
use crate::sync::{DocumentSync, SyncReport};
use crate::tracker::IndexedSetTracker;
use std::time::Instant;

/// Aggregated results of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub records: Vec<ResultRecord>,
    /// Questions that could not be evaluated, with the reason.
    pub failed: Vec<(u32, String)>,
    pub sync: SyncReport,
    pub total_time_secs: f64,
}

impl RunSummary {
    pub fn accuracy(&self) -> Accuracy {
        Accuracy::from_records(&self.records)
    }

    /// Print summary to stdout.
    pub fn print_summary(&self) {
        let accuracy = self.accuracy();
        println!("\n========== Retrieval Results ==========");
        println!("Evaluated: {}", accuracy.total);
        println!(
            "Correct:   {} ({:.1}%)",
            accuracy.correct,
            accuracy.ratio() * 100.0
        );
        if !accuracy.misses.is_empty() {
            println!("Misses:    {:?}", accuracy.misses);
        }
        println!("----------------------------------------");
        println!(
            "Documents upserted: {}, skipped: {}, failed: {}",
            self.sync.upserted.len(),
            self.sync.skipped.len(),
            self.sync.failed.len()
        );
        if !self.failed.is_empty() {
            println!("Failed questions:");
            for (qid, reason) in &self.failed {
                println!("  Q{}: {}", qid, reason);
            }
        }
        println!("----------------------------------------");
        println!("Total time: {:.1}s", self.total_time_secs);
        println!("========================================\n");
    }
}

/// Owns the per-run state and borrows the service handle created by the caller.
pub struct RunDriver<'a, S> {
    service: &'a S,
    fixtures: &'a Fixtures,
    config: &'a Config,
    membership: MembershipIndex,
    tracker: IndexedSetTracker,
    results: ResultLog,
}

impl<'a, S: VectorService> RunDriver<'a, S> {
    pub fn new(service: &'a S, fixtures: &'a Fixtures, config: &'a Config) -> Self {
        Self {
            service,
            fixtures,
            config,
            membership: MembershipIndex::build(fixtures.questions.values()),
            tracker: IndexedSetTracker::new(&config.paths.index_log),
            results: ResultLog::new(&config.paths.results_log),
        }
    }

    pub fn membership(&self) -> &MembershipIndex {
        &self.membership
    }

    fn document_sync(&self) -> DocumentSync<'_, S> {
        let renderer = PageRenderer::new(&self.config.paths.tmp_dir, self.config.eval.dpi);
        DocumentSync::new(
            self.service,
            &self.tracker,
            &self.config.paths.source_dir,
            renderer,
        )
        .with_mode(self.config.eval.mode)
        .with_encoding(self.config.eval.encoding)
    }

    fn evaluator(&self) -> RetrievalEvaluator<'_, S> {
        RetrievalEvaluator::new(
            self.service,
            &self.results,
            self.config.eval.effective_top_k(),
        )
        .with_dedupe(self.config.eval.dedupe)
        .with_encoding(self.config.eval.encoding)
    }

    /// Sync and evaluate every question in `qids`.
    pub async fn run(&self, qids: &[u32]) -> RunSummary {
        let start = Instant::now();
        let sync = self.document_sync();
        let evaluator = self.evaluator();
        let mut summary = RunSummary::default();

        println!("Running evaluation on {} questions...", qids.len());

        for (idx, &qid) in qids.iter().enumerate() {
            println!("\n[{}/{}] Q{}", idx + 1, qids.len(), qid);

            match self.process_question(qid, &sync, &evaluator, &mut summary.sync).await {
                Ok(record) => {
                    println!(
                        "  GT: {} / TOP-K: {:?} {}",
                        record.gt_id,
                        record.retrieved_ids,
                        if record.is_correct { "✓" } else { "✗" }
                    );
                    summary.records.push(record);
                }
                Err(e) => {
                    tracing::warn!(qid, error = %e, "question failed");
                    println!("  Failed: {}", e);
                    summary.failed.push((qid, e.to_string()));
                }
            }
        }

        summary.total_time_secs = start.elapsed().as_secs_f64();
        summary
    }

    async fn process_question(
        &self,
        qid: u32,
        sync: &DocumentSync<'_, S>,
        evaluator: &RetrievalEvaluator<'_, S>,
        sync_total: &mut SyncReport,
    ) -> Result<ResultRecord> {
        let question = self
            .fixtures
            .question(qid)
            .ok_or(EvalError::UnknownQuestion(qid))?;
        let truth = self
            .fixtures
            .ground_truth(qid)
            .ok_or(EvalError::UnknownQuestion(qid))?;

        println!("  Query:   {}", question.query);
        println!("  Sources: {:?}", question.source);

        let report = sync
            .sync(&question.source, &truth.category, &self.membership)
            .await?;
        sync_total.merge(report);

        evaluator
            .evaluate(qid, &question.query, &truth.category, truth.retrieve)
            .await
    }

    /// Index the sources of every question in `qids` without searching.
    pub async fn sync_only(&self, qids: &[u32]) -> (SyncReport, Vec<(u32, String)>) {
        let sync = self.document_sync();
        let mut total = SyncReport::default();
        let mut failed = Vec::new();

        for &qid in qids {
            let Some(question) = self.fixtures.question(qid) else {
                failed.push((qid, EvalError::UnknownQuestion(qid).to_string()));
                continue;
            };
            // Ground-truth category wins when present, as in a full run
            let category = self
                .fixtures
                .ground_truth(qid)
                .map(|gt| gt.category.as_str())
                .unwrap_or(question.category.as_str());

            match sync.sync(&question.source, category, &self.membership).await {
                Ok(report) => total.merge(report),
                Err(e) => {
                    tracing::warn!(qid, error = %e, "sync failed");
                    failed.push((qid, e.to_string()));
                }
            }
        }

        (total, failed)
    }
}
