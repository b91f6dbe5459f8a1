//! Filtered retrieval and scoring against ground truth.

use crate::client::{SearchHit, SearchRequest, VectorService, collection_name};
use crate::error::Result;
use crate::membership::MembershipEncoding;
use crate::naming::parse_document_id;
use crate::persistence::{append_jsonl, read_jsonl};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One evaluated question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub qid: u32,
    pub query: String,
    pub gt_id: u32,
    pub retrieved_ids: Vec<u32>,
    pub is_correct: bool,
}

impl ResultRecord {
    /// Build a record; correctness is derived from `retrieved_ids`.
    pub fn new(qid: u32, query: impl Into<String>, gt_id: u32, retrieved_ids: Vec<u32>) -> Self {
        let is_correct = retrieved_ids.contains(&gt_id);
        Self {
            qid,
            query: query.into(),
            gt_id,
            retrieved_ids,
            is_correct,
        }
    }
}

/// Append-only result log.
#[derive(Debug, Clone)]
pub struct ResultLog {
    path: PathBuf,
}

impl ResultLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ResultRecord) -> Result<()> {
        append_jsonl(&self.path, record)
    }

    pub fn read_all(&self) -> Result<Vec<ResultRecord>> {
        read_jsonl(&self.path)
    }

    /// The most recent record for each question.
    pub fn latest_by_qid(&self) -> Result<BTreeMap<u32, ResultRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .map(|record| (record.qid, record))
            .collect())
    }
}

/// Accuracy over a set of result records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accuracy {
    pub total: usize,
    pub correct: usize,
    pub misses: Vec<u32>,
}

impl Accuracy {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ResultRecord>) -> Self {
        let mut accuracy = Accuracy::default();
        for record in records {
            accuracy.total += 1;
            if record.is_correct {
                accuracy.correct += 1;
            } else {
                accuracy.misses.push(record.qid);
            }
        }
        accuracy
    }

    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Source ids behind `hits`, in rank order.
///
/// With `dedupe` every id appears once, at its best rank. Hits whose name
/// does not carry an id are dropped.
pub fn recover_document_ids(hits: &[SearchHit], dedupe: bool) -> Vec<u32> {
    let mut ids = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(id) = parse_document_id(&hit.document_name) else {
            tracing::warn!(name = %hit.document_name, "search hit name has no document id");
            continue;
        };
        if dedupe && ids.contains(&id) {
            continue;
        }
        ids.push(id);
    }
    ids
}

/// Runs one filtered search per question and logs the outcome.
pub struct RetrievalEvaluator<'a, S> {
    service: &'a S,
    log: &'a ResultLog,
    top_k: usize,
    dedupe: bool,
    encoding: MembershipEncoding,
}

impl<'a, S: VectorService> RetrievalEvaluator<'a, S> {
    pub fn new(service: &'a S, log: &'a ResultLog, top_k: usize) -> Self {
        Self {
            service,
            log,
            top_k,
            dedupe: true,
            encoding: MembershipEncoding::default(),
        }
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn with_encoding(mut self, encoding: MembershipEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Document ids retrieved for `query`, restricted to documents serving `qid`.
    pub async fn retrieve(&self, query: &str, category: &str, qid: u32) -> Result<Vec<u32>> {
        let request = SearchRequest {
            query: query.to_string(),
            collection_name: collection_name(category),
            top_k: self.top_k,
            query_filter: Some(self.encoding.filter(qid)),
        };
        let hits = self.service.search(&request).await?;
        Ok(recover_document_ids(&hits, self.dedupe))
    }

    /// Retrieve, score against `gt_id`, and append the record to the log.
    pub async fn evaluate(
        &self,
        qid: u32,
        query: &str,
        category: &str,
        gt_id: u32,
    ) -> Result<ResultRecord> {
        let retrieved = self.retrieve(query, category, qid).await?;
        let record = ResultRecord::new(qid, query, gt_id, retrieved);
        self.log.append(&record)?;
        Ok(record)
    }
}
