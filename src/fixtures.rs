//! Question and ground-truth fixture loading.
//!
//! Both files are JSON objects holding a single list:
//!
//! ```json
//! { "questions": [ { "qid": 1, "query": "...", "category": "finance", "source": [7, 9] } ] }
//! { "ground_truths": [ { "qid": 1, "category": "finance", "retrieve": 7 } ] }
//! ```

use crate::error::{EvalError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A benchmark question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub qid: u32,
    pub query: String,
    pub category: String,
    /// Documents the question may be answered from.
    pub source: Vec<u32>,
}

/// The document a question is expected to retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub qid: u32,
    pub category: String,
    pub retrieve: u32,
}

#[derive(Debug, Deserialize)]
struct QuestionsFile {
    questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
struct GroundTruthsFile {
    ground_truths: Vec<GroundTruth>,
}

/// Loaded fixtures, keyed by question id.
#[derive(Debug, Clone, Default)]
pub struct Fixtures {
    pub questions: HashMap<u32, Question>,
    pub ground_truths: HashMap<u32, GroundTruth>,
}

impl Fixtures {
    /// Load both fixture files.
    pub fn load(questions_path: &Path, ground_truths_path: &Path) -> Result<Self> {
        let questions: QuestionsFile = read_fixture(questions_path)?;
        let ground_truths: GroundTruthsFile = read_fixture(ground_truths_path)?;

        Ok(Self::from_lists(
            questions.questions,
            ground_truths.ground_truths,
        ))
    }

    /// Build from in-memory lists. Later duplicates of a qid replace earlier ones.
    pub fn from_lists(questions: Vec<Question>, ground_truths: Vec<GroundTruth>) -> Self {
        Self {
            questions: questions.into_iter().map(|q| (q.qid, q)).collect(),
            ground_truths: ground_truths.into_iter().map(|gt| (gt.qid, gt)).collect(),
        }
    }

    pub fn question(&self, qid: u32) -> Option<&Question> {
        self.questions.get(&qid)
    }

    pub fn ground_truth(&self, qid: u32) -> Option<&GroundTruth> {
        self.ground_truths.get(&qid)
    }
}

fn read_fixture<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(EvalError::MissingFile(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| EvalError::malformed(path, e.to_string()))
}
