//! Document-to-question membership.
//!
//! Every source document is tagged at upload time with the questions it
//! serves, so a search for question `q` can be filtered to exactly those
//! documents. The tag is derived from a [`MembershipIndex`], the inverse of
//! the question → sources relation.

use crate::client::{FilterTarget, Lookup, QueryFilter};
use crate::fixtures::Question;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Metadata key holding the token string in [`MembershipEncoding::Tokens`].
pub const MEMBERSHIP_KEY: &str = "qid_membership";

/// A (category, document id) pair; the unit of indexing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    pub category: String,
    pub document_id: u32,
}

impl CompositeKey {
    pub fn new(category: impl Into<String>, document_id: u32) -> Self {
        Self {
            category: category.into(),
            document_id,
        }
    }

    /// The `{category}_{document_id}` form persisted in the indexed-set log.
    pub fn file_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.category, self.document_id)
    }
}

/// Composite key → ids of every question that cites the document.
#[derive(Debug, Clone, Default)]
pub struct MembershipIndex {
    entries: HashMap<CompositeKey, BTreeSet<u32>>,
}

impl MembershipIndex {
    /// Invert the question → sources relation.
    pub fn build<'a>(questions: impl IntoIterator<Item = &'a Question>) -> Self {
        let mut entries: HashMap<CompositeKey, BTreeSet<u32>> = HashMap::new();
        for question in questions {
            for &sid in &question.source {
                entries
                    .entry(CompositeKey::new(question.category.clone(), sid))
                    .or_default()
                    .insert(question.qid);
            }
        }
        Self { entries }
    }

    /// Questions served by `key`; `None` if no question cites it.
    pub fn qids(&self, key: &CompositeKey) -> Option<&BTreeSet<u32>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How membership is written into document metadata and queried back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MembershipEncoding {
    /// One metadata key per question id, matched with a `has_key` lookup.
    #[default]
    Keys,
    /// A single `.{q}.`-token string under [`MEMBERSHIP_KEY`], matched with `contains`.
    Tokens,
}

impl MembershipEncoding {
    /// Metadata attached to every upload of a document serving `qids`.
    pub fn metadata(&self, qids: &BTreeSet<u32>) -> Map<String, Value> {
        let mut metadata = Map::new();
        match self {
            MembershipEncoding::Keys => {
                for qid in qids {
                    metadata.insert(qid.to_string(), Value::Bool(true));
                }
            }
            MembershipEncoding::Tokens => {
                metadata.insert(
                    MEMBERSHIP_KEY.to_string(),
                    Value::String(token_string(qids.iter().copied())),
                );
            }
        }
        metadata
    }

    /// Search filter selecting documents that serve `qid`.
    pub fn filter(&self, qid: u32) -> QueryFilter {
        match self {
            MembershipEncoding::Keys => QueryFilter {
                on: FilterTarget::Document,
                key: qid.to_string(),
                value: None,
                lookup: Lookup::HasKey,
            },
            MembershipEncoding::Tokens => QueryFilter {
                on: FilterTarget::Document,
                key: MEMBERSHIP_KEY.to_string(),
                value: Some(Value::String(token(qid))),
                lookup: Lookup::Contains,
            },
        }
    }
}

/// Delimiter-wrapped token for one question id.
pub fn token(qid: u32) -> String {
    format!(".{}.", qid)
}

/// Concatenated tokens, e.g. `.1..12.` for `[1, 12]`.
pub fn token_string(qids: impl IntoIterator<Item = u32>) -> String {
    qids.into_iter().map(token).collect()
}

/// Substring test a `contains` filter performs against a token string.
pub fn token_string_serves(membership: &str, qid: u32) -> bool {
    membership.contains(&token(qid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(qid: u32, category: &str, source: &[u32]) -> Question {
        Question {
            qid,
            query: format!("query {qid}"),
            category: category.to_string(),
            source: source.to_vec(),
        }
    }

    #[test]
    fn test_build_is_inverse_of_sources() {
        let questions = vec![
            question(1, "finance", &[7, 9]),
            question(2, "finance", &[7]),
            question(3, "insurance", &[7]),
        ];
        let index = MembershipIndex::build(&questions);

        assert_eq!(index.len(), 3);
        let finance_7 = index.qids(&CompositeKey::new("finance", 7)).unwrap();
        assert_eq!(finance_7.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        let finance_9 = index.qids(&CompositeKey::new("finance", 9)).unwrap();
        assert_eq!(finance_9.len(), 1);
        // Same document id, different category: separate key
        let insurance_7 = index.qids(&CompositeKey::new("insurance", 7)).unwrap();
        assert!(insurance_7.contains(&3) && !insurance_7.contains(&1));

        assert!(index.qids(&CompositeKey::new("finance", 8)).is_none());
    }

    #[test]
    fn test_file_id_format() {
        assert_eq!(CompositeKey::new("faq", 12).file_id(), "faq_12");
    }

    #[test]
    fn test_token_boundaries() {
        let membership = token_string([12, 31]);
        assert_eq!(membership, ".12..31.");
        assert!(!token_string_serves(&membership, 1));
        assert!(!token_string_serves(&membership, 3));
        assert!(token_string_serves(&membership, 12));

        let membership = token_string([1]);
        assert!(token_string_serves(&membership, 1));
        assert!(!token_string_serves(&membership, 11));
    }

    #[test]
    fn test_key_encoding_metadata_and_filter() {
        let qids: BTreeSet<u32> = [4, 11].into_iter().collect();
        let metadata = MembershipEncoding::Keys.metadata(&qids);
        assert_eq!(metadata.get("4"), Some(&Value::Bool(true)));
        assert_eq!(metadata.get("11"), Some(&Value::Bool(true)));
        assert_eq!(metadata.len(), 2);

        let filter = MembershipEncoding::Keys.filter(11);
        assert_eq!(filter.key, "11");
        assert_eq!(filter.lookup, Lookup::HasKey);
        assert!(filter.value.is_none());
    }

    #[test]
    fn test_token_encoding_metadata_and_filter() {
        let qids: BTreeSet<u32> = [12, 2].into_iter().collect();
        let metadata = MembershipEncoding::Tokens.metadata(&qids);
        assert_eq!(
            metadata.get(MEMBERSHIP_KEY),
            Some(&Value::String(".2..12.".to_string()))
        );

        let filter = MembershipEncoding::Tokens.filter(2);
        assert_eq!(filter.key, MEMBERSHIP_KEY);
        assert_eq!(filter.lookup, Lookup::Contains);
        assert_eq!(filter.value, Some(Value::String(".2.".to_string())));
    }
}
