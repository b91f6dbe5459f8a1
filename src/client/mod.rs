//! Vector-search service integration.
//!
//! [`VectorService`] is the seam the sync and evaluation stages talk to;
//! [`ColivaraClient`] implements it over the hosted REST API.

mod colivara;
mod retry;

pub use colivara::ColivaraClient;
pub use retry::RetryPolicy;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Collection that holds every document of `category`.
pub fn collection_name(category: &str) -> String {
    format!("_data_{}_collection", category)
}

/// Request body for a document upsert.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertRequest {
    pub name: String,
    pub document_base64: String,
    pub collection_name: String,
    pub metadata: Map<String, Value>,
    /// Block until the service has finished embedding the document.
    pub wait: bool,
}

/// What a filter is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterTarget {
    Document,
    Collection,
}

/// Metadata lookup operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    KeyLookup,
    Contains,
    ContainedBy,
    HasKey,
    HasKeys,
    HasAnyKeys,
}

/// Structured metadata filter applied to a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub on: FilterTarget,
    pub key: String,
    /// Serialized as `null` for key-only lookups.
    pub value: Option<Value>,
    pub lookup: Lookup,
}

/// Request body for a search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub collection_name: String,
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_filter: Option<QueryFilter>,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_name: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub normalized_score: Option<f64>,
    #[serde(default)]
    pub collection_name: Option<String>,
}

impl SearchHit {
    pub fn named(document_name: impl Into<String>) -> Self {
        Self {
            document_name: document_name.into(),
            page_number: None,
            normalized_score: None,
            collection_name: None,
        }
    }
}

/// The remote operations the harness depends on.
// Futures are awaited in place by a sequential driver, so no Send bound.
#[allow(async_fn_in_trait)]
pub trait VectorService {
    /// Create or replace a document in a collection.
    async fn upsert_document(&self, request: &UpsertRequest) -> Result<()>;

    /// Ranked hits for a query, best first.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_name() {
        assert_eq!(collection_name("finance"), "_data_finance_collection");
    }

    #[test]
    fn test_search_request_wire_format() {
        let request = SearchRequest {
            query: "what is the premium?".to_string(),
            collection_name: collection_name("insurance"),
            top_k: 3,
            query_filter: Some(QueryFilter {
                on: FilterTarget::Document,
                key: "19".to_string(),
                value: None,
                lookup: Lookup::HasKey,
            }),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "query": "what is the premium?",
                "collection_name": "_data_insurance_collection",
                "top_k": 3,
                "query_filter": {
                    "on": "document",
                    "key": "19",
                    "value": null,
                    "lookup": "has_key"
                }
            })
        );
    }

    #[test]
    fn test_search_hit_tolerates_extra_fields() {
        let hit: SearchHit = serde_json::from_value(json!({
            "document_name": "7_page_2",
            "page_number": 2,
            "raw_score": 12.5,
            "normalized_score": 0.81,
            "img_base64": "..."
        }))
        .unwrap();
        assert_eq!(hit.document_name, "7_page_2");
        assert_eq!(hit.page_number, Some(2));
        assert!(hit.collection_name.is_none());
    }
}
