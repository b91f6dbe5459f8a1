//! ColiVara REST client.
//!
//! Talks to the hosted vector-search API with bearer-token auth. Every
//! upsert and search goes through the configured [`RetryPolicy`].

use super::{RetryPolicy, SearchHit, SearchRequest, UpsertRequest, VectorService};
use crate::config::ServiceConfig;
use crate::error::{EvalError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// Response from a search.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    detail: serde_json::Value,
}

/// Client for the hosted ColiVara API.
#[derive(Clone)]
pub struct ColivaraClient {
    client: Client,
    config: ServiceConfig,
    retry: RetryPolicy,
}

impl ColivaraClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let retry = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_ms),
        );
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    /// Get the URL of an API path such as `v1/search/`.
    fn endpoint(&self, path: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/{}", base, path)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint(path))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &text));
        }

        Ok(text)
    }

    /// Check the service is reachable and the key is accepted.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint("v1/health/"))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(api_error(status.as_u16(), &text))
        }
    }
}

fn api_error(status: u16, body: &str) -> EvalError {
    // Try to parse as API error
    let message = match serde_json::from_str::<ApiError>(body) {
        Ok(api_error) => match api_error.detail {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        },
        Err(_) => body.chars().take(300).collect(),
    };
    EvalError::remote(Some(status), message)
}

impl VectorService for ColivaraClient {
    async fn upsert_document(&self, request: &UpsertRequest) -> Result<()> {
        tracing::debug!(
            name = %request.name,
            collection = %request.collection_name,
            bytes = request.document_base64.len(),
            "upserting document"
        );
        self.retry
            .run("upsert", || {
                self.post_json("v1/documents/upsert-document/", request)
            })
            .await?;
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        tracing::debug!(
            collection = %request.collection_name,
            top_k = request.top_k,
            filter = ?request.query_filter,
            "searching"
        );
        let body = self
            .retry
            .run("search", || self.post_json("v1/search/", request))
            .await?;

        let response: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| EvalError::remote(None, format!("unexpected search response: {}", e)))?;
        Ok(response.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_construction() {
        let config = ServiceConfig {
            api_base: "https://api.example.com/".to_string(),
            api_key: "test".to_string(),
            ..Default::default()
        };
        let client = ColivaraClient::new(config).unwrap();
        assert_eq!(
            client.endpoint("v1/search/"),
            "https://api.example.com/v1/search/"
        );

        // Without trailing slash
        let config2 = ServiceConfig {
            api_base: "https://api.example.com".to_string(),
            api_key: "test".to_string(),
            ..Default::default()
        };
        let client2 = ColivaraClient::new(config2).unwrap();
        assert_eq!(
            client2.endpoint("v1/health/"),
            "https://api.example.com/v1/health/"
        );
    }

    #[test]
    fn test_api_error_detail() {
        let err = api_error(401, r#"{"detail": "Invalid token."}"#);
        assert_eq!(err.to_string(), "Remote service error (401): Invalid token.");
        assert!(!err.is_transient());

        let err = api_error(502, "<html>Bad Gateway</html>");
        assert!(err.to_string().contains("Bad Gateway"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_search_response_parsing() {
        let body = r#"{"query": "q", "results": [
            {"collection_name": "_data_faq_collection", "document_name": "12", "page_number": 1, "normalized_score": 0.9},
            {"collection_name": "_data_faq_collection", "document_name": "4", "page_number": 3, "normalized_score": 0.7}
        ]}"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        let names: Vec<_> = response
            .results
            .iter()
            .map(|hit| hit.document_name.as_str())
            .collect();
        assert_eq!(names, vec!["12", "4"]);
    }

    #[tokio::test]
    async fn test_hung_request_times_out() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = ColivaraClient::new(ServiceConfig {
            api_base: format!("http://{}", addr),
            api_key: "test".to_string(),
            max_retries: 0,
            timeout_secs: 1,
            ..Default::default()
        })
        .unwrap();
        let request = SearchRequest {
            query: "q".to_string(),
            collection_name: "_data_finance_collection".to_string(),
            top_k: 3,
            query_filter: None,
        };

        let err = tokio::time::timeout(Duration::from_secs(10), client.search(&request))
            .await
            .expect("request should time out on its own")
            .unwrap_err();
        assert!(matches!(err, EvalError::Http(_)));
        assert!(err.is_transient());
    }
}
