//! Document retrieval against the managed search index.
//!
//! Issues one Query call for the first result page and maps each result
//! item to a [`RetrievedPassage`]. The `_source_uri` document attribute is
//! carried through as the passage's source when present, falling back to the
//! item's `DocumentURI`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use parley_core::config::ParleyConfig;
use parley_core::types::RetrievedPassage;

use crate::error::ChatError;

/// Document attribute holding the original location of a document.
pub const SOURCE_URI_ATTRIBUTE: &str = "_source_uri";

const QUERY_TARGET: &str = "AWSKendraFrontendService.Query";

/// Searches an external document index.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    /// Top passages for `query`, best first.
    async fn search(&self, query: &str) -> Result<Vec<RetrievedPassage>, ChatError>;
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryRequest<'a> {
    index_id: &'a str,
    query_text: &'a str,
    page_number: u32,
    page_size: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub result_items: Vec<ResultItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultItem {
    #[serde(default)]
    pub document_title: Option<TextBlock>,
    #[serde(default)]
    pub document_excerpt: Option<TextBlock>,
    #[serde(default, rename = "DocumentURI")]
    pub document_uri: Option<String>,
    #[serde(default)]
    pub document_attributes: Vec<DocumentAttribute>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextBlock {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentAttribute {
    pub key: String,
    #[serde(default)]
    pub value: DocumentAttributeValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentAttributeValue {
    #[serde(default)]
    pub string_value: Option<String>,
}

impl ResultItem {
    /// The non-empty `_source_uri` attribute, else the non-empty `DocumentURI`.
    pub fn source_uri(&self) -> Option<&str> {
        self.document_attributes
            .iter()
            .find(|attr| attr.key == SOURCE_URI_ATTRIBUTE)
            .and_then(|attr| attr.value.string_value.as_deref())
            .filter(|uri| !uri.is_empty())
            .or_else(|| self.document_uri.as_deref().filter(|uri| !uri.is_empty()))
    }
}

/// Map a query response to passages, keeping at most `limit`.
///
/// Items without excerpt text carry nothing to cite and are skipped.
pub fn passages_from_response(response: QueryResponse, limit: usize) -> Vec<RetrievedPassage> {
    response
        .result_items
        .into_iter()
        .filter_map(|item| {
            let excerpt = item
                .document_excerpt
                .as_ref()
                .map(|block| block.text.trim().to_string())
                .filter(|text| !text.is_empty())?;
            let source_uri = item.source_uri().map(str::to_string);
            if let Some(ref uri) = source_uri {
                debug!(source_uri = %uri, "Retrieved passage source");
            }
            Some(RetrievedPassage {
                excerpt,
                title: item
                    .document_title
                    .map(|block| block.text)
                    .filter(|t| !t.is_empty()),
                source_uri,
            })
        })
        .take(limit)
        .collect()
}

// =============================================================================
// HttpSearchClient
// =============================================================================

/// [`DocumentSearch`] over the index's JSON Query API.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    client: Client,
    endpoint: String,
    index_id: String,
    page_size: u32,
}

impl HttpSearchClient {
    pub fn new(
        endpoint: impl Into<String>,
        index_id: impl Into<String>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::RetrievalFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            index_id: index_id.into(),
            page_size,
        })
    }

    pub fn from_config(config: &ParleyConfig) -> Result<Self, ChatError> {
        Self::new(
            config.retrieval_endpoint(),
            config.retrieval.index_id.clone(),
            config.retrieval.page_size,
            Duration::from_secs(config.retrieval.timeout_secs),
        )
    }
}

#[async_trait]
impl DocumentSearch for HttpSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedPassage>, ChatError> {
        let body = QueryRequest {
            index_id: &self.index_id,
            query_text: query,
            page_number: 1,
            page_size: self.page_size,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-amz-target", QUERY_TARGET)
            .header("content-type", "application/x-amz-json-1.1")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::RetrievalFailed(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::RetrievalFailed(format!(
                "search index returned {status}: {text}"
            )));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| ChatError::RetrievalFailed(format!("malformed search response: {e}")))?;

        let passages = passages_from_response(parsed, self.page_size as usize);
        info!(
            index_id = %self.index_id,
            results = passages.len(),
            "Search index queried"
        );
        Ok(passages)
    }
}
