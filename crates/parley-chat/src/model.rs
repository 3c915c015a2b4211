//! Hosted language model client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use parley_core::config::ParleyConfig;

use crate::error::ChatError;
use crate::prompt::ModelRequest;

/// Produces an answer for a composed request.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ChatError>;
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    content: Vec<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pull `content[0].text` out of a model response body.
pub fn extract_answer(body: &str) -> Result<String, ChatError> {
    let parsed: InvokeResponse = serde_json::from_str(body)
        .map_err(|e| ChatError::ModelInvocationFailed(format!("malformed model response: {e}")))?;

    parsed
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .ok_or_else(|| {
            ChatError::ModelInvocationFailed("model response has no content text".to_string())
        })
}

fn map_http_error(status: StatusCode, body: &str) -> ChatError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string());
    ChatError::ModelInvocationFailed(format!("model runtime returned {status}: {message}"))
}

/// [`LanguageModel`] over the model runtime's `invoke` endpoint.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpModelClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ChatError::ModelInvocationFailed(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &ParleyConfig) -> Result<Self, ChatError> {
        Self::new(
            config.model_endpoint(),
            config.model.api_key.clone(),
            Duration::from_secs(config.model.timeout_secs),
        )
    }

    fn invoke_url(&self, model_id: &str) -> String {
        format!("{}/model/{}/invoke", self.endpoint, model_id)
    }
}

#[async_trait]
impl LanguageModel for HttpModelClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ChatError> {
        let url = self.invoke_url(&request.model_id);
        debug!(url = %url, "Invoking model");

        let mut builder = self
            .client
            .post(&url)
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::ModelInvocationFailed(format!("model request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChatError::ModelInvocationFailed(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }

        let answer = extract_answer(&body)?;
        info!(model_id = %request.model_id, chars = answer.len(), "Model answered");
        Ok(answer)
    }
}
