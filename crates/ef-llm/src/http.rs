//! Reqwest-backed [`LlmClient`] that talks to an Anthropic-Messages-shaped
//! chat-completion endpoint (spec §6: "LLM chat-completion service (HTTP
//! JSON)"). Mirrors the call shape of `neuron-provider-anthropic::Anthropic`
//! — a single non-streaming POST, headers, JSON body/response — generalized
//! to our two fixed-schema prompts.

use std::time::Duration;

use serde_json::json;

use crate::error::LlmError;
use crate::types::{MapShardRequest, MapShardResponse, ReduceRequest, ReduceResponse};
use crate::LlmClient;
use ef_types::{EventType, Theater};

/// Default Anthropic-compatible API version header value.
const API_VERSION: &str = "2023-06-01";

/// A production LLM client backed by an HTTP chat-completion API.
///
/// Both the Map prompt and the Reduce prompt embed the closed `theater`/
/// `event_type` vocabularies verbatim (spec §6) and instruct the model to
/// respond with a single fixed-schema JSON object, which this client parses
/// strictly — malformed JSON becomes [`LlmError::InvalidResponse`], which the
/// retry policy in `ef-llm::retry` treats as retryable per spec §4.2/§4.3.
pub struct HttpLlmClient {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl HttpLlmClient {
    /// Create a new client. `timeout` bounds each individual HTTP call
    /// (`llm_timeout` in config); retries are the caller's responsibility via
    /// [`crate::retry_with_backoff`].
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        max_tokens: u32,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            max_tokens,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<serde_json::Value, LlmError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if status.is_server_error() {
            return Err(LlmError::ServerError(format!("{status}: {text}")));
        }
        if !status.is_success() {
            return Err(LlmError::InvalidResponse(format!("{status}: {text}")));
        }

        let envelope: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("envelope not JSON: {e}")))?;

        let content_text = envelope["content"][0]["text"].as_str().ok_or_else(|| {
            LlmError::InvalidResponse("response envelope missing content[0].text".into())
        })?;

        serde_json::from_str(content_text)
            .map_err(|e| LlmError::InvalidResponse(format!("payload not valid JSON: {e}")))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() || err.is_connect() {
        LlmError::RequestFailed(err.to_string())
    } else {
        LlmError::RequestFailed(err.to_string())
    }
}

fn map_prompt(request: &MapShardRequest) -> (String, String) {
    let system = "You cluster news titles into strategically coherent incidents. \
        Group by temporal proximity (within ~48 hours), causal/consequential linkage, \
        and unified narrative thread (same actors, same situation). \
        Respond with a single JSON object: {\"incidents\": [{\"title_ids\": [...], \"rationale\": \"...\", \"confidence\": 0.0}]}. \
        Only use title_ids present in the input."
        .to_string();

    let titles_json = serde_json::to_string(&request.titles).unwrap_or_default();
    let user = format!("shard_id: {}\ntitles: {}", request.shard_id, titles_json);
    (system, user)
}

fn reduce_prompt(request: &ReduceRequest) -> (String, String) {
    let theaters: Vec<&'static str> = Theater::ALL.iter().map(Theater::as_str).collect();
    let event_types: Vec<&'static str> = EventType::ALL.iter().map(EventType::as_str).collect();

    let system = format!(
        "You classify a news incident into a durable Event Family. \
        theater must be one of {theaters:?}. event_type must be one of {event_types:?}. \
        Respond with a single JSON object: {{\"theater\": \"...\", \"event_type\": \"...\", \
        \"headline\": \"...\", \"summary\": \"...\", \"actors\": [...], \"tags\": [...], \
        \"timeline\": [{{\"timestamp\": \"RFC3339\", \"description\": \"...\", \"source_title_ids\": [...]}}], \
        \"confidence\": 0.0}}."
    );

    let titles_json = serde_json::to_string(&request.titles).unwrap_or_default();
    let user = format!(
        "incident_id: {}\ntitles: {}",
        request.incident_id, titles_json
    );
    (system, user)
}

impl LlmClient for HttpLlmClient {
    async fn map_shard(&self, request: MapShardRequest) -> Result<MapShardResponse, LlmError> {
        let (system, user) = map_prompt(&request);
        let value = self.complete_json(&system, &user).await?;
        serde_json::from_value(value)
            .map_err(|e| LlmError::InvalidResponse(format!("map response shape: {e}")))
    }

    async fn reduce_incident(&self, request: ReduceRequest) -> Result<ReduceResponse, LlmError> {
        let (system, user) = reduce_prompt(&request);
        let value = self.complete_json(&system, &user).await?;
        serde_json::from_value(value)
            .map_err(|e| LlmError::InvalidResponse(format!("reduce response shape: {e}")))
    }
}
