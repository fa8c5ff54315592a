//! OpenAI-compatible chat engine.
//!
//! Works with any backend exposing a `/chat/completions` endpoint —
//! Gemini's OpenAI-compatible surface (the default), OpenAI, OpenRouter,
//! vLLM, Ollama, and the like.
//!
//! Each turn: build the message log from the session history, advertise
//! the capability registry as callable tools, execute requested tool
//! calls, and loop until the backend answers with text or the iteration
//! cap is reached.

use async_trait::async_trait;
use colloquy_core::engine::{Engine, EngineEvent, EngineOutput, EngineTurn, OutputPart};
use colloquy_core::error::EngineError;
use colloquy_core::tool::CapabilityRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dedup::RequestDedup;

/// Default backend: Gemini's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";

/// A reasoning engine backed by an OpenAI-compatible chat API.
#[derive(Clone)]
pub struct ChatEngine {
    base_url: String,
    api_key: String,
    model: String,
    instruction: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: u32,
    registry: Arc<CapabilityRegistry>,
    client: reqwest::Client,
}

impl ChatEngine {
    /// Create an engine bound to a capability registry.
    ///
    /// The registry is fixed for the engine's lifetime — no tool appears
    /// or disappears mid-conversation.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            instruction: String::new(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 10,
            registry,
            client,
        }
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the max tokens per backend response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the maximum number of tool-call iterations per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Build the API message log for one turn.
    fn build_messages(&self, turn: &EngineTurn) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(turn.history.len() * 2 + 2);

        if !self.instruction.is_empty() {
            messages.push(ApiMessage::text("system", &self.instruction));
        }

        for record in &turn.history {
            messages.push(ApiMessage::text("user", &record.query));
            messages.push(ApiMessage::text("assistant", &record.response));
        }

        messages.push(ApiMessage::text("user", &turn.query));
        messages
    }

    /// One completion round-trip.
    async fn complete(&self, messages: &[ApiMessage]) -> Result<ApiChoiceMessage, EngineError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let definitions = self.registry.definitions();
        if !definitions.is_empty() {
            let tools: Vec<serde_json::Value> = definitions
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": d.name,
                            "description": d.description,
                            "parameters": d.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tools);
        }

        debug!(model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Engine backend returned error");
            return Err(EngineError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| EngineError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let usage = api_response.usage.map(|u| u.total_tokens).unwrap_or(0);
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        Ok(ApiChoiceMessage {
            usage,
            ..choice.message
        })
    }

    /// Drive one turn to its final output.
    ///
    /// `events` (streamed runs) receives a non-final activity event before
    /// each backend round-trip; `cancel` is observed between suspension
    /// points.
    async fn drive(
        &self,
        turn: &EngineTurn,
        events: Option<&tokio::sync::mpsc::Sender<Result<EngineEvent, EngineError>>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<EngineOutput, EngineError> {
        let mut messages = self.build_messages(turn);
        // Duplicate tool-call ids within this turn are suppressed; the
        // window lives exactly as long as the turn.
        let mut dedup = RequestDedup::new(64);
        let mut last_tool_payload: Option<serde_json::Value> = None;
        let mut tokens_used: u64 = 0;

        for iteration in 1..=self.max_iterations {
            if let Some(cancel) = cancel
                && cancel.is_cancelled()
            {
                return Err(EngineError::Cancelled);
            }

            if let Some(events) = events {
                let _ = events.send(Ok(EngineEvent::activity())).await;
            }

            debug!(turn_id = %turn.turn_id, iteration, "Engine iteration");

            let reply = match cancel {
                Some(cancel) => tokio::select! {
                    reply = self.complete(&messages) => reply?,
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                },
                None => self.complete(&messages).await?,
            };

            tokens_used += reply.usage;

            let tool_calls = reply.tool_calls.clone().unwrap_or_default();
            if tool_calls.is_empty() {
                let content = reply.content.unwrap_or_default();
                return Ok(self.final_output(turn, &content, last_tool_payload, tokens_used));
            }

            messages.push(ApiMessage {
                role: "assistant".into(),
                content: reply.content.clone(),
                tool_calls: reply.tool_calls.clone(),
                tool_call_id: None,
            });

            for call in &tool_calls {
                if !dedup.insert(&call.id) {
                    warn!(call_id = %call.id, "Duplicate tool call suppressed");
                    messages.push(ApiMessage::tool_result(
                        &call.id,
                        "Error: duplicate tool call suppressed",
                    ));
                    continue;
                }

                if let Some(cancel) = cancel
                    && cancel.is_cancelled()
                {
                    return Err(EngineError::Cancelled);
                }

                let arguments: serde_json::Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or_default();

                match self.registry.invoke(&call.function.name, arguments).await {
                    Ok(output) => {
                        if let Some(data) = &output.data {
                            last_tool_payload = Some(data.clone());
                        }
                        messages.push(ApiMessage::tool_result(&call.id, &output.content));
                    }
                    Err(e) => {
                        warn!(tool = %call.function.name, error = %e, "Tool invocation failed");
                        // Report the failure back so the model can recover.
                        messages.push(ApiMessage::tool_result(&call.id, &format!("Error: {e}")));
                    }
                }
            }
        }

        warn!(turn_id = %turn.turn_id, "Max tool iterations reached");
        Ok(self.final_output(
            turn,
            "I've reached the maximum number of tool call iterations. Please provide further guidance.",
            last_tool_payload,
            tokens_used,
        ))
    }

    /// Assemble the final output event: text if the backend produced any,
    /// otherwise the last structured tool payload; plus the replacement
    /// state blob.
    fn final_output(
        &self,
        turn: &EngineTurn,
        content: &str,
        last_tool_payload: Option<serde_json::Value>,
        tokens_used: u64,
    ) -> EngineOutput {
        let mut parts = Vec::new();
        if !content.is_empty() {
            parts.push(OutputPart::Text {
                text: content.to_string(),
            });
        } else if let Some(payload) = last_tool_payload {
            parts.push(OutputPart::Structured { value: payload });
        }

        EngineOutput {
            parts,
            state: Some(next_state(&turn.state, tokens_used)),
        }
    }
}

/// Advance the engine-owned session state blob by one turn.
fn next_state(prior: &serde_json::Value, tokens_used: u64) -> serde_json::Value {
    let turns = prior.get("turns").and_then(|v| v.as_u64()).unwrap_or(0);
    let total = prior
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    serde_json::json!({
        "turns": turns + 1,
        "total_tokens": total + tokens_used,
    })
}

#[async_trait]
impl Engine for ChatEngine {
    fn name(&self) -> &str {
        "chat"
    }

    async fn run(&self, turn: EngineTurn) -> Result<Option<EngineOutput>, EngineError> {
        let output = self.drive(&turn, None, None).await?;
        Ok(Some(output))
    }

    async fn run_streamed(
        &self,
        turn: EngineTurn,
        cancel: CancellationToken,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<EngineEvent, EngineError>>,
        EngineError,
    > {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let engine = self.clone();

        tokio::spawn(async move {
            match engine.drive(&turn, Some(&tx), Some(&cancel)).await {
                Ok(output) => {
                    let _ = tx.send(Ok(EngineEvent::finished(output))).await;
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(rx)
    }
}

// --- Wire types ---

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool_result(call_id: &str, content: &str) -> Self {
        Self {
            role: "tool".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ApiFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,

    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,

    #[serde(skip)]
    usage: u64,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::session::{SessionKey, TurnRecord};

    fn engine() -> ChatEngine {
        ChatEngine::new(
            "http://127.0.0.1:1",
            "test-key",
            DEFAULT_MODEL,
            Arc::new(CapabilityRegistry::empty()),
        )
        .with_instruction("You are a helpful agent.")
    }

    fn turn_with_history() -> EngineTurn {
        EngineTurn {
            turn_id: "t1".into(),
            session_key: SessionKey::from("s1"),
            query: "and issues?".into(),
            history: vec![TurnRecord::new("list projects", "Project A")],
            state: serde_json::json!({"turns": 1, "total_tokens": 40}),
        }
    }

    #[test]
    fn messages_include_instruction_history_and_query() {
        let messages = engine().build_messages(&turn_with_history());
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content.as_deref(), Some("list projects"));
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3].content.as_deref(), Some("and issues?"));
    }

    #[test]
    fn no_instruction_means_no_system_message() {
        let engine = ChatEngine::new(
            "http://127.0.0.1:1",
            "k",
            DEFAULT_MODEL,
            Arc::new(CapabilityRegistry::empty()),
        );
        let messages = engine.build_messages(&turn_with_history());
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn state_blob_advances_per_turn() {
        let state = next_state(&serde_json::json!({"turns": 2, "total_tokens": 100}), 25);
        assert_eq!(state, serde_json::json!({"turns": 3, "total_tokens": 125}));
    }

    #[test]
    fn state_blob_starts_from_empty() {
        let state = next_state(&serde_json::json!({}), 10);
        assert_eq!(state, serde_json::json!({"turns": 1, "total_tokens": 10}));
    }

    #[test]
    fn final_output_prefers_text() {
        let output = engine().final_output(
            &turn_with_history(),
            "the answer",
            Some(serde_json::json!({"ignored": true})),
            5,
        );
        assert_eq!(output.parts.len(), 1);
        assert!(matches!(&output.parts[0], OutputPart::Text { text } if text == "the answer"));
    }

    #[test]
    fn final_output_falls_back_to_tool_payload() {
        let output = engine().final_output(
            &turn_with_history(),
            "",
            Some(serde_json::json!({"projects": ["a"]})),
            5,
        );
        assert!(matches!(&output.parts[0], OutputPart::Structured { .. }));
    }

    #[test]
    fn final_output_may_be_empty() {
        let output = engine().final_output(&turn_with_history(), "", None, 0);
        assert!(output.parts.is_empty());
        assert!(output.state.is_some());
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_engine_error() {
        let err = engine().run(turn_with_history()).await.unwrap_err();
        assert!(matches!(err, EngineError::Network(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_streamed_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut rx = engine()
            .run_streamed(turn_with_history(), cancel)
            .await
            .unwrap();

        // The first send may be an activity event; the run must end with
        // a cancellation error, never a final output.
        let mut saw_cancelled = false;
        while let Some(item) = rx.recv().await {
            match item {
                Ok(event) => assert!(!event.is_final),
                Err(EngineError::Cancelled) => {
                    saw_cancelled = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_cancelled);
    }
}
