//! Engine trait — the abstraction over reasoning backends.
//!
//! An Engine consumes a query plus session state and produces output
//! events, either as one final event (blocking run) or as a lazy, finite
//! sequence of events tagged final-or-not (streamed run).
//!
//! The bridge depends only on this shape, not on any particular backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::session::{SessionKey, TurnRecord};
use crate::turn::ResolvedContent;

/// Everything an engine needs to run one conversational turn.
///
/// The bridge snapshots the session into this value; the engine never
/// touches the session store directly.
#[derive(Debug, Clone)]
pub struct EngineTurn {
    /// Unique turn ID, assigned by the bridge (used in logs)
    pub turn_id: String,

    /// The session this turn belongs to
    pub session_key: SessionKey,

    /// The caller's query
    pub query: String,

    /// Prior turns of the session, oldest first
    pub history: Vec<TurnRecord>,

    /// The engine-owned state blob as of the end of the prior turn
    pub state: serde_json::Value,
}

/// One fragment of an engine's final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part", rename_all = "snake_case")]
pub enum OutputPart {
    /// A textual fragment
    Text { text: String },

    /// A structured fragment (e.g. a tool-call result the engine chose to
    /// surface instead of prose)
    Structured { value: serde_json::Value },
}

/// The final output event of a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOutput {
    /// Content fragments, in the order the engine produced them
    #[serde(default)]
    pub parts: Vec<OutputPart>,

    /// Replacement for the session's engine-owned state blob.
    /// `None` leaves the stored blob untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

impl EngineOutput {
    /// Resolve this output into tagged content, once, at the boundary.
    ///
    /// Non-empty text fragments win and are newline-joined; otherwise the
    /// first structured fragment is surfaced verbatim; otherwise the
    /// output is empty — which is not an error.
    pub fn resolve(&self) -> ResolvedContent {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|p| match p {
                OutputPart::Text { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if !texts.is_empty() {
            return ResolvedContent::Text(texts.join("\n"));
        }

        if let Some(OutputPart::Structured { value }) = self
            .parts
            .iter()
            .find(|p| matches!(p, OutputPart::Structured { .. }))
        {
            return ResolvedContent::Structured(value.clone());
        }

        ResolvedContent::Empty
    }
}

/// Resolve an optional final output — `None` means the engine emitted no
/// output event at all, which resolves to `Empty`.
pub fn resolve_final(output: Option<&EngineOutput>) -> ResolvedContent {
    match output {
        Some(output) => output.resolve(),
        None => ResolvedContent::Empty,
    }
}

/// One event in a streamed engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Whether this is the final event of the run.
    /// Exactly one final event terminates a well-formed run.
    pub is_final: bool,

    /// Output carried by this event. Intermediate events usually carry
    /// none; the final event may also carry none (absence of content is
    /// not an error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<EngineOutput>,
}

impl EngineEvent {
    /// An intermediate activity event with no output.
    pub fn activity() -> Self {
        Self {
            is_final: false,
            output: None,
        }
    }

    /// The terminating event of a run.
    pub fn finished(output: EngineOutput) -> Self {
        Self {
            is_final: true,
            output: Some(output),
        }
    }
}

/// The reasoning-engine trait.
///
/// Every backend implements this; the bridge calls `run()` or
/// `run_streamed()` without knowing which engine is bound.
#[async_trait]
pub trait Engine: Send + Sync {
    /// A human-readable name for this engine (e.g., "chat").
    fn name(&self) -> &str;

    /// Run one turn to completion and return the final output event.
    ///
    /// `Ok(None)` means the engine emitted no output event — the caller
    /// treats that as empty content, not as a failure.
    async fn run(&self, turn: EngineTurn) -> std::result::Result<Option<EngineOutput>, EngineError>;

    /// Run one turn as a lazy, finite event sequence.
    ///
    /// Implementations must observe `cancel` between suspension points and
    /// stop work promptly once it fires — the caller cancels when stream
    /// consumption is abandoned.
    async fn run_streamed(
        &self,
        turn: EngineTurn,
        cancel: CancellationToken,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<EngineEvent, EngineError>>,
        EngineError,
    > {
        // Default implementation: one blocking run wrapped as a single
        // final event.
        let output = tokio::select! {
            result = self.run(turn) => result?,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(EngineEvent {
                is_final: true,
                output,
            }))
            .await;
        Ok(rx)
    }
}
