//! Turn results — the public shapes a conversational turn produces.
//!
//! `TurnResult` is what both bridge entry points are defined in terms of:
//! the streaming path yields a sequence of them, the blocking path is the
//! same pipeline keeping only the `Completed` payload's textual form.

use serde::{Deserialize, Serialize};

/// One item in a turn's result sequence.
///
/// A streaming sequence emits zero or more `Progress` items followed by
/// exactly one `Completed` item, always last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnResult {
    /// Work continues. The status is human-readable and carries no
    /// structured data — callers are not meant to parse it.
    Progress { status: String },

    /// The turn finished with a final payload.
    Completed { payload: TurnPayload },
}

impl TurnResult {
    /// Wire-level name for this result type.
    pub fn result_type(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// The final payload of a completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TurnPayload {
    /// Newline-joined textual fragments (may be empty).
    Text(String),

    /// The first structured fragment of the engine's final output,
    /// verbatim. Only produced when no textual fragments exist.
    Structured(serde_json::Value),
}

impl TurnPayload {
    /// The textual form of this payload.
    ///
    /// Structured payloads have no textual form — the blocking entry point
    /// returns `""` for them, matching "an output event with no textual
    /// parts" semantics.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(_) => String::new(),
        }
    }

    /// Render for display: text as-is, structured as compact JSON.
    pub fn display(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// Final engine output, resolved once at the boundary where engine events
/// are consumed. Call sites match on this instead of re-inspecting the raw
/// output shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedContent {
    /// At least one non-empty text fragment existed; joined with newlines.
    /// Text fragments take priority over structured fragments.
    Text(String),

    /// No text fragments, but at least one structured fragment; this is
    /// the first one, verbatim.
    Structured(serde_json::Value),

    /// No output event, or an output event with no content. Not an error.
    Empty,
}

impl ResolvedContent {
    /// The completed-turn payload for this content.
    pub fn into_payload(self) -> TurnPayload {
        match self {
            Self::Text(text) => TurnPayload::Text(text),
            Self::Structured(value) => TurnPayload::Structured(value),
            Self::Empty => TurnPayload::Text(String::new()),
        }
    }
}
