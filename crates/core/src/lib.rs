//! # Colloquy Core
//!
//! Domain types, traits, and error definitions for the colloquy invocation
//! bridge. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here: the reasoning engine, the
//! session store, and the tool-provider capability seam. Implementations
//! live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod engine;
pub mod error;
pub mod session;
pub mod tool;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use engine::{Engine, EngineEvent, EngineOutput, EngineTurn, OutputPart};
pub use error::{EngineError, Error, IoError, ProviderConnectError, Result};
pub use session::{Session, SessionHandle, SessionKey, SessionStore, TurnRecord};
pub use tool::{
    CapabilityRegistry, FailurePolicy, LaunchSpec, ProviderDescriptor, ToolDefinition, ToolError,
    ToolHandle, ToolOutput,
};
pub use turn::{ResolvedContent, TurnPayload, TurnResult};
