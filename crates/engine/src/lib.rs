//! Reasoning-engine implementation for colloquy.
//!
//! `ChatEngine` drives any OpenAI-compatible chat-completions backend
//! through the core `Engine` trait: it advertises the capability registry
//! as callable tools, executes requested tool calls, and loops until the
//! backend answers with text (or the iteration cap is hit).

pub mod chat;
pub mod dedup;

pub use chat::ChatEngine;
pub use dedup::RequestDedup;
