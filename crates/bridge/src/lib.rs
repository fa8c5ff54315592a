//! The invocation bridge — one conversational turn at a time.
//!
//! The bridge orchestrates a single turn: resolve-or-create the session,
//! submit the query to the bound reasoning engine, and normalize the
//! engine's output into one of two public result shapes:
//!
//! 1. **Blocking** — await the final output, return its text.
//! 2. **Streaming** — a lazy, finite sequence of progress results ending
//!    in exactly one completed result.
//!
//! Both entry points share the same session-resolution and
//! content-extraction pipeline, so the two modes can never diverge.
//!
//! Turns submitted sequentially by one caller observe session state as of
//! the end of the prior turn. The bridge does **not** serialize two
//! callers submitting turns against the same session key concurrently —
//! put a serializing queue in front of it if you need that.

pub mod invocation;
pub mod stream;

pub use invocation::{DEFAULT_PROGRESS_STATUS, InvocationBridge};
pub use stream::TurnStream;
