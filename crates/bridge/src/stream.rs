//! The streaming turn sequence.
//!
//! `TurnStream` is lazy, finite, and non-restartable: zero or more
//! `Progress` results, then exactly one `Completed` result — or a terminal
//! error, after which nothing further is yielded. Dropping the stream
//! before the final item cancels the underlying engine invocation.

use colloquy_core::error::Error;
use colloquy_core::turn::TurnResult;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A stream of turn results for one invocation.
pub struct TurnStream {
    rx: mpsc::Receiver<Result<TurnResult, Error>>,
    cancel: CancellationToken,
    forwarder: JoinHandle<()>,
}

impl TurnStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<TurnResult, Error>>,
        cancel: CancellationToken,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            cancel,
            forwarder,
        }
    }

    /// The next result, or `None` once the sequence has ended.
    pub async fn next(&mut self) -> Option<Result<TurnResult, Error>> {
        self.rx.recv().await
    }

    /// Drain the sequence and return the completed payload's result.
    ///
    /// Progress results are discarded; a terminal error is returned as-is.
    pub async fn drain(mut self) -> Result<TurnResult, Error> {
        let mut last = None;
        while let Some(item) = self.next().await {
            match item {
                Ok(result) => last = Some(result),
                Err(e) => return Err(e),
            }
        }
        last.filter(TurnResult::is_completed)
            .ok_or_else(|| Error::Internal("turn stream ended without a completed result".into()))
    }
}

impl Stream for TurnStream {
    type Item = Result<TurnResult, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        // Abandoned consumption must not leak an in-flight engine call.
        self.cancel.cancel();
        self.forwarder.abort();
    }
}
