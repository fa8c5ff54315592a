//! The invocation bridge implementation.

use colloquy_core::engine::{Engine, EngineOutput, EngineTurn, resolve_final};
use colloquy_core::error::Error;
use colloquy_core::session::{SessionHandle, SessionKey, SessionStore, TurnRecord};
use colloquy_core::turn::{TurnPayload, TurnResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::stream::TurnStream;

/// The status text carried by progress results. Fixed and human-readable;
/// callers are not meant to parse it.
pub const DEFAULT_PROGRESS_STATUS: &str = "Processing the request...";

/// Orchestrates single conversational turns against a bound engine.
///
/// Construction takes the engine (already bound to its capability
/// registry) and the session store. The bridge itself is stateless across
/// turns — everything a turn needs lives in the session.
pub struct InvocationBridge {
    engine: Arc<dyn Engine>,
    sessions: Arc<dyn SessionStore>,
    progress_status: String,
}

impl InvocationBridge {
    pub fn new(engine: Arc<dyn Engine>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            engine,
            sessions,
            progress_status: DEFAULT_PROGRESS_STATUS.to_string(),
        }
    }

    /// Override the progress status text.
    pub fn with_progress_status(mut self, status: impl Into<String>) -> Self {
        self.progress_status = status.into();
        self
    }

    /// Resolve the session (creating it with empty initial state if the
    /// key is unknown — a query is never rejected for an unknown key) and
    /// snapshot it into an engine turn.
    async fn prepare_turn(
        &self,
        query: &str,
        session_key: &SessionKey,
    ) -> Result<(SessionHandle, EngineTurn), Error> {
        let handle = self.sessions.resolve_or_create(session_key).await?;

        let session = handle.read().await;
        let turn = EngineTurn {
            turn_id: Uuid::new_v4().to_string(),
            session_key: session_key.clone(),
            query: query.to_string(),
            history: session.turns.clone(),
            state: session.state.clone(),
        };
        drop(session);

        debug!(
            session_key = %session_key,
            turn_id = %turn.turn_id,
            history = turn.history.len(),
            "Prepared turn"
        );
        Ok((handle, turn))
    }

    /// Submit the query, wait for engine completion, and return the
    /// newline-joined textual fragments of the final output.
    ///
    /// No output event, or an output event with no textual parts, returns
    /// `""` — absence of content is not an error. This is the streaming
    /// pipeline keeping only the completed payload's text form.
    pub async fn invoke_blocking(
        &self,
        query: &str,
        session_key: &SessionKey,
    ) -> Result<String, Error> {
        let (handle, turn) = self.prepare_turn(query, session_key).await?;
        let turn_id = turn.turn_id.clone();

        let output = self.engine.run(turn).await.map_err(Error::Engine)?;
        let payload =
            commit_final(&self.sessions, &handle, session_key, query, &turn_id, output).await?;

        info!(session_key = %session_key, turn_id = %turn_id, "Turn completed");
        Ok(payload.into_text())
    }

    /// Submit the query and yield turn results as the engine reports
    /// activity: zero or more progress results with a fixed status, then
    /// exactly one completed result.
    ///
    /// The sequence is lazy, finite, and non-restartable. Dropping it
    /// before the completed result cancels the engine invocation. Engine
    /// failures surface as a terminal error item; nothing is yielded
    /// afterward.
    pub async fn invoke_streaming(
        &self,
        query: &str,
        session_key: &SessionKey,
    ) -> Result<TurnStream, Error> {
        let (handle, turn) = self.prepare_turn(query, session_key).await?;
        let turn_id = turn.turn_id.clone();

        let cancel = CancellationToken::new();
        let mut events = self
            .engine
            .run_streamed(turn, cancel.child_token())
            .await
            .map_err(Error::Engine)?;

        let (tx, rx) = mpsc::channel(16);
        let sessions = Arc::clone(&self.sessions);
        let session_key = session_key.clone();
        let query = query.to_string();
        let progress_status = self.progress_status.clone();
        let forwarder_cancel = cancel.clone();

        let forwarder = tokio::spawn(async move {
            while let Some(item) = events.recv().await {
                match item {
                    Ok(event) if !event.is_final => {
                        let progress = TurnResult::Progress {
                            status: progress_status.clone(),
                        };
                        if tx.send(Ok(progress)).await.is_err() {
                            // Consumer went away — stop the engine too.
                            forwarder_cancel.cancel();
                            return;
                        }
                    }
                    Ok(event) => {
                        let result = commit_final(
                            &sessions,
                            &handle,
                            &session_key,
                            &query,
                            &turn_id,
                            event.output,
                        )
                        .await;
                        let item = match result {
                            Ok(payload) => {
                                info!(session_key = %session_key, turn_id = %turn_id, "Turn completed");
                                Ok(TurnResult::Completed { payload })
                            }
                            Err(e) => Err(e),
                        };
                        let _ = tx.send(item).await;
                        return;
                    }
                    Err(e) => {
                        warn!(session_key = %session_key, turn_id = %turn_id, error = %e, "Engine failed mid-turn");
                        let _ = tx.send(Err(Error::Engine(e))).await;
                        return;
                    }
                }
            }

            // The engine closed its event channel without a final event —
            // a contract violation, surfaced as a terminal error.
            let _ = tx
                .send(Err(Error::Engine(
                    colloquy_core::error::EngineError::StreamInterrupted(
                        "engine ended without a final event".into(),
                    ),
                )))
                .await;
        });

        Ok(TurnStream::new(rx, cancel, forwarder))
    }
}

/// Shared tail of both entry points: resolve the final output once into a
/// tagged payload, record the turn, apply the engine's replacement state
/// blob, and persist.
///
/// Nothing is recorded for failed turns — the session stays as it was at
/// the end of the prior turn.
async fn commit_final(
    sessions: &Arc<dyn SessionStore>,
    handle: &SessionHandle,
    session_key: &SessionKey,
    query: &str,
    turn_id: &str,
    output: Option<EngineOutput>,
) -> Result<TurnPayload, Error> {
    let payload = resolve_final(output.as_ref()).into_payload();

    {
        let mut session = handle.write().await;
        let mut record = TurnRecord::new(query, payload.display());
        record.id = turn_id.to_string();
        session.record_turn(record);
        if let Some(state) = output.and_then(|o| o.state) {
            session.replace_state(state);
        }
    }

    sessions.persist(session_key).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_core::engine::{EngineEvent, OutputPart};
    use colloquy_core::error::EngineError;
    use colloquy_session::InMemorySessionStore;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A scripted engine: configurable final output, optional progress
    /// activity, optional failure, and a record of what it was asked.
    struct ScriptedEngine {
        parts: Vec<OutputPart>,
        state: Option<serde_json::Value>,
        activity_events: usize,
        fail: Option<EngineError>,
        /// Emits nothing after the first activity event until cancelled.
        hang_after_first_activity: bool,
        asked_to_stop: Arc<AtomicBool>,
        turns_seen: Arc<Mutex<Vec<EngineTurn>>>,
    }

    impl ScriptedEngine {
        fn text(s: &str) -> Self {
            Self::with_parts(vec![OutputPart::Text { text: s.into() }])
        }

        fn with_parts(parts: Vec<OutputPart>) -> Self {
            Self {
                parts,
                state: None,
                activity_events: 0,
                fail: None,
                hang_after_first_activity: false,
                asked_to_stop: Arc::new(AtomicBool::new(false)),
                turns_seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn empty() -> Self {
            Self::with_parts(Vec::new())
        }
    }

    #[async_trait]
    impl Engine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, turn: EngineTurn) -> Result<Option<EngineOutput>, EngineError> {
            self.turns_seen.lock().unwrap().push(turn);
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            if self.parts.is_empty() && self.state.is_none() {
                return Ok(None);
            }
            Ok(Some(EngineOutput {
                parts: self.parts.clone(),
                state: self.state.clone(),
            }))
        }

        async fn run_streamed(
            &self,
            turn: EngineTurn,
            cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<Result<EngineEvent, EngineError>>, EngineError> {
            self.turns_seen.lock().unwrap().push(turn);

            let (tx, rx) = mpsc::channel(16);
            let parts = self.parts.clone();
            let state = self.state.clone();
            let activity_events = self.activity_events;
            let fail = self.fail.clone();
            let hang = self.hang_after_first_activity;
            let asked_to_stop = Arc::clone(&self.asked_to_stop);

            tokio::spawn(async move {
                for _ in 0..activity_events {
                    if tx.send(Ok(EngineEvent::activity())).await.is_err() {
                        return;
                    }
                    if hang {
                        // Wait for cancellation instead of finishing.
                        cancel.cancelled().await;
                        asked_to_stop.store(true, Ordering::SeqCst);
                        return;
                    }
                }

                if let Some(e) = fail {
                    let _ = tx.send(Err(e)).await;
                    return;
                }

                let _ = tx
                    .send(Ok(EngineEvent::finished(EngineOutput { parts, state })))
                    .await;
            });

            Ok(rx)
        }
    }

    fn bridge_with(engine: ScriptedEngine) -> (InvocationBridge, Arc<InMemorySessionStore>) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let bridge = InvocationBridge::new(Arc::new(engine), sessions.clone());
        (bridge, sessions)
    }

    #[tokio::test]
    async fn blocking_returns_joined_text() {
        let engine = ScriptedEngine::with_parts(vec![
            OutputPart::Text {
                text: "Project A".into(),
            },
            OutputPart::Text { text: "".into() },
            OutputPart::Text {
                text: "Project B".into(),
            },
        ]);
        let (bridge, _) = bridge_with(engine);

        let text = bridge
            .invoke_blocking("list projects", &SessionKey::from("s1"))
            .await
            .unwrap();
        assert_eq!(text, "Project A\nProject B");
    }

    #[tokio::test]
    async fn blocking_empty_engine_returns_empty_string() {
        let (bridge, sessions) = bridge_with(ScriptedEngine::empty());

        let text = bridge
            .invoke_blocking("anything", &SessionKey::from("s1"))
            .await
            .unwrap();
        assert_eq!(text, "");
        // The turn still happened: the session exists and recorded it.
        assert_eq!(sessions.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blocking_structured_only_returns_empty_string() {
        let engine = ScriptedEngine::with_parts(vec![OutputPart::Structured {
            value: serde_json::json!({"projects": ["a"]}),
        }]);
        let (bridge, _) = bridge_with(engine);

        let text = bridge
            .invoke_blocking("list projects", &SessionKey::from("s1"))
            .await
            .unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn streaming_yields_progress_then_completed() {
        let mut engine = ScriptedEngine::text("Project A");
        engine.activity_events = 1;
        let (bridge, sessions) = bridge_with(engine);

        let mut stream = bridge
            .invoke_streaming("list projects", &SessionKey::from("s1"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(
            first,
            TurnResult::Progress {
                status: DEFAULT_PROGRESS_STATUS.into()
            }
        );

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(
            second,
            TurnResult::Completed {
                payload: TurnPayload::Text("Project A".into())
            }
        );

        // Exactly one completed result, always last.
        assert!(stream.next().await.is_none());

        // The fresh key got a session with the turn recorded.
        let handle = sessions.get(&SessionKey::from("s1")).await.unwrap().unwrap();
        let session = handle.read().await;
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].query, "list projects");
    }

    #[tokio::test]
    async fn streaming_structured_fallback_is_verbatim() {
        let engine = ScriptedEngine::with_parts(vec![OutputPart::Structured {
            value: serde_json::json!({"projects": ["a", "b"]}),
        }]);
        let (bridge, _) = bridge_with(engine);

        let stream = bridge
            .invoke_streaming("list projects", &SessionKey::from("s1"))
            .await
            .unwrap();
        let result = stream.drain().await.unwrap();
        assert_eq!(
            result,
            TurnResult::Completed {
                payload: TurnPayload::Structured(serde_json::json!({"projects": ["a", "b"]}))
            }
        );
    }

    #[tokio::test]
    async fn text_fragments_win_over_structured() {
        let engine = ScriptedEngine::with_parts(vec![
            OutputPart::Structured {
                value: serde_json::json!({"raw": true}),
            },
            OutputPart::Text {
                text: "prose".into(),
            },
        ]);
        let (bridge, _) = bridge_with(engine);

        let stream = bridge
            .invoke_streaming("q", &SessionKey::from("s1"))
            .await
            .unwrap();
        let result = stream.drain().await.unwrap();
        assert_eq!(
            result,
            TurnResult::Completed {
                payload: TurnPayload::Text("prose".into())
            }
        );
    }

    #[tokio::test]
    async fn blocking_equals_drained_streaming() {
        // The two modes share one pipeline; same script, same answer.
        let make = || ScriptedEngine::text("same answer");

        let (bridge, _) = bridge_with(make());
        let blocking = bridge
            .invoke_blocking("q", &SessionKey::from("s1"))
            .await
            .unwrap();

        let (bridge, _) = bridge_with(make());
        let streamed = bridge
            .invoke_streaming("q", &SessionKey::from("s1"))
            .await
            .unwrap()
            .drain()
            .await
            .unwrap();

        match streamed {
            TurnResult::Completed { payload } => assert_eq!(blocking, payload.into_text()),
            _ => panic!("expected completed result"),
        }
    }

    #[tokio::test]
    async fn streaming_error_is_terminal() {
        let mut engine = ScriptedEngine::text("never sent");
        engine.activity_events = 1;
        engine.fail = Some(EngineError::Invocation("backend exploded".into()));
        let (bridge, sessions) = bridge_with(engine);

        let mut stream = bridge
            .invoke_streaming("q", &SessionKey::from("s1"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, TurnResult::Progress { .. }));

        let second = stream.next().await.unwrap();
        assert!(matches!(second, Err(Error::Engine(_))));

        // Nothing further after a terminal error.
        assert!(stream.next().await.is_none());

        // The failed turn did not touch the session.
        let handle = sessions.get(&SessionKey::from("s1")).await.unwrap().unwrap();
        assert!(handle.read().await.turns.is_empty());
    }

    #[tokio::test]
    async fn blocking_error_leaves_session_intact() {
        let mut engine = ScriptedEngine::text("unused");
        engine.fail = Some(EngineError::Invocation("backend exploded".into()));
        let (bridge, sessions) = bridge_with(engine);

        let err = bridge
            .invoke_blocking("q", &SessionKey::from("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));

        let handle = sessions.get(&SessionKey::from("s1")).await.unwrap().unwrap();
        assert!(handle.read().await.turns.is_empty());
    }

    #[tokio::test]
    async fn abandoning_stream_cancels_engine() {
        let mut engine = ScriptedEngine::text("never reached");
        engine.activity_events = 1;
        engine.hang_after_first_activity = true;
        let asked_to_stop = Arc::clone(&engine.asked_to_stop);
        let (bridge, _) = bridge_with(engine);

        let mut stream = bridge
            .invoke_streaming("q", &SessionKey::from("s1"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, TurnResult::Progress { .. }));

        // Abandon consumption — the engine must be asked to stop.
        drop(stream);

        for _ in 0..100 {
            if asked_to_stop.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(asked_to_stop.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn sequential_turns_observe_prior_state() {
        let mut engine = ScriptedEngine::text("answer");
        engine.state = Some(serde_json::json!({"turns": 1}));
        let turns_seen = Arc::clone(&engine.turns_seen);
        let (bridge, _) = bridge_with(engine);
        let key = SessionKey::from("s1");

        bridge.invoke_blocking("first", &key).await.unwrap();
        bridge.invoke_blocking("second", &key).await.unwrap();

        let seen = turns_seen.lock().unwrap();
        assert!(seen[0].history.is_empty());
        assert_eq!(seen[0].state, serde_json::json!({}));
        // The second turn sees the first turn's record and the engine's
        // replacement state blob.
        assert_eq!(seen[1].history.len(), 1);
        assert_eq!(seen[1].history[0].query, "first");
        assert_eq!(seen[1].state, serde_json::json!({"turns": 1}));
    }

    #[tokio::test]
    async fn custom_progress_status_is_used() {
        let mut engine = ScriptedEngine::text("done");
        engine.activity_events = 2;
        let sessions = Arc::new(InMemorySessionStore::new());
        let bridge = InvocationBridge::new(Arc::new(engine), sessions)
            .with_progress_status("Still digging...");

        let mut stream = bridge
            .invoke_streaming("q", &SessionKey::from("s1"))
            .await
            .unwrap();

        let mut progress = 0;
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                TurnResult::Progress { status } => {
                    assert_eq!(status, "Still digging...");
                    progress += 1;
                }
                TurnResult::Completed { .. } => break,
            }
        }
        assert_eq!(progress, 2);
    }
}
