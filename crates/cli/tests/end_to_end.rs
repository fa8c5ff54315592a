//! End-to-end wiring: lifecycle manager → capability registry → engine →
//! invocation bridge, with fakes standing in for the provider transports
//! and the reasoning backend.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use colloquy_bridge::{DEFAULT_PROGRESS_STATUS, InvocationBridge};
use colloquy_core::engine::{Engine, EngineEvent, EngineOutput, EngineTurn, OutputPart};
use colloquy_core::error::{EngineError, ProviderConnectError};
use colloquy_core::session::{SessionKey, SessionStore};
use colloquy_core::tool::{
    CapabilityRegistry, FailurePolicy, ProviderDescriptor, ToolError, ToolHandle, ToolOutput,
};
use colloquy_core::turn::{TurnPayload, TurnResult};
use colloquy_session::InMemorySessionStore;
use colloquy_tools::{ProviderConnection, ProviderConnector, load_providers};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A provider tool that answers a fixed listing.
struct ListProjectsTool;

#[async_trait]
impl ToolHandle for ListProjectsTool {
    fn name(&self) -> &str {
        "list_projects"
    }
    fn description(&self) -> &str {
        "List all projects"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn invoke(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput {
            content: "Project Name: demo - Project Key: demo-key".into(),
            data: None,
        })
    }
}

struct FakeConnection {
    name: String,
    closed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProviderConnection for FakeConnection {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn handles(&self) -> Vec<Arc<dyn ToolHandle>> {
        vec![Arc::new(ListProjectsTool)]
    }

    async fn close(&mut self) -> Result<(), ProviderConnectError> {
        self.closed.lock().unwrap().push(self.name.clone());
        Ok(())
    }
}

struct FakeConnector {
    closed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    async fn connect(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Box<dyn ProviderConnection>, ProviderConnectError> {
        Ok(Box::new(FakeConnection {
            name: descriptor.name.clone(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

/// An engine that calls `list_projects` from its registry and reports the
/// tool's answer, with one activity event on the streamed path.
struct ToolCallingEngine {
    registry: Arc<CapabilityRegistry>,
}

impl ToolCallingEngine {
    async fn answer(&self, turn: &EngineTurn) -> Result<EngineOutput, EngineError> {
        let output = self
            .registry
            .invoke("list_projects", serde_json::json!({}))
            .await
            .map_err(|e| EngineError::Invocation(e.to_string()))?;

        let turns = turn.state.get("turns").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(EngineOutput {
            parts: vec![OutputPart::Text {
                text: output.content,
            }],
            state: Some(serde_json::json!({"turns": turns + 1})),
        })
    }
}

#[async_trait]
impl Engine for ToolCallingEngine {
    fn name(&self) -> &str {
        "tool-calling"
    }

    async fn run(&self, turn: EngineTurn) -> Result<Option<EngineOutput>, EngineError> {
        Ok(Some(self.answer(&turn).await?))
    }

    async fn run_streamed(
        &self,
        turn: EngineTurn,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<EngineEvent, EngineError>>, EngineError> {
        let (tx, rx) = mpsc::channel(4);
        let output = self.answer(&turn).await;
        tokio::spawn(async move {
            let _ = tx.send(Ok(EngineEvent::activity())).await;
            match output {
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

fn descriptors() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::stdio("sonarqube", "unused"),
        ProviderDescriptor::stdio("extras", "unused"),
    ]
}

#[tokio::test]
async fn fresh_session_streams_progress_then_completed() {
    let closed = Arc::new(Mutex::new(Vec::new()));
    let connector = FakeConnector {
        closed: Arc::clone(&closed),
    };

    let loaded = load_providers(&descriptors(), &connector, FailurePolicy::BestEffort)
        .await
        .unwrap();
    assert_eq!(loaded.registry.names(), vec!["list_projects"]);

    let engine = ToolCallingEngine {
        registry: Arc::clone(&loaded.registry),
    };
    let sessions = Arc::new(InMemorySessionStore::new());
    let bridge = InvocationBridge::new(Arc::new(engine), sessions.clone());

    // Query "list projects" on the fresh key "s1": the session is created
    // with empty state, one progress result with the fixed status text,
    // then the completed result carrying the engine's final text.
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
            payload: TurnPayload::Text("Project Name: demo - Project Key: demo-key".into())
        }
    );
    assert!(stream.next().await.is_none());

    let handle = sessions.get(&SessionKey::from("s1")).await.unwrap().unwrap();
    {
        let session = handle.read().await;
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.state, serde_json::json!({"turns": 1}));
    }

    // Releasing the scope closes both provider connections, last first.
    loaded.connections.release().await;
    assert_eq!(*closed.lock().unwrap(), vec!["extras", "sonarqube"]);
}

#[tokio::test]
async fn blocking_turn_reaches_the_tool() {
    let closed = Arc::new(Mutex::new(Vec::new()));
    let connector = FakeConnector {
        closed: Arc::clone(&closed),
    };

    let loaded = load_providers(&descriptors(), &connector, FailurePolicy::BestEffort)
        .await
        .unwrap();
    let engine = ToolCallingEngine {
        registry: Arc::clone(&loaded.registry),
    };
    let bridge = InvocationBridge::new(Arc::new(engine), Arc::new(InMemorySessionStore::new()));

    let text = bridge
        .invoke_blocking("list projects", &SessionKey::from("s1"))
        .await
        .unwrap();
    assert_eq!(text, "Project Name: demo - Project Key: demo-key");

    loaded.connections.release().await;
}
