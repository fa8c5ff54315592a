//! `colloquy run` — one conversational turn against a session.

use std::sync::Arc;

use colloquy_bridge::InvocationBridge;
use colloquy_config::AppConfig;
use colloquy_core::session::{SessionKey, SessionStore};
use colloquy_core::turn::TurnResult;
use colloquy_engine::ChatEngine;
use colloquy_session::{FileSessionStore, InMemorySessionStore};
use colloquy_tools::{TransportConnector, load_providers};
use tracing::error;

pub async fn run(
    query: String,
    session: String,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for the API key early — a missing credential aborts startup
    // before any provider is launched.
    let Some(api_key) = config.api_key.clone() else {
        error!("No API key configured");
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    COLLOQUY_API_KEY   (generic)");
        eprintln!("    GEMINI_API_KEY     (for the default Gemini backend)");
        eprintln!("    OPENAI_API_KEY     (for OpenAI-compatible backends)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };

    // Connect tool providers and build the capability registry.
    let descriptors = config.provider_descriptors()?;
    let connector = TransportConnector::new();
    let loaded = load_providers(&descriptors, &connector, config.on_provider_failure).await?;

    for report in &loaded.reports {
        if !report.is_connected() {
            eprintln!("  [warn] tool provider '{}' unavailable", report.name);
        }
    }

    // Build the engine bound to the registry.
    let engine = ChatEngine::new(
        config.engine.base_url.clone(),
        api_key,
        config.engine.model.clone(),
        Arc::clone(&loaded.registry),
    )
    .with_instruction(config.engine.instruction.clone())
    .with_temperature(config.engine.temperature)
    .with_max_tokens(config.engine.max_tokens)
    .with_max_iterations(config.engine.max_iterations);

    // Build the session store.
    let sessions: Arc<dyn SessionStore> = match config.session.backend.as_str() {
        "file" => {
            let dir = config
                .session
                .path
                .as_ref()
                .map(Into::into)
                .unwrap_or_else(FileSessionStore::default_dir);
            Arc::new(FileSessionStore::new(dir))
        }
        _ => Arc::new(InMemorySessionStore::new()),
    };

    let mut bridge = InvocationBridge::new(Arc::new(engine), sessions);
    if let Some(status) = &config.bridge.progress_status {
        bridge = bridge.with_progress_status(status.clone());
    }

    let key = SessionKey::from(session.as_str());
    let outcome = run_turn(&bridge, &query, &key, stream).await;

    // Connections are released whether the turn succeeded or not.
    loaded.connections.release().await;
    outcome
}

async fn run_turn(
    bridge: &InvocationBridge,
    query: &str,
    key: &SessionKey,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if stream {
        let mut turn = bridge.invoke_streaming(query, key).await?;
        while let Some(item) = turn.next().await {
            match item? {
                TurnResult::Progress { status } => eprintln!("  ... {status}"),
                TurnResult::Completed { payload } => println!("{}", payload.display()),
            }
        }
    } else {
        eprint!("  Thinking...");
        let response = bridge.invoke_blocking(query, key).await?;
        eprint!("\r              \r");
        println!("{response}");
    }
    Ok(())
}
