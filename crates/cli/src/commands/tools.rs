//! `colloquy tools` — connect configured providers and list capabilities.

use colloquy_config::AppConfig;
use colloquy_tools::{ProviderOutcome, TransportConnector, load_providers};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let descriptors = config.provider_descriptors()?;
    if descriptors.is_empty() {
        println!("No tool providers configured.");
        println!(
            "Add [[tool_providers]] tables to {} or point tool_provider_manifest at a manifest file.",
            AppConfig::config_dir().join("config.toml").display()
        );
        return Ok(());
    }

    let connector = TransportConnector::new();
    let loaded = load_providers(&descriptors, &connector, config.on_provider_failure).await?;

    println!();
    for report in &loaded.reports {
        match &report.outcome {
            ProviderOutcome::Connected { tools } => {
                println!("  {} — connected ({tools} tools)", report.name);
            }
            ProviderOutcome::Failed { error } => {
                println!("  {} — FAILED: {error}", report.name);
            }
        }
    }

    println!();
    if loaded.registry.is_empty() {
        println!("  No tools available.");
    } else {
        println!("  Merged capability set:");
        for name in loaded.registry.names() {
            let description = loaded
                .registry
                .get(name)
                .map(|t| t.description().to_string())
                .unwrap_or_default();
            println!("    {name}  {description}");
        }
    }
    println!();

    loaded.connections.release().await;
    Ok(())
}
