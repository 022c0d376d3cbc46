//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use oracle_core::{OracleConfig, SearchGateway};
use std::path::Path;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace).await,
        Commands::Backends => handle_backends(workspace),
    }
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".oracle");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = OracleConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = oracle_core::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

/// One line per backend, highest priority first.
fn describe_backends(config: &OracleConfig) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(service) = &config.search.service {
        lines.push(format!("service  {}", service.url));
    }
    if let Some(index) = &config.search.index {
        lines.push(format!("index    {}", index.path.display()));
    }
    if let Some(sqlite) = &config.search.sqlite {
        lines.push(format!(
            "sqlite   {} (table {})",
            sqlite.path.display(),
            sqlite.table
        ));
    }
    lines
}

fn handle_backends(workspace: &Path) -> anyhow::Result<()> {
    let config = oracle_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    let gateway = SearchGateway::from_config(&config.search)
        .map_err(|e| anyhow::anyhow!("Search configuration error: {}", e))?;

    println!(
        "Search fallback chain (attempt timeout {}ms):",
        config.search.attempt_timeout_ms
    );
    for (n, line) in describe_backends(&config).iter().enumerate() {
        println!("  {}. {}", n + 1, line);
    }
    tracing::debug!(backends = ?gateway.backend_names(), "Resolved fallback chain");
    Ok(())
}
