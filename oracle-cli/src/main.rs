//! Oracle CLI: ask questions of your own corpus from the terminal.
//!
//! Runs one question through the retrieval controller and prints the cited
//! answer as text or JSON.

mod ask;
mod commands;

use clap::Parser;
use oracle_core::{OracleConfig, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Oracle: answers from your files, code, documents and past conversations
#[derive(Parser, Debug)]
#[command(name = "oracle", version, about, long_about = None)]
struct Cli {
    /// Question to answer
    question: Option<String>,

    /// Single search pass, no refinement loop
    #[arg(long)]
    quick: bool,

    /// Increase verbosity (-v shows the iteration trace, -vv debug logs)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print the answer and errors
    #[arg(short, long)]
    quiet: bool,

    /// Upper bound on search passes
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Confidence at which searching stops early (0.0-1.0)
    #[arg(long)]
    threshold: Option<f64>,

    /// Passages requested per query
    #[arg(long)]
    top_k: Option<usize>,

    /// Output format: text or json
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the search fallback chain in priority order
    Backends,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default .oracle/config.toml in the workspace
    Init,
    /// Print the merged configuration
    Show,
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Apply command-line flags on top of the loaded configuration.
    fn apply_overrides(&self, config: &mut OracleConfig) {
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(max_iterations) = self.max_iterations {
            config.oracle.max_iterations = max_iterations;
        }
        if let Some(threshold) = self.threshold {
            config.oracle.confidence_threshold = threshold;
        }
        if let Some(top_k) = self.top_k {
            config.search.top_k = top_k;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(cli.log_filter()));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "oracle", "oracle")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "oracle.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = cli.command {
        return commands::handle_command(command, &workspace).await;
    }

    let Some(question) = cli.question.as_deref().map(str::trim).filter(|q| !q.is_empty())
    else {
        anyhow::bail!("No question given. Try: oracle \"What is AtomRuntime?\"");
    };

    if !oracle_core::config_exists(Some(&workspace)) {
        tracing::info!(
            "No configuration file found, using defaults. Run `oracle config init` to create one."
        );
    }

    // Flags are applied before validation so they can correct file values.
    let mut config = oracle_core::load_config_unvalidated(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let mut options = oracle_core::OracleOptions::from_config(&config);
    options.quick = cli.quick;
    options.verbose = cli.verbose > 0;
    options.output_format = cli.format.unwrap_or_default();

    let code = ask::run_question(question, &config, &options, !cli.quiet).await?;
    // Flush the file log before exiting with a status.
    drop(guard);
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_question_with_flags() {
        let cli = Cli::parse_from([
            "oracle",
            "What is AtomRuntime?",
            "--quick",
            "-vv",
            "--max-iterations",
            "5",
            "--threshold",
            "0.6",
            "--top-k",
            "3",
            "--format",
            "json",
        ]);
        assert_eq!(cli.question.as_deref(), Some("What is AtomRuntime?"));
        assert!(cli.quick);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.max_iterations, Some(5));
        assert_eq!(cli.threshold, Some(0.6));
        assert_eq!(cli.top_k, Some(3));
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert_eq!(cli.log_filter(), "debug");
    }

    #[test]
    fn test_overrides_fix_invalid_file_values() {
        let mut config = OracleConfig::default();
        config.oracle.max_iterations = 0;
        config.oracle.confidence_threshold = 3.0;
        assert!(config.validate().is_err());

        let cli = Cli::parse_from([
            "oracle",
            "q",
            "--max-iterations",
            "2",
            "--threshold",
            "0.5",
            "--model",
            "llama3.1:8b",
        ]);
        cli.apply_overrides(&mut config);
        assert!(config.validate().is_ok());
        assert_eq!(config.oracle.max_iterations, 2);
        assert_eq!(config.llm.model, "llama3.1:8b");
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["oracle", "q", "--format", "yaml"]).is_err());
    }

    #[test]
    fn test_log_filter_levels() {
        assert_eq!(Cli::parse_from(["oracle", "q"]).log_filter(), "warn");
        assert_eq!(Cli::parse_from(["oracle", "q", "--quiet"]).log_filter(), "error");
        assert_eq!(Cli::parse_from(["oracle", "q", "-v"]).log_filter(), "info");
        assert_eq!(Cli::parse_from(["oracle", "q", "-vvv"]).log_filter(), "trace");
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["oracle", "config", "init"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Init
            })
        ));

        let cli = Cli::parse_from(["oracle", "-w", "/tmp", "backends"]);
        assert!(matches!(cli.command, Some(Commands::Backends)));
        assert_eq!(cli.workspace, PathBuf::from("/tmp"));
    }
}
