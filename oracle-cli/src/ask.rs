//! Single-question mode: wire config into an `Oracle`, run it, print the answer.

use oracle_core::oracle::{IterationRecord, OracleCallback, RunState, render};
use oracle_core::{
    MockLlmProvider, Oracle, OracleConfig, OracleOptions, Query, Reasoner, RunError,
    SearchGateway, create_provider,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Exit status when the run is interrupted with Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

/// Progress lines on stderr while a run is in flight.
pub(crate) struct CliCallback {
    enabled: bool,
}

impl OracleCallback for CliCallback {
    fn on_state_change(&self, _run_id: Uuid, state: RunState) {
        if self.enabled && !state.is_terminal() {
            eprintln!("\x1b[90m[{state}]\x1b[0m");
        }
    }

    fn on_search_complete(&self, query: &Query, hits: usize, failed: bool) {
        if !self.enabled {
            return;
        }
        if failed {
            eprintln!("  \x1b[31m✗\x1b[0m {} (all backends failed)", query.text);
        } else {
            eprintln!("  \x1b[32m✓\x1b[0m {} ({hits} hits)", query.text);
        }
    }

    fn on_iteration_complete(&self, record: &IterationRecord) {
        if !self.enabled {
            return;
        }
        match (record.verdict, record.confidence) {
            (Some(verdict), Some(confidence)) => eprintln!(
                "  \x1b[90miteration {}: +{} evidence, {verdict} at {confidence:.2}\x1b[0m",
                record.iteration, record.added
            ),
            _ => eprintln!(
                "  \x1b[90miteration {}: +{} evidence\x1b[0m",
                record.iteration, record.added
            ),
        }
    }
}

/// Answer `question` and print it. Returns the process exit status.
pub async fn run_question(
    question: &str,
    config: &OracleConfig,
    options: &OracleOptions,
    show_progress: bool,
) -> anyhow::Result<i32> {
    let provider = match create_provider(&config.llm) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("LLM provider init failed: {}. Using mock.", e);
            Arc::new(MockLlmProvider::new())
        }
    };

    let gateway = SearchGateway::from_config(&config.search)
        .map_err(|e| anyhow::anyhow!("Search configuration error: {}", e))?;
    let reasoner = Reasoner::from_config(provider, config);
    let oracle = Oracle::new(Arc::new(gateway), Arc::new(reasoner)).with_callback(Arc::new(
        CliCallback {
            enabled: show_progress && options.verbose,
        },
    ));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match oracle.run_with_cancel(question, options, cancel).await {
        Ok(report) => {
            let rendered = render(&report, options.output_format, options.verbose)?;
            println!("{rendered}");
            Ok(if report.is_failed() { 1 } else { 0 })
        }
        Err(RunError::Cancelled { state }) => {
            eprintln!("Cancelled during {state}.");
            Ok(EXIT_CANCELLED)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(1)
        }
    }
}
