//! Launcher binary: wires one [`ef_store::MemoryEventFamilyStore`] and one
//! [`ef_llm::HttpLlmClient`], seeds the store from a titles file, and drives
//! a single [`ef_orchestrator::Orchestrator::run_once`] (spec §6 CLI
//! surface, §10.5). Argument parsing follows `brain::main`'s unadorned
//! manual-flag-loop style rather than reaching for a parser crate.

use std::path::PathBuf;
use std::sync::Arc;

use ef_config::{ConfigError, EfConfig};
use ef_llm::HttpLlmClient;
use ef_orchestrator::{Orchestrator, RunPhase};
use ef_store::{EventFamilyStore, MemoryEventFamilyStore};
use ef_types::Title;
use thiserror::Error;

/// Errors that can stop the launcher before a run even starts.
#[derive(Debug, Error)]
enum CliError {
    /// An unrecognized subcommand or flag, or a flag missing its value.
    #[error("{0}")]
    Usage(String),

    /// Config file failed to load or validate.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// The titles file could not be read.
    #[error("failed to read titles file {path}: {source}")]
    TitlesIo {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The titles file didn't parse as a JSON array of titles.
    #[error("failed to parse titles file: {0}")]
    TitlesParse(#[from] serde_json::Error),

    /// The API key environment variable named by `--api-key-env` was unset.
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),

    /// Seeding a title into the store failed.
    #[error("failed to seed titles: {0}")]
    Seed(#[from] ef_errors::RunError),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run_cli().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("ef-cli error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run_cli() -> Result<i32, CliError> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut command = "run".to_string();
    if let Some(first) = args.first().cloned() {
        args.remove(0);
        if first == "run" || first == "--help" || first == "-h" {
            command = first;
        } else if first.starts_with('-') {
            args.insert(0, first);
        } else {
            return Err(CliError::Usage(format!("unknown subcommand: {first}")));
        }
    }

    if command == "--help" || command == "-h" {
        print_usage();
        return Ok(0);
    }

    let mut config_path: Option<PathBuf> = None;
    let mut titles_path: Option<PathBuf> = None;
    let mut api_key_env = "ANTHROPIC_API_KEY".to_string();

    let mut remaining = args;
    while let Some(flag) = remaining.first().cloned() {
        remaining.remove(0);
        match flag.as_str() {
            "--config" => config_path = Some(PathBuf::from(take_arg("--config", &mut remaining)?)),
            "--titles" => titles_path = Some(PathBuf::from(take_arg("--titles", &mut remaining)?)),
            "--api-key-env" => api_key_env = take_arg("--api-key-env", &mut remaining)?,
            other => return Err(CliError::Usage(format!("unknown flag: {other}"))),
        }
    }

    let config = match config_path {
        Some(path) => EfConfig::from_path(&path)?,
        None => EfConfig::from_path_or_default("ef-config.json")?,
    };

    let store = MemoryEventFamilyStore::new();
    if let Some(path) = titles_path {
        seed_titles(&store, &path).await?;
    }

    let api_key = std::env::var(&api_key_env).map_err(|_| CliError::MissingApiKey(api_key_env.clone()))?;
    let llm = HttpLlmClient::new(
        api_key,
        config.llm_model.clone(),
        config.llm_base_url.clone(),
        config.llm_timeout,
        config.llm_max_tokens,
    );

    let orchestrator = Orchestrator::new(
        Arc::new(llm),
        Arc::new(store) as Arc<dyn EventFamilyStore>,
        config,
    );
    let report = orchestrator.run_once().await;

    match &report.final_phase {
        RunPhase::Done => {
            println!(
                "run {} done: {} titles selected, {} candidates, {} EFs committed ({} exhausted)",
                report.run_id,
                report.titles_selected,
                report.candidates_produced,
                report.commits_persisted,
                report.exhausted.len(),
            );
            Ok(0)
        }
        RunPhase::Aborted { phase, reason, category } => {
            eprintln!("run {} aborted in {:?}: {reason}", report.run_id, phase);
            Ok(exit_code_for_category(category))
        }
        other => {
            // `run_once` only ever returns `Done` or `Aborted`; treat anything
            // else as an internal error rather than guessing an exit code.
            eprintln!("run {} ended in unexpected phase {:?}", report.run_id, other);
            Ok(1)
        }
    }
}

/// Maps spec §6's CLI error categories to the exit codes this launcher uses.
/// 0 is reserved for `Done`; codes below are this binary's own scheme, not a
/// contract the spec numbers explicitly.
fn exit_code_for_category(category: &str) -> i32 {
    match category {
        "store" => 2,
        "llm" => 3,
        "config" => 4,
        "invariant" => 5,
        _ => 6,
    }
}

async fn seed_titles(store: &MemoryEventFamilyStore, path: &PathBuf) -> Result<(), CliError> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::TitlesIo {
        path: path.display().to_string(),
        source,
    })?;
    let titles: Vec<Title> = serde_json::from_str(&content)?;
    for title in titles {
        store.put_title(title).await?;
    }
    Ok(())
}

fn take_arg(flag: &str, remaining: &mut Vec<String>) -> Result<String, CliError> {
    if remaining.is_empty() {
        return Err(CliError::Usage(format!("missing value for {flag}")));
    }
    Ok(remaining.remove(0))
}

fn print_usage() {
    println!(
        "ef-cli run [--config ef-config.json] [--titles titles.json] [--api-key-env ANTHROPIC_API_KEY]\n\
Exit codes: 0 done, 2 store error, 3 llm error, 4 config error, 5 invariant violation, 6 other, 1 usage/internal error."
    );
}
