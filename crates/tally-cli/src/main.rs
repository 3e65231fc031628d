//! tally - answer questions about tabular data with SQL

mod config;
mod engine;
mod render;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tally_agent::{
    Agent, AgentConfig, Error as AgentError, ProviderTransport, RetryConfig, SessionOutcome,
};
use tally_ai::Model;
use tokio::io::{AsyncBufReadExt, BufReader};

use config::Config;
use engine::SqliteEngine;
use render::{StepPrinter, print_outcome};

/// tally - ask questions about a SQLite database in plain language
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Question to answer; reads one question per line from stdin if omitted
    question: Option<String>,

    /// SQLite database holding the loaded tables
    #[arg(long, required_unless_present = "init_config")]
    db: Option<PathBuf>,

    /// Model to use (default: gpt-4o-mini)
    #[arg(short, long)]
    model: Option<String>,

    /// OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Iteration budget per question
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Print full observations instead of previews
    #[arg(long)]
    show_steps: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file with defaults
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("tally=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    if args.init_config {
        let path = Config::init()?;
        println!("Config file: {}", path.display());
        println!();
        println!("Example configuration:");
        println!("{}", config::example_config());
        return Ok(());
    }

    let config = Config::load();
    let Some(db) = args.db.as_deref() else {
        anyhow::bail!("--db <PATH> is required");
    };
    let engine = Arc::new(
        SqliteEngine::open(db, config.labels.clone())
            .await
            .with_context(|| format!("Failed to open {}", db.display()))?,
    );

    let mut agent = Agent::new(
        agent_config(&args, &config),
        Arc::new(transport(&config)),
        engine.clone(),
        engine,
    );

    // Ctrl-C stops the running question, not the process
    let handle = agent.handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.is_running() {
                handle.abort();
            } else {
                std::process::exit(130);
            }
        }
    });

    if let Some(question) = &args.question {
        let outcome = ask(&mut agent, question, args.show_steps).await?;
        if !matches!(outcome, Some(SessionOutcome::Answered(_))) {
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        ask(&mut agent, question, args.show_steps).await?;
    }

    Ok(())
}

fn agent_config(args: &Args, config: &Config) -> AgentConfig {
    let defaults = AgentConfig::default();

    let model_id = args
        .model
        .clone()
        .or_else(|| config.model.clone())
        .unwrap_or_else(|| defaults.model.id.clone());
    let mut model = Model::new(model_id);
    if let Some(base_url) = args.base_url.clone().or_else(|| config.base_url.clone()) {
        model = model.with_base_url(base_url);
    }

    AgentConfig {
        model,
        api_key: config.api_key(),
        temperature: args.temperature.or(config.temperature).or(defaults.temperature),
        max_iterations: args
            .max_iterations
            .or(config.max_iterations)
            .unwrap_or(defaults.max_iterations),
        ..defaults
    }
}

fn transport(config: &Config) -> ProviderTransport {
    let transport = ProviderTransport::new().with_retry_config(RetryConfig::default());
    match config.rate_limit {
        Some(limit) => transport.with_rate_limit(limit.into()),
        None => transport,
    }
}

/// Answer one question, printing steps as they settle.
///
/// Returns `None` when the question was cancelled.
async fn ask(
    agent: &mut Agent,
    question: &str,
    show_steps: bool,
) -> anyhow::Result<Option<SessionOutcome>> {
    let mut receiver = agent.subscribe();
    let mut printer = StepPrinter::new(show_steps);

    let result = {
        let session = agent.ask(question);
        tokio::pin!(session);
        loop {
            tokio::select! {
                result = &mut session => break result,
                Ok(event) = receiver.recv() => printer.handle(&event),
            }
        }
    };
    printer.drain(&mut receiver);

    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(Some(outcome))
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("Cancelled.");
            Ok(None)
        }
        Err(e @ AgentError::Configuration(_)) => {
            Err(anyhow::Error::new(e).context("Set OPENAI_API_KEY or api_keys.openai in the config file"))
        }
        Err(e) => Err(e.into()),
    }
}
