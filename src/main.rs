use tether::agent_loop::{self, AgentLoop, LoopOutcome};
use tether::config::{self, Config};
use tether::guard::Sandbox;
use tether::llm::GeminiPlanner;
use tether::tools::Dispatcher;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tether - a planner-driven agent confined to one directory", long_about = None)]
struct Cli {
    /// What to ask the agent
    prompt: String,

    /// Print tool arguments and results, and enable debug logging
    #[arg(long)]
    verbose: bool,

    /// Sandbox root all tools are confined to
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Config file (default: ~/.tether/tether.yml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gemini model name
    #[arg(long)]
    model: Option<String>,

    /// Maximum planner round-trips
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Characters returned by `read` before truncation
    #[arg(long)]
    max_file_chars: Option<usize>,

    /// Wall-clock limit for `run`, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::discover(args.config.as_deref())?;
    config.apply_env()?;

    if let Some(root) = &args.root {
        config.sandbox.root = root.clone();
    }
    if let Some(model) = &args.model {
        config.gemini.model = model.clone();
    }
    if let Some(max_iterations) = args.max_iterations {
        config.runtime.max_iterations = max_iterations;
    }
    if let Some(max_file_chars) = args.max_file_chars {
        config.sandbox.max_file_chars = max_file_chars;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.sandbox.run_timeout_secs = timeout_secs;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loaded before tracing starts so RUST_LOG may come from .env.
    let dotenv = config::load_dotenv();

    let args = Cli::parse();
    init_tracing(args.verbose);
    match dotenv {
        Ok(Some(path)) => tracing::debug!(path = %path.display(), "loaded .env"),
        Ok(None) => {}
        Err(e) => tracing::warn!("{:#}", e),
    }

    let config = resolve_config(&args)?;
    let sandbox = Sandbox::new(&config.sandbox.root)
        .with_context(|| format!("Cannot use {:?} as the sandbox root", config.sandbox.root))?;
    tracing::info!(root = %sandbox.root().display(), model = %config.gemini.model, "starting agent");

    let runner = config.sandbox.runner_settings();
    let planner = GeminiPlanner::new(
        config.gemini.api_key.clone(),
        config.gemini.model.clone(),
        agent_loop::system_prompt(&runner),
    );
    let dispatcher = Dispatcher::new(sandbox, runner, config.sandbox.max_file_chars);
    let agent = AgentLoop::new(planner, dispatcher, config.runtime.max_iterations).verbose(args.verbose);

    if args.verbose {
        println!("User prompt: {}", args.prompt);
    }

    match agent.run_prompt(&args.prompt).await? {
        LoopOutcome::Completed { text, iterations } => {
            if args.verbose {
                println!("Finished after {} round-trip(s).", iterations);
            }
            println!("Final response:");
            println!("{}", text);
            Ok(())
        }
        LoopOutcome::BudgetExhausted { iterations } => {
            println!("Reached max iterations ({}).", iterations);
            std::process::exit(2);
        }
    }
}
