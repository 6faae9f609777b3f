//! The ironloop binary.
//!
//! Single-task mode (`--task`) runs one task through the verified outer
//! loop and prints the result to stdout. Without `--task`, an
//! interactive line-based session starts with slash commands.
//!
//! Exit codes: 0 success, 1 cancelled, 2 usage error, 3 unrecoverable
//! runtime error.

use std::sync::Arc;

use clap::Parser;
use ironloop_agent::{
    ExploreContextTool, LlmVerifier, ParallelExecuteTool, ReactLoop, RuntimeController,
    SubAgentConfig, SubAgentSpawner, ToolExecutor,
};
use ironloop_config::RuntimeSettings;
use ironloop_core::{FatalError, Provider};
use ironloop_memory::{MemoryConfig, MemoryManager, SessionStore};
use ironloop_providers::{OpenAiCompatProvider, RetryPolicy, RetryProvider};
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod interactive;

#[derive(Parser)]
#[command(
    name = "ironloop",
    about = "ironloop — an autonomous agent runtime",
    version
)]
struct Cli {
    /// Run a single task and exit, printing the result to stdout
    #[arg(short = 't', long)]
    task: Option<String>,

    /// Override the active model for this run
    #[arg(long)]
    model: Option<String>,

    /// Resume a saved session by UUID prefix, or "latest"
    #[arg(long, num_args = 0..=1, default_missing_value = "latest")]
    resume: Option<String>,

    /// Verbose logs (debug level, plus a file log in the logs directory)
    #[arg(long)]
    verbose: bool,

    /// Reasoning-effort hint passed to the model (low, medium, high)
    #[arg(long)]
    reasoning_effort: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            std::process::exit(3);
        }
    };

    let code = runtime.block_on(run(cli));
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    // Keep the non-blocking file writer alive for the whole run.
    let _log_guard = init_tracing(cli.verbose);

    let settings = match RuntimeSettings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return 2;
        }
    };

    let model = cli.model.clone().unwrap_or_else(|| settings.model.clone());
    let cancel = CancellationToken::new();

    let controller = match build_controller(
        &settings,
        &model,
        cli.resume.as_deref(),
        cli.reasoning_effort.clone(),
        cancel.clone(),
    )
    .await
    {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            eprintln!("Resume failed: {e}");
            return 2;
        }
    };

    // The controller in charge of the current task; interactive mode
    // swaps it on /resume and /model.
    let current = Arc::new(std::sync::RwLock::new(controller));

    // A keyboard interrupt trips the task token; all awaiters unwind.
    {
        let current = current.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let controller = current.read().unwrap().clone();
                controller.cancel();
            }
        });
    }

    match cli.task {
        Some(task) => {
            let controller = current.read().unwrap().clone();
            match controller.run_task(&task, true).await {
                Ok(result) => {
                    println!("{result}");
                    0
                }
                Err(FatalError::Cancelled) => {
                    eprintln!("Task cancelled.");
                    1
                }
                Err(fatal) => {
                    error!(error = %fatal, "Task failed");
                    eprintln!("Task failed: {fatal}");
                    3
                }
            }
        }
        None => interactive::run(current, &settings, &model, cli.reasoning_effort).await,
    }
}

/// Why a controller could not be assembled.
#[derive(Debug)]
pub(crate) enum BuildError {
    Resume(String),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Resume(msg) => write!(f, "{msg}"),
        }
    }
}

pub(crate) async fn build_controller(
    settings: &RuntimeSettings,
    model: &str,
    resume: Option<&str>,
    reasoning_effort: Option<String>,
    cancel: CancellationToken,
) -> Result<RuntimeController, BuildError> {
    let base = OpenAiCompatProvider::new(
        "openai_compat",
        &settings.api_base,
        settings.api_key.clone().unwrap_or_default(),
    );
    let provider: Arc<dyn Provider> = Arc::new(RetryProvider::new(
        Arc::new(base),
        RetryPolicy {
            max_attempts: settings.retry_max_attempts,
            initial_delay: settings.retry_initial_delay,
            max_delay: settings.retry_max_delay,
        },
        cancel.clone(),
    ));

    let memory_config = MemoryConfig {
        enabled: settings.memory_enabled,
        compression_threshold: settings.memory_compression_threshold,
        short_term_size: settings.memory_short_term_size,
        short_term_min_size: settings.memory_short_term_min_size,
        compression_ratio: settings.memory_compression_ratio,
    };
    let store = SessionStore::new(RuntimeSettings::sessions_dir());

    let memory = match resume {
        Some(reference) => MemoryManager::from_session(
            reference,
            provider.clone(),
            model,
            store,
            memory_config,
        )
        .await
        .map_err(|e| BuildError::Resume(e.to_string()))?,
        None => MemoryManager::new(provider.clone(), model, store, memory_config),
    };

    let spawner = SubAgentSpawner::new(
        provider.clone(),
        model,
        SubAgentConfig {
            tool_timeout: settings.tool_timeout,
            ..SubAgentConfig::default()
        },
    );
    let mut registry = ironloop_tools::default_registry();
    registry.register(Arc::new(ExploreContextTool::new(spawner.clone(), 0)));
    registry.register(Arc::new(ParallelExecuteTool::new(spawner.clone(), 0)));
    let registry = Arc::new(registry);
    spawner.set_registry(registry.clone());

    let executor = Arc::new(ToolExecutor::new(registry, settings.tool_timeout));
    let react = ReactLoop::new(provider.clone(), model, executor)
        .with_max_iterations(settings.max_iterations)
        .with_reasoning_effort(reasoning_effort);

    let verifier = Arc::new(LlmVerifier::new(provider, model));

    Ok(RuntimeController::new(Arc::new(memory), react)
        .with_verifier(verifier, settings.ralph_loop_max_iterations)
        .with_cancel_token(cancel))
}

fn init_tracing(verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if verbose {
        let logs_dir = RuntimeSettings::logs_dir();
        let _ = std::fs::create_dir_all(&logs_dir);
        let appender = tracing_appender::rolling::daily(logs_dir, "ironloop.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        None
    }
}
