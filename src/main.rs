//! modelroute - Task-based LLM routing with ordered fallback
//!
//! Command-line front end: validate a configuration, inspect the model
//! pool, route a prompt, and read back the call log.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modelroute::adapter::secret::EnvSecretResolver;
use modelroute::storage::{self, CallLog};
use modelroute::{Config, HttpInvoker, Message, Mode, RouteRequest, Router};

#[derive(Parser)]
#[command(name = "modelroute")]
#[command(about = "Task-based LLM routing with ordered fallback")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "modelroute.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Check,

    /// Show the model pool, or the candidate order for one task
    Models {
        /// Task category to show candidates for
        #[arg(short, long)]
        task: Option<String>,

        /// Mode to filter by (cloud or local)
        #[arg(short, long)]
        mode: Option<Mode>,
    },

    /// Route one prompt and print the answer
    Ask {
        /// The user prompt
        prompt: String,

        /// Task category
        #[arg(short, long, default_value = "general")]
        task: String,

        /// Override the configured default mode
        #[arg(short, long)]
        mode: Option<Mode>,

        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,

        /// Print fragments as they arrive
        #[arg(long)]
        stream: bool,

        /// Do not write this call to the call log
        #[arg(long)]
        no_log: bool,
    },

    /// Show recently logged calls
    History {
        /// Number of calls to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Only show calls for this task
        #[arg(short, long)]
        task: Option<String>,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("modelroute={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            tracing::error!(config = %cli.config, error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };
    init_tracing(&config.logging.level);
    tracing::debug!(config = %cli.config, "Loaded configuration");

    match cli.command {
        Commands::Check => check(config),
        Commands::Models { task, mode } => models(config, task, mode),
        Commands::Ask {
            prompt,
            task,
            mode,
            system,
            stream,
            no_log,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(prompt));
            let request = RouteRequest {
                messages,
                task,
                mode,
                timeout: None,
            };
            ask(config, request, stream, !no_log).await
        }
        Commands::History { limit, task } => history(config, limit, task).await,
    }
}

fn check(config: Config) -> anyhow::Result<()> {
    let (pool, policy, mapping) = config.into_parts()?;

    let enabled = pool.models().iter().filter(|m| m.enabled).count();
    println!("Configuration OK");
    println!("  models: {} ({} enabled)", pool.len(), enabled);
    println!("  default mode: {}", policy.default_mode);
    println!(
        "  retry on failure: {}, max attempts: {}, attempt timeout: {}s",
        policy.retry_on_failure, policy.max_total_attempts, policy.attempt_timeout_secs
    );
    println!("  defaults:");
    for (task, mode, model) in mapping.entries() {
        println!("    {} [{}] -> {}", task, mode, model);
    }
    Ok(())
}

fn models(config: Config, task: Option<String>, mode: Option<Mode>) -> anyhow::Result<()> {
    let (pool, policy, _) = config.into_parts()?;

    match task {
        Some(task) => {
            let mode = mode.unwrap_or(policy.default_mode);
            println!("Candidates for '{}' in {} mode:", task, mode);
            for (i, model) in pool.find_by_task_and_mode(&task, mode).iter().enumerate() {
                println!(
                    "  {}. {} ({} {}, priority {})",
                    i + 1,
                    model.name,
                    model.provider,
                    model.backend_model,
                    model.priority
                );
            }
        }
        None => {
            println!(
                "{:<20} {:<6} {:<8} {:<24} {:>8}  {}",
                "NAME", "MODE", "PROVIDER", "BACKEND", "PRIORITY", "TAGS"
            );
            for model in pool
                .models()
                .iter()
                .filter(|m| mode.map_or(true, |mode| m.mode == mode))
            {
                let name = if model.enabled {
                    model.name.clone()
                } else {
                    format!("{} (off)", model.name)
                };
                println!(
                    "{:<20} {:<6} {:<8} {:<24} {:>8}  {}",
                    name,
                    model.mode,
                    model.provider,
                    model.backend_model,
                    model.priority,
                    model.tags.join(",")
                );
            }
        }
    }
    Ok(())
}

async fn ask(config: Config, request: RouteRequest, stream: bool, log: bool) -> anyhow::Result<()> {
    let db = match config.call_log_path() {
        Some(path) if config.logging.log_calls && log => Some(storage::init_pool(path).await?),
        _ => None,
    };

    let (pool, policy, mapping) = config.into_parts()?;
    let invoker = HttpInvoker::new(Arc::new(EnvSecretResolver::new()))?
        .with_provider_retries(policy.provider_retries);
    let task = request.task.clone();
    let mode = request.mode.unwrap_or(policy.default_mode);
    let router = Router::new(Arc::new(pool), policy, mapping, Arc::new(invoker))?;

    let start = Instant::now();
    let elapsed_ms = || start.elapsed().as_millis() as i64;
    let (outcome, entry) = if stream {
        match router.get_response_stream(request).await {
            Ok(mut fragments) => {
                let mut stdout = std::io::stdout();
                let mut failure = None;
                while let Some(item) = fragments.next().await {
                    match item {
                        Ok(fragment) => {
                            print!("{}", fragment);
                            stdout.flush()?;
                        }
                        Err(e) => failure = Some(e),
                    }
                }
                println!();
                let latency_ms = elapsed_ms();
                match failure {
                    Some(e) => {
                        let entry = CallLog::interrupted(&task, mode, &fragments, &e, latency_ms);
                        (Err(e), entry)
                    }
                    None => {
                        eprintln!("[served by {}]", fragments.model_name());
                        let entry = CallLog::streamed(&task, mode, &fragments, latency_ms);
                        (Ok(()), entry)
                    }
                }
            }
            Err(e) => {
                let entry = CallLog::failed(&task, mode, &e, true, elapsed_ms());
                (Err(e), entry)
            }
        }
    } else {
        match router.get_response(request).await {
            Ok(response) => {
                println!("{}", response.content);
                eprintln!(
                    "[served by {} after trying {}]",
                    response.model_name,
                    response.tried.join(", ")
                );
                let entry = CallLog::served(&task, mode, &response, elapsed_ms());
                (Ok(()), entry)
            }
            Err(e) => {
                let entry = CallLog::failed(&task, mode, &e, false, elapsed_ms());
                (Err(e), entry)
            }
        }
    };

    if let Some(db) = &db {
        // Wait for the write; the process exits right after.
        if let Err(e) = storage::spawn_log_write(db, entry).await {
            tracing::warn!(error = %e, "Call log write task failed");
        }
    }

    outcome.map_err(Into::into)
}

async fn history(config: Config, limit: u32, task: Option<String>) -> anyhow::Result<()> {
    let Some(path) = config.call_log_path() else {
        println!("Call log disabled: no [database] section in config.");
        return Ok(());
    };
    let pool = storage::init_pool(path).await?;
    let rows = storage::recent_calls(&pool, limit, task.as_deref()).await?;

    if rows.is_empty() {
        println!("No calls logged.");
        return Ok(());
    }

    for row in rows {
        let status = if row.success {
            "ok".to_string()
        } else {
            row.error_kind.clone().unwrap_or_else(|| "failed".to_string())
        };
        println!(
            "{}  {:<10} {:<5} {:<20} {:>6}ms  {:<18} tried: {}",
            row.timestamp,
            row.task,
            row.mode,
            row.model.as_deref().unwrap_or("-"),
            row.latency_ms,
            status,
            row.tried_models().join(" -> ")
        );
    }
    Ok(())
}
