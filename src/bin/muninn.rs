//! muninn: command-line front end for the completion pipeline.
//!
//! Runs completions against the configured backend through the same
//! cache, rate limiter and request lock the editor integration uses.
//! Ctrl-C cancels an in-flight completion.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use muninn::{CompletionCoordinator, Config, MuninnError, cancel_pair};

/// Muninn completion pipeline CLI
#[derive(Parser)]
#[command(name = "muninn")]
#[command(version = muninn::PKG_VERSION)]
#[command(about = "Streaming completion pipeline for editor inline suggestions")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "MUNINN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Complete a prompt
    Complete {
        /// Prompt text (or omit to read from stdin)
        prompt: Option<String>,
        /// Model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,
        /// Sampling temperature instead of the configured one
        #[arg(short, long)]
        temperature: Option<f32>,
        /// Run the same request this many times (later runs hit the cache)
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Print cache and rate limiter statistics afterwards
        #[arg(long)]
        stats: bool,
    },

    /// Print the resolved configuration
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Config => {
            println!("{config:#?}");
        }
        Command::Complete {
            prompt,
            model,
            temperature,
            repeat,
            stats,
        } => {
            let prompt = match prompt {
                Some(p) => p,
                None => read_stdin()?,
            };

            let mut request = config.inference.completion_request(prompt);
            if let Some(model) = model {
                request.model = model;
            }
            if let Some(temperature) = temperature {
                request = request.temperature(temperature);
            }

            info!(
                version = muninn::version_string(),
                endpoint = %config.inference.endpoint,
                model = %request.model,
                "muninn starting"
            );

            let coordinator = CompletionCoordinator::from_config(&config)?;
            let _sweeper = coordinator.cache().spawn_sweeper();

            let (handle, cancel) = cancel_pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.cancel();
                }
            });

            for _ in 0..repeat.max(1) {
                match coordinator.complete_debounced(&request, &cancel).await {
                    Ok(completion) => println!("{completion}"),
                    Err(e @ MuninnError::Cancelled) => {
                        eprintln!("{}: {e}", e.kind());
                        break;
                    }
                    Err(e) => return Err(format!("{}: {e}", e.kind()).into()),
                }
            }

            if stats {
                eprintln!("{:#?}", coordinator.cache_stats());
                eprintln!("{:#?}", coordinator.rate_limit_stats());
            }
        }
    }

    Ok(())
}

fn read_stdin() -> Result<String, Box<dyn std::error::Error>> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Err("no prompt given; pass one as an argument or pipe it on stdin".into());
    }
    let mut buf = String::new();
    stdin.read_to_string(&mut buf)?;
    Ok(buf)
}
