//! Conflux CLI - run one-shot prompts against a configured provider pool

use clap::{Parser, Subcommand};
use colored::Colorize;
use conflux::{CancellationToken, PoolConfig, ProviderPool, UsageAccountant};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "conflux", about = "Resilient multi-backend chat dispatch", version)]
struct Cli {
    /// Pool configuration file (TOML/YAML/JSON)
    #[arg(short, long, env = "CONFLUX_CONFIG", default_value = "conflux.toml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one prompt and print the answer
    Ask {
        prompt: String,
        /// Also print extracted reasoning
        #[arg(long)]
        reasoning: bool,
    },
    /// Stream one prompt, reasoning dimmed as it arrives
    Stream { prompt: String },
    /// Show pathway health and session metrics
    Providers,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("warn").init();
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PoolConfig::from_file(&cli.config)?;
    let aggregate = Arc::new(UsageAccountant::aggregate());
    let pool = ProviderPool::from_config(&config, aggregate.clone())?;
    let cancel = CancellationToken::new();

    // ctrl-c becomes a caller cancellation: no retries, no health penalty
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_cancel.cancel();
        }
    });

    match cli.command {
        Commands::Ask { prompt, reasoning } => {
            let response = pool.generate(&prompt, &cancel).await?;
            if reasoning {
                if let Some(r) = &response.reasoning {
                    println!("{}", r.dimmed());
                    println!();
                }
            }
            println!("{}", response.content);
            eprintln!(
                "{}",
                format!(
                    "[{} | {} | {}ms]",
                    response.pathway,
                    response.model,
                    response.latency.as_millis()
                )
                .dimmed()
            );
        }
        Commands::Stream { prompt } => {
            let mut stream = pool.stream(&prompt, &cancel).await?;
            while let Some(item) = stream.next().await {
                let fragment = item?;
                if fragment.is_reasoning {
                    print!("{}", fragment.text.dimmed());
                } else {
                    print!("{}", fragment.text);
                }
                use std::io::Write;
                std::io::stdout().flush().ok();
            }
            println!();
        }
        Commands::Providers => {
            println!("{}", "pathways".bold());
            for snap in pool.snapshots() {
                let state = match snap.circuit {
                    conflux::CircuitState::Closed => "closed".green(),
                    conflux::CircuitState::Open => "open".red(),
                    conflux::CircuitState::HalfOpen => "half-open".yellow(),
                };
                let avg = snap
                    .avg_latency
                    .map(|d| format!("{}ms", d.as_millis()))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<16} {:<10} weight {:.2}  ok {:<5} err {:<5} avg {}",
                    snap.name.bold(),
                    state,
                    snap.weight,
                    snap.successes,
                    snap.failures,
                    avg
                );
            }
            let totals = aggregate.session_metrics();
            println!();
            println!("{}", "session".bold());
            println!(
                "  requests {}  tokens {}/{}  cost ${}  avg latency {}ms",
                totals.total_requests,
                totals.total_input_tokens,
                totals.total_output_tokens,
                totals.total_cost,
                totals.average_latency.as_millis()
            );
        }
    }

    Ok(())
}
