use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use ratewarden::config::RatewardenConfig;
use ratewarden::params::StaticParameters;
use ratewarden::ratelimit::{self, Algorithm, RateLimiter};
use ratewarden::store::{CounterStore, MemoryStore};
use ratewarden::{telemetry, Context};

/// Exercise the rate limiters against an in-memory store.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run only this algorithm (default: all of them)
    #[arg(short, long, value_enum)]
    algorithm: Option<Algorithm>,

    /// Requests to issue per algorithm
    #[arg(short = 'n', long, default_value_t = 10)]
    requests: u32,

    /// Pause between requests, in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    delay_ms: u64,

    /// Print one JSON object per decision
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct DecisionRecord<'a> {
    algorithm: Algorithm,
    key: &'a str,
    request: u32,
    allowed: bool,
    current: u64,
    remaining: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RatewardenConfig::load(cli.config.as_deref())?;

    telemetry::init_tracing(&config.logging);

    info!("Starting ratewarden demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = &config.limiter;
    info!(
        max_requests = settings.max_requests,
        interval_ms = settings.interval_ms,
        burst_limit = settings.burst_limit,
        "Configuration loaded"
    );

    let store = MemoryStore::with_janitor(settings.interval());
    let params = Arc::new(StaticParameters::from_settings(settings));

    let algorithms = match cli.algorithm {
        Some(algorithm) => vec![algorithm],
        None => Algorithm::ALL.to_vec(),
    };

    // Built up front so the signal path can stop them too.
    let mut limiters = Vec::with_capacity(algorithms.len());
    for algorithm in algorithms {
        let counters: Arc<dyn CounterStore> = store.clone();
        limiters.push(ratelimit::build(algorithm, counters, params.clone()).await?);
    }

    let outcome = tokio::select! {
        result = run(&cli, &limiters) => result,
        _ = shutdown_signal() => Ok(()),
    };

    for limiter in &limiters {
        limiter.stop().await;
    }
    store.stop_janitor();

    info!("Ratewarden demo stopped");
    outcome
}

async fn run(cli: &Cli, limiters: &[Arc<dyn RateLimiter>]) -> anyhow::Result<()> {
    let ctx = Context::background();

    for limiter in limiters {
        let algorithm = limiter.algorithm();
        let key = format!("{}_key", algorithm);

        if !cli.json {
            println!("Testing {}:", algorithm);
        }

        for request in 1..=cli.requests {
            let allowed = limiter.admit(&ctx, &key).await;
            report(cli, limiter.as_ref(), &ctx, &key, request, allowed).await?;
            tokio::time::sleep(Duration::from_millis(cli.delay_ms)).await;
        }

        limiter.stop().await;
    }

    Ok(())
}

async fn report(
    cli: &Cli,
    limiter: &dyn RateLimiter,
    ctx: &Context,
    key: &str,
    request: u32,
    allowed: bool,
) -> anyhow::Result<()> {
    if cli.json {
        let quota = limiter.quota(ctx, key).await?;
        let record = DecisionRecord {
            algorithm: limiter.algorithm(),
            key,
            request,
            allowed,
            current: quota.current,
            remaining: quota.remaining(),
        };
        println!("{}", serde_json::to_string(&record)?);
    } else if allowed {
        println!("Request allowed");
    } else {
        println!("Request denied");
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping demo");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping demo");
        }
    }
}
