use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use redlimit::clock::{Clock, SystemClock};
use redlimit::config::RedlimitConfig;
use redlimit::ratelimit::{
    KeyGeneratorRegistry, LimiterRegistry, LimiterType, RateLimitInterceptor, RequestContext,
};

#[derive(Debug, Parser)]
#[command(name = "redlimit", version, about = "Distributed rate limiting engine")]
struct Cli {
    /// YAML configuration file, overlaid with REDLIMIT__* environment variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run requests through the interceptor and print each verdict
    Check {
        /// Handler the request is routed to, as `Controller::method`
        #[arg(long)]
        handler: String,
        /// Request path
        #[arg(long)]
        path: String,
        /// Request method
        #[arg(long, default_value = "GET")]
        method: String,
        /// Peer address of the caller
        #[arg(long)]
        ip: Option<IpAddr>,
        /// Request header as `name=value`, may be repeated
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        /// Number of requests to send
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Print the remaining lifetime of a counter record
    Inspect {
        #[arg(long)]
        limiter: LimiterType,
        /// Quota key, as printed by `check`
        #[arg(long)]
        key: String,
    },
    /// Delete a counter record, restoring the full quota
    Reset {
        #[arg(long)]
        limiter: LimiterType,
        /// Quota key, as printed by `check`
        #[arg(long)]
        key: String,
    },
    /// Validate the configuration and connect to the store
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = RedlimitConfig::load(cli.config.as_deref()).context("loading configuration")?;
    info!(backend = ?config.store.backend, failure_mode = ?config.failure_mode, "Configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    match cli.command {
        Command::Check {
            handler,
            path,
            method,
            ip,
            headers,
            count,
        } => {
            let interceptor = config
                .build_interceptor(clock, KeyGeneratorRegistry::new())
                .await?;

            let mut request = RequestContext::new(method, path)
                .with_handler(config.policies.handler_meta(&handler));
            for (name, value) in headers {
                request = request.with_header(&name, value);
            }
            if let Some(ip) = ip {
                request = request.with_remote_addr(ip);
            }

            tokio::select! {
                result = run_checks(&interceptor, &request, count) => result?,
                _ = shutdown_signal() => {}
            }
        }
        Command::Inspect { limiter, key } => {
            let limiter = limiters(&config, clock).await?.get_by_limiter_type(limiter)?;
            match limiter.ttl(&key).await? {
                Some(ttl) => println!("{} expires in {} ms", key, ttl.as_millis()),
                None => println!("{} has no counter record", key),
            }
        }
        Command::Reset { limiter, key } => {
            let limiter = limiters(&config, clock).await?.get_by_limiter_type(limiter)?;
            if limiter.reset(&key).await? {
                println!("{} reset", key);
            } else {
                println!("{} has no counter record", key);
            }
        }
        Command::Validate => {
            let interceptor = config
                .build_interceptor(clock, KeyGeneratorRegistry::new())
                .await?;
            println!(
                "Configuration OK: {} policies, limiters {:?}",
                config.policies.iter().count(),
                interceptor.limiters().supported_types()
            );
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}

async fn limiters(config: &RedlimitConfig, clock: Arc<dyn Clock>) -> anyhow::Result<LimiterRegistry> {
    let store = config.connect_store(clock.clone()).await?;
    Ok(LimiterRegistry::with_store(store, clock, &config.store.key_prefix))
}

async fn run_checks(
    interceptor: &RateLimitInterceptor,
    request: &RequestContext,
    count: u32,
) -> anyhow::Result<()> {
    for attempt in 1..=count {
        match interceptor.pre_handle(request).await {
            Ok(verdict) => println!("{} {}", attempt, serde_json::to_string(&verdict)?),
            Err(err) if err.is_quota_exceeded() => println!(
                "{} {}",
                attempt,
                serde_json::json!({
                    "verdict": "rejected",
                    "status": err.http_status(),
                    "error": err.to_string(),
                })
            ),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
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
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
