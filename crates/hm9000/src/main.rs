//! hm9000 — reconciliation daemon CLI.
//!
//! Eight subcommands, each wrapped by distributed-lock acquisition before
//! running its loop body. `--poll <secs>` turns any subcommand into a
//! daemon that loops with that period until renewal fails for the full
//! lock grace window, at which point the process exits with code 17.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use clap::{Parser, Subcommand};
use hm9000::config::HmConfig;
use hm9000::error::HmError;
use hm9000::{unix_now, AppContext};
use hm9000_bus::NatsBus;
use hm9000_metrics::MetricsExporter;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hm9000")]
#[command(about = "HM9000 reconciliation daemon")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/hm9000/config.json", global = true)]
    config: PathBuf,

    /// Re-run the subcommand every N seconds instead of running it once
    #[arg(long, global = true)]
    poll: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the cloud controller's bulk API and diff-sync desired state
    FetchDesired,
    /// Subscribe to the message bus and persist incoming heartbeats
    Listen,
    /// Run one analyzer pass over the fused desired/actual picture
    Analyze,
    /// Dispatch due pending start/stop messages to the message bus
    Send,
    /// Sweep orphaned pending/crash-count entries
    Shred,
    /// Serve a minimal JSON status endpoint
    ServeApi,
    /// Serve a Prometheus metrics endpoint
    ServeMetrics,
    /// Emit immediate starts for evacuating instances
    Evacuator,
    /// Write a default config file
    InitConfig {
        #[arg(short, long, default_value = "/etc/hm9000/config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("hm9000=info".parse()?))
        .init();

    if let Commands::InitConfig { output } = &cli.command {
        return init_config(output.clone());
    }

    let config = HmConfig::load(&cli.config).unwrap_or_else(|e| {
        warn!(error = %e, path = %cli.config.display(), "falling back to default config");
        HmConfig::default()
    });
    let ctx = AppContext::new(config);

    match cli.command {
        Commands::FetchDesired => run_fetch(&ctx, cli.poll).await,
        Commands::Analyze => run_component(&ctx, "analyzer", cli.poll, |ctx| async move { hm9000::run_analyze(ctx).await.map(|_| ()) }).await,
        Commands::Shred => run_component(&ctx, "shred", cli.poll, |ctx| async move { hm9000::run_shred(ctx).await.map(|_| ()) }).await,
        Commands::Evacuator => run_component(&ctx, "evacuator", cli.poll, |ctx| async move { hm9000::run_evacuator(ctx).await.map(|_| ()) }).await,
        Commands::Send => run_send(&ctx, cli.poll).await,
        Commands::Listen => run_listen(&ctx).await,
        Commands::ServeApi => serve_api(ctx).await,
        Commands::ServeMetrics => serve_metrics(ctx).await,
        Commands::InitConfig { .. } => unreachable!("handled above"),
    }
}

// ─── InitConfig ───────────────────────────────────────────────────────────────

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    let config = HmConfig::default();
    config.save(&output)?;
    println!("Config written to {}", output.display());
    println!();
    println!("Edit the file to add cloud controller and NATS settings, then run:");
    println!("  hm9000 --config {} analyze", output.display());
    Ok(())
}

// ─── Generic lock-wrapped dispatch ───────────────────────────────────────────

/// Runs `body` under the named distributed lock. With `poll`, loops with
/// that period, treating a failed pass as retryable; a lock lost for the
/// full grace window exits the process with code 17. Without `poll`, runs
/// once and propagates any error.
async fn run_component<F, Fut>(ctx: &AppContext, component: &str, poll: Option<u64>, mut body: F) -> anyhow::Result<()>
where
    F: FnMut(&AppContext) -> Fut,
    Fut: Future<Output = hm9000::HmResult<()>>,
{
    let holder_id = Uuid::new_v4().to_string();
    let lock = ctx.lock(component, &holder_id);

    match poll {
        None => {
            let now = unix_now();
            if !lock.acquire(now) {
                anyhow::bail!("could not acquire '{component}' lock — another instance is reconciling");
            }
            let result = body(ctx).await;
            lock.release();
            result.map_err(anyhow::Error::from)
        }
        Some(secs) => {
            let mut first_failure_at: Option<i64> = None;
            loop {
                let now = unix_now();
                let held = if first_failure_at.is_none() { lock.acquire(now) } else { lock.renew(now) };

                if held {
                    first_failure_at = None;
                    if let Err(e) = body(ctx).await {
                        warn!(component, error = %e, "pass failed, will retry next tick");
                    }
                } else {
                    let since = *first_failure_at.get_or_insert(now);
                    ctx.metrics.record_lock_loss();
                    if now - since >= ctx.config.lock_grace_window_secs {
                        error!(component, "lock lost for the full grace window, exiting");
                        std::process::exit(17);
                    }
                    warn!(component, "lock not held this tick, retrying");
                }

                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
        }
    }
}

// ─── fetch_desired / send (need a bus connection shared across ticks) ───────

async fn run_fetch(ctx: &AppContext, poll: Option<u64>) -> anyhow::Result<()> {
    let bus = NatsBus::connect(&ctx.config.nats_url).await.map_err(HmError::from)?;
    run_component(ctx, "fetcher", poll, |ctx| {
        let bus = &bus;
        async move { hm9000::run_fetch(ctx, bus).await.map(|_| ()) }
    })
    .await
}

async fn run_send(ctx: &AppContext, poll: Option<u64>) -> anyhow::Result<()> {
    let bus = NatsBus::connect(&ctx.config.nats_url).await.map_err(HmError::from)?;
    run_component(ctx, "sender", poll, |ctx| {
        let bus = &bus;
        async move { hm9000::run_send(ctx, bus).await.map(|_| ()) }
    })
    .await
}

// ─── listen (long-running; renews the lock on its own interval) ─────────────

async fn run_listen(ctx: &AppContext) -> anyhow::Result<()> {
    let holder_id = Uuid::new_v4().to_string();
    let lock = ctx.lock("listener", &holder_id);
    let now = unix_now();
    if !lock.acquire(now) {
        anyhow::bail!("could not acquire 'listener' lock — another instance is listening");
    }

    let bus = NatsBus::connect(&ctx.config.nats_url).await.map_err(HmError::from)?;
    info!(url = %ctx.config.nats_url, "connected to message bus");

    let mut renew_ticker = tokio::time::interval(Duration::from_secs(ctx.config.lock_renew_interval_secs.max(1) as u64));
    let mut first_failure_at: Option<i64> = None;

    let listen_fut = hm9000::run_listen(ctx, &bus);
    tokio::pin!(listen_fut);

    loop {
        tokio::select! {
            result = &mut listen_fut => {
                lock.release();
                return result.map_err(anyhow::Error::from);
            }
            _ = renew_ticker.tick() => {
                let now = unix_now();
                let held = if first_failure_at.is_none() { lock.acquire(now) } else { lock.renew(now) };
                if held {
                    first_failure_at = None;
                } else {
                    let since = *first_failure_at.get_or_insert(now);
                    ctx.metrics.record_lock_loss();
                    if now - since >= ctx.config.lock_grace_window_secs {
                        error!("listener lock lost for the full grace window, exiting");
                        std::process::exit(17);
                    }
                    warn!("listener lock not held this tick, retrying");
                }
            }
        }
    }
}

// ─── serve_api / serve_metrics ────────────────────────────────────────────────

async fn serve_api(ctx: AppContext) -> anyhow::Result<()> {
    let addr = ctx.config.api_bind_addr.clone();
    let state = Arc::new(ctx);
    let app = Router::new().route("/status", get(status_handler)).with_state(state);

    info!(%addr, "serving status API");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn status_handler(State(ctx): State<Arc<AppContext>>) -> axum::Json<hm9000::StatusSnapshot> {
    match hm9000::status_snapshot(&ctx) {
        Ok(snapshot) => axum::Json(snapshot),
        Err(e) => {
            warn!(error = %e, "failed to build status snapshot");
            axum::Json(hm9000::StatusSnapshot {
                desired_fresh: false,
                actual_fresh: false,
                combined_fresh: false,
                desired_app_count: 0,
                pending_starts: 0,
                pending_stops: 0,
            })
        }
    }
}

async fn serve_metrics(ctx: AppContext) -> anyhow::Result<()> {
    let addr = ctx.config.metrics_bind_addr.clone();
    let metrics = ctx.metrics.clone();
    let app = Router::new().route("/metrics", get(move || render_metrics(metrics.clone())));

    info!(%addr, "serving metrics");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn render_metrics(metrics: Arc<hm9000_metrics::ReconcileMetrics>) -> String {
    MetricsExporter::new(metrics).render()
}
