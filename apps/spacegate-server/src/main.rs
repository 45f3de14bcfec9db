//! Spacegate Server - admission gateway for the coworking booking API.
//!
//! Every request passes the admission pipeline (HTTPS redirect, CORS
//! preflight, rate limiting, origin checks, credential verification and
//! group membership) before it reaches a route handler.
//!
//! # Usage
//!
//! ```text
//! TELEGRAM_BOT_TOKEN=... BOT_API_TOKEN=... spacegate-server
//! ```
//!
//! See [`GatewayConfig::from_env`] for the full list of environment variables.
//! `RUST_LOG` overrides `LOG_LEVEL` when set.

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use spacegate_core::GatewayConfig;
use spacegate_http::rate_limit::DEFAULT_IDLE_SWEEP_INTERVAL;
use spacegate_http::{
    AdmissionConfig, AdmissionPipeline, GatewayHttpService, InMemoryUserDirectory,
    MembershipCache, MembershipChecker, PeriodicSweep, RateLimiter, TelegramMembershipClient,
    UserDirectory,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::routes::SpaceRoutes;

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The assembled gateway: the HTTP service plus the shared state the
/// background sweeps operate on.
struct Gateway {
    service: GatewayHttpService<SpaceRoutes>,
    cache: Arc<MembershipCache>,
    limiter: Arc<RateLimiter>,
}

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise the configured `LOG_LEVEL`. Production
/// deployments log JSON lines for the log collector; development logs
/// human-readable text.
fn init_tracing(config: &GatewayConfig) -> Result<()> {
    let log_level = config.log_level.as_str();
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.environment.is_production() {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

/// Wire the admission pipeline and routes over the given collaborators.
fn build_gateway(
    config: &GatewayConfig,
    membership: Arc<dyn MembershipChecker>,
    directory: Arc<dyn UserDirectory>,
) -> Gateway {
    let cache = Arc::new(MembershipCache::new());
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_requests,
        Duration::from_secs(config.rate_limit_window_secs),
    ));
    let pipeline = AdmissionPipeline::new(
        AdmissionConfig::from_gateway(config),
        Arc::clone(&cache),
        Arc::clone(&limiter),
        membership,
        Arc::clone(&directory),
    );
    let routes = SpaceRoutes::new(directory);

    Gateway {
        service: GatewayHttpService::new(Arc::new(pipeline), Arc::new(routes)),
        cache,
        limiter,
    }
}

/// Start the membership-cache and idle-client sweeps.
fn spawn_sweeps(gateway: &Gateway, config: &GatewayConfig) -> Vec<PeriodicSweep> {
    let cache = Arc::clone(&gateway.cache);
    let limiter = Arc::clone(&gateway.limiter);

    vec![
        PeriodicSweep::spawn(
            "membership-cache",
            Duration::from_secs(config.membership_sweep_secs),
            move || {
                let removed = cache.sweep_expired();
                info!(removed, remaining = cache.len(), "swept membership cache");
            },
        ),
        PeriodicSweep::spawn("rate-limit-idle", DEFAULT_IDLE_SWEEP_INTERVAL, move || {
            let removed = limiter.sweep_idle();
            info!(removed, tracked = limiter.tracked_clients(), "swept idle rate-limit clients");
        }),
    ]
}

/// Resolve once the process receives Ctrl-C.
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal, draining connections");
}

/// Accept connections until `shutdown` resolves, then drain them.
///
/// Each connection gets its own service clone bound to the peer address, which
/// the pipeline uses as the rate-limit key.
async fn serve<F>(
    listener: TcpListener,
    service: GatewayHttpService<SpaceRoutes>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                debug!(peer_addr = %peer_addr, "accepted connection");

                let conn = http.serve_connection(TokioIo::new(stream), service.with_peer(peer_addr));
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("all connections drained");

    Ok(())
}

/// Request `GET /health` from a running gateway and check its answer.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET /health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    check_health_response(&response).with_context(|| format!("unhealthy response from {addr}"))
}

/// Accept only a `200` whose JSON body reports this service as `ok`.
///
/// A `429` here means the probe itself was rate limited, which is reported
/// as unhealthy like any other status.
fn check_health_response(response: &str) -> Result<()> {
    let (head, body) = response
        .split_once("\r\n\r\n")
        .context("truncated HTTP response")?;
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .context("missing status line")?;
    if status != "200" {
        anyhow::bail!("health endpoint answered {status}");
    }

    let health: serde_json::Value =
        serde_json::from_str(body.trim()).context("health body is not JSON")?;
    if health["status"] != "ok" || health["service"] != "spacegate" {
        anyhow::bail!("unexpected health payload: {health}");
    }
    Ok(())
}

/// Read the gateway listen address from the environment.
fn gateway_listen_addr() -> String {
    std::env::var("GATEWAY_LISTEN")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| GatewayConfig::default().gateway_listen)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --health-check flag for Docker HEALTHCHECK.
    if std::env::args().any(|a| a == "--health-check") {
        let addr = gateway_listen_addr().replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    init_tracing(&config)?;

    if config.required_group_id == 0 {
        warn!(
            environment = %config.environment,
            "ALLOWED_CHAT_ID is not set, membership checks are not configured"
        );
    }

    let membership = TelegramMembershipClient::new(config.bot_token.clone())
        .context("failed to build membership client")?;
    let gateway = build_gateway(
        &config,
        Arc::new(membership),
        Arc::new(InMemoryUserDirectory::new()),
    );
    let sweeps = spawn_sweeps(&gateway, &config);

    let addr: SocketAddr = config
        .gateway_listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.gateway_listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(
        %addr,
        environment = %config.environment,
        required_group_id = config.required_group_id,
        rate_limit = config.rate_limit_requests,
        rate_limit_window_secs = config.rate_limit_window_secs,
        version = VERSION,
        "starting Spacegate Server",
    );

    let result = serve(listener, gateway.service, shutdown_signal()).await;

    for sweep in sweeps {
        sweep.shutdown().await;
    }
    info!("background sweeps stopped, exiting");

    result
}
