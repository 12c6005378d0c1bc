//! Bridge runner
//!
//! Entry point for running the bridge: logging setup, the stdio server and
//! shutdown of every live agent process.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::core::Bridge;
use super::handlers::build_router;
use crate::cli::Cli;
use crate::tracing::ResultTraceExt;
use crate::types::BridgeConfig;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace::SdkTracerProvider;

// Kept for shutdown
#[cfg(feature = "otel")]
static OTEL_PROVIDER: std::sync::OnceLock<SdkTracerProvider> = std::sync::OnceLock::new();

/// Flush and shut down the OpenTelemetry provider, if one was installed
#[cfg(feature = "otel")]
pub fn shutdown_otel() {
    if let Some(provider) = OTEL_PROVIDER.get() {
        tracing::info!("Shutting down OpenTelemetry provider...");
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to shutdown OpenTelemetry provider: {:?}", e);
        } else {
            tracing::info!("OpenTelemetry provider shutdown complete");
        }
    }
}

/// No-op when the otel feature is disabled
#[cfg(not(feature = "otel"))]
pub fn shutdown_otel() {}

/// Batch OTLP exporter registered as the global tracer provider
#[cfg(feature = "otel")]
fn init_otel(endpoint: &str, service_name: &str) -> anyhow::Result<SdkTracerProvider> {
    use opentelemetry_sdk::Resource;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_owned())
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// Build an EnvFilter based on CLI args and RUST_LOG environment variable
///
/// Priority: RUST_LOG environment variable > CLI arguments (-v, -vv, -q)
fn build_env_filter(cli: &Cli) -> tracing_subscriber::EnvFilter {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            return tracing_subscriber::EnvFilter::new(rust_log);
        }
    }
    tracing_subscriber::EnvFilter::from_default_env().add_directive(cli.log_level().into())
}

/// Install the global subscriber writing plain (ANSI-free) lines to `writer`
fn install_subscriber<W>(cli: &Cli, writer: W) -> anyhow::Result<()>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
    let registry = tracing_subscriber::registry()
        .with(build_env_filter(cli))
        .with(fmt_layer);

    #[cfg(feature = "otel")]
    {
        let otel_layer = match cli.otel_endpoint.as_deref().filter(|_| cli.is_otel_enabled()) {
            Some(endpoint) => {
                eprintln!(
                    "OpenTelemetry enabled: endpoint={}, service={}",
                    endpoint, cli.otel_service_name
                );
                let provider = init_otel(endpoint, &cli.otel_service_name)?;
                let tracer = provider.tracer("claude-code-bridge");
                drop(OTEL_PROVIDER.set(provider));
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            None => None,
        };
        registry.with(otel_layer).try_init()?;
    }

    #[cfg(not(feature = "otel"))]
    registry.try_init()?;

    Ok(())
}

/// Initialize logging: a diagnostic log file, or stderr
///
/// stdout carries protocol frames, so logs never go there.
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    if !cli.is_diagnostic() {
        return install_subscriber(cli, std::io::stderr);
    }

    let log_path = cli.log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).trace_context()?;
    }
    let file = std::fs::File::create(&log_path).trace_context()?;
    eprintln!("Diagnostic mode: logging to {}", log_path.display());
    install_subscriber(cli, std::sync::Mutex::new(file))
}

/// Run the bridge with CLI arguments
///
/// Initializes logging, then serves JSON-RPC on stdin/stdout until the
/// client closes stdin or `shutdown` resolves.
pub async fn run_bridge_with_cli<F>(cli: &Cli, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let startup_time = std::time::Instant::now();

    init_logging(cli)?;

    // Short-lived span so startup is exported right away
    {
        let startup_span = tracing::info_span!(
            "bridge_startup",
            version = %env!("CARGO_PKG_VERSION"),
            pid = %std::process::id(),
            diagnostic = %cli.is_diagnostic(),
            otel_enabled = %cli.otel_endpoint.is_some(),
        );
        let _enter = startup_span.enter();

        tracing::info!("========== Claude Code Bridge Starting ==========");
        if cli.is_diagnostic() {
            tracing::info!(log_path = %cli.log_path().display(), "Diagnostic mode enabled");
        }
        if let Some(otel_endpoint) = &cli.otel_endpoint {
            tracing::info!(otel_endpoint = %otel_endpoint, "OpenTelemetry tracing enabled");
        }
        tracing::info!(
            init_elapsed_ms = startup_time.elapsed().as_millis(),
            "Logging initialized"
        );
    }

    emit_ready_trace(startup_time.elapsed()).await;

    let result = run_bridge_server(cli.to_config(), shutdown).await;

    emit_shutdown_trace(startup_time.elapsed()).await;

    result.map_err(Into::into)
}

#[tracing::instrument(name = "bridge_ready", skip_all, fields(
    startup_ms = %startup_duration.as_millis(),
    version = %env!("CARGO_PKG_VERSION"),
    pid = %std::process::id(),
))]
async fn emit_ready_trace(startup_duration: std::time::Duration) {
    tracing::info!(
        startup_ms = startup_duration.as_millis(),
        "Bridge ready and waiting for JSON-RPC messages"
    );
    // Give the exporter a moment to ship the span
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}

#[tracing::instrument(name = "bridge_shutdown", skip_all, fields(
    uptime_secs = %total_uptime.as_secs(),
))]
async fn emit_shutdown_trace(total_uptime: std::time::Duration) {
    tracing::info!(
        uptime_secs = total_uptime.as_secs(),
        uptime_ms = total_uptime.as_millis(),
        "========== Bridge Shutdown Complete =========="
    );
}

/// Serve one client over any byte transport
///
/// Returns when `reader` reaches EOF or `shutdown` resolves, after every
/// persistent session has been stopped.
pub async fn serve<R, W, F>(
    config: BridgeConfig,
    reader: R,
    writer: W,
    shutdown: F,
) -> crate::types::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    F: Future<Output = ()>,
{
    let (bridge, frames) = Bridge::new(config);
    let router = build_router(&bridge);
    tracing::debug!(router = ?router, "Router built");

    let result = tokio::select! {
        result = router.serve(reader, writer, frames) => result,
        () = shutdown => {
            tracing::info!("Shutdown requested");
            Ok(())
        }
    };
    bridge.shutdown().await;
    result
}

#[tracing::instrument(name = "bridge_server_main", skip_all)]
async fn run_bridge_server<F>(config: BridgeConfig, shutdown: F) -> crate::types::Result<()>
where
    F: Future<Output = ()>,
{
    let server_start_time = std::time::Instant::now();
    let is_tty = atty::is(atty::Stream::Stdin);
    let start_time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

    tracing::info!(
        "================================================================================"
    );
    tracing::info!("  Claude Code Bridge");
    tracing::info!("  Version:        {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Start Time:     {}", start_time);
    tracing::info!("  PID:            {}", std::process::id());
    tracing::info!("  Workspace:      {}", config.workspace_root.display());
    tracing::info!("  Default Mode:   {}", config.default_mode.as_str());
    tracing::info!("  Pool Capacity:  {}", config.max_persistent_sessions.max(1));
    tracing::info!(
        "================================================================================"
    );
    tracing::debug!(
        rust_log = ?std::env::var("RUST_LOG").ok(),
        agent_path = ?config.agent.agent_path,
        has_base_url = config.agent.base_url.is_some(),
        has_api_key = config.agent.api_key.is_some(),
        has_model = config.agent.model.is_some(),
        "Environment configuration"
    );

    if is_tty {
        eprintln!("Claude Code Bridge is running in interactive mode.");
        eprintln!("It speaks newline-delimited JSON-RPC 2.0 over stdin/stdout.");
        eprintln!("(Press Ctrl+C to exit)");
    }

    let result = serve(config, tokio::io::stdin(), tokio::io::stdout(), shutdown).await;
    let uptime = server_start_time.elapsed();
    match &result {
        Ok(()) => tracing::info!(uptime_ms = uptime.as_millis(), "Bridge server shutting down gracefully"),
        Err(e) => tracing::error!(error = %e, uptime_ms = uptime.as_millis(), "Bridge server error"),
    }
    result
}
