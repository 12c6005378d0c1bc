//! Claude Code bridge binary
//!
//! Run with: cargo run
//!
//! For help: cargo run -- --help

use std::io::IsTerminal;

use clap::Parser;
use claude_code_bridge::{cli::Cli, run_bridge_with_cli, shutdown_otel};
use tokio::signal;

async fn shutdown_signal() {
    let interrupt = async {
        if signal::ctrl_c().await.is_ok() {
            eprintln!("Received SIGINT, shutting down...");
        } else {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                eprintln!("Received SIGTERM, shutting down...");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // SIGINT/SIGTERM stop every agent process before exiting
    let result = run_bridge_with_cli(&cli, shutdown_signal()).await;

    // Shutdown OpenTelemetry to flush all pending spans
    shutdown_otel();

    if let Err(e) = result {
        // stdout belongs to the protocol
        eprintln!("Error: {}", e);

        // If running in interactive mode, show more details
        if std::io::stdin().is_terminal() {
            eprintln!("\nFor debugging, run with --diagnostic to log to a file.");
            eprintln!("Or use -v/-vv/-vvv for more verbose logging.");
        }

        std::process::exit(1);
    }

    Ok(())
}
