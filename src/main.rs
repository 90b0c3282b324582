//! emberd - the Ember IRC Daemon.

mod caps;
mod config;
mod dispatch;
mod engine;
mod error;
mod ext;
mod handlers;
mod hooks;
mod modes;
mod network;
mod routing;
mod state;
mod xline;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::{Engine, Event};
use crate::error::exit;
use crate::network::Gateway;

/// Parsed command line.
struct CliArgs {
    config_path: String,
    nofork: bool,
    quiet: bool,
    debug: bool,
}

/// Long-form flags only: `--nofork`, `--quiet`, `--debug`,
/// `--config <path>`, `--version`.
fn parse_args() -> Result<CliArgs, String> {
    let mut out = CliArgs {
        config_path: "emberd.toml".to_string(),
        nofork: false,
        quiet: false,
        debug: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--nofork" => out.nofork = true,
            "--quiet" => out.quiet = true,
            "--debug" => out.debug = true,
            "--version" => {
                println!("emberd-{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(exit::OK);
            }
            "--config" => {
                out.config_path = args
                    .next()
                    .ok_or_else(|| "missing path after --config".to_string())?;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    // Canonicalize so REHASH is independent of the working directory.
    if let Ok(p) = std::fs::canonicalize(Path::new(&out.config_path)) {
        out.config_path = p.to_string_lossy().into_owned();
    }
    Ok(out)
}

fn init_tracing(config: &Config, args: &CliArgs) {
    let default = if args.debug {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    match config.server.log_format {
        config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("emberd: {e}");
            return ExitCode::from(exit::CONFIG as u8);
        }
    };

    let config = match Config::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("emberd: cannot load configuration: {e}");
            return ExitCode::from(exit::CONFIG as u8);
        }
    };

    init_tracing(&config, &args);

    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return ExitCode::from(exit::CONFIG as u8);
    }

    if !args.nofork {
        // Daemonization is left to the service manager; the flag is
        // accepted for interface compatibility.
        warn!("emberd always runs in the foreground; pass --nofork to silence this");
    }

    info!(
        server = %config.server.name,
        network = %config.server.network,
        sid = %config.server.sid,
        casemap = %config.server.casemap,
        "Starting emberd"
    );

    let config = Arc::new(config);
    let (mut engine, handle) = Engine::new(Arc::clone(&config), args.config_path.clone());
    engine.bootstrap();

    let gateway = match Gateway::bind(Arc::clone(&config), handle.clone()).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "Socket engine failed");
            return ExitCode::from(exit::SOCKET_ENGINE as u8);
        }
    };

    // Graceful shutdown on SIGINT/SIGTERM.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Cannot install SIGINT handler");
                    return;
                }
            };
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Cannot install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received; shutting down"),
                _ = sigterm.recv() => info!("SIGTERM received; shutting down"),
            }
            let _ = handle.events.send(Event::Shutdown).await;
        });
    }

    let engine_task = tokio::spawn(engine.run());
    tokio::spawn(gateway.run());

    match engine_task.await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::from(exit::OK as u8)
        }
        Err(e) => {
            error!(error = %e, "State engine aborted");
            ExitCode::from(exit::FATAL_RUNTIME as u8)
        }
    }
}
