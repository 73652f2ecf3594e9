use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ros_bridge::config::Config;
use ros_bridge::server::Server;

// Exit code on configuration failures.
const CONFIG_FAILURE: u8 = 1;

// Exit code on server failures.
const SERVER_FAILURE: u8 = 2;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    /// Human readable key-value lines.
    Logfmt,
    /// One JSON object per line.
    Json,
}

/// A REST bridge for RouterOS devices.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Log level, or a full filter directive.
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Logfmt)]
    log_format: LogFormat,
}

fn init_logging(level: &str, format: LogFormat) {
    // `RUST_LOG` takes precedence over the command line.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Logfmt => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {e}");
                let _ = ctrl_c.await;
                info!("Received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received SIGINT, shutting down");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format);

    // Failures are logged where they are raised.
    let Ok(config) = Config::load(&cli.config).await else {
        return ExitCode::from(CONFIG_FAILURE);
    };

    match Server::new(config)
        .with_graceful_shutdown(shutdown_signal())
        .run()
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::from(SERVER_FAILURE),
    }
}
