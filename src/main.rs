use std::time::Duration;

use clap::Parser;

use weft_server::ServerConfig;
use weft_telemetry::TelemetryConfig;

/// Chat-completion gateway fronting live browser-tab workers.
#[derive(Parser, Debug)]
#[command(name = "weft", version, about)]
struct Cli {
    /// Port for the HTTP and worker-WebSocket surface.
    #[arg(long, default_value_t = 8686)]
    port: u16,

    /// Seconds without a heartbeat before a worker is evicted.
    #[arg(long, default_value_t = 90)]
    heartbeat_timeout_secs: u64,

    /// Seconds between eviction sweeps.
    #[arg(long, default_value_t = 30)]
    sweep_interval_secs: u64,

    /// Model id advertised on /v1/models.
    #[arg(long, default_value = "claude-web")]
    model: String,

    /// Emit JSON-formatted log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    weft_telemetry::init_telemetry(&TelemetryConfig {
        json_output: cli.json_logs,
        ..Default::default()
    });

    let config = ServerConfig {
        port: cli.port,
        heartbeat_timeout: Duration::from_secs(cli.heartbeat_timeout_secs),
        sweep_interval: Duration::from_secs(cli.sweep_interval_secs),
        advertised_model: cli.model,
        ..Default::default()
    };

    let handle = weft_server::start(config)
        .await
        .expect("failed to start server");
    tracing::info!(port = handle.port, "weft gateway ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}
