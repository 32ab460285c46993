//! gx-dispatch: serve the task dispatch API.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gx_dispatch::config::Config;
use gx_dispatch::engine::Registry;
use gx_dispatch::http::{self, AppState};
use gx_dispatch::telemetry::{TelemetryConfig, init_telemetry};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "gx-dispatch", about = "Multi-tenant job-dispatch engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP and WebSocket server (default)
    Serve {
        /// Override PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load and validate configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => cmd_serve(port).await,
        Command::CheckConfig => cmd_check_config(),
    }
}

async fn cmd_serve(port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "gx-dispatch".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let registry = Arc::new(Registry::new(config.engine_config()));
    if let Some(max_idle) = config.workspace_idle_timeout {
        let every = (max_idle / 4).max(Duration::from_secs(1));
        registry.spawn_eviction_sweep(max_idle, every);
        info!(?max_idle, "idle workspace eviction enabled");
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port.unwrap_or(config.port)));
    let listener = TcpListener::bind(addr).await?;

    let reg = Arc::clone(&registry);
    let shutdown = async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        // Closing subscribers first lets upgraded sockets finish.
        reg.shutdown();
    };

    http::serve(listener, AppState::new(Arc::clone(&registry)), shutdown).await?;
    if !registry.is_closed() {
        registry.shutdown();
    }
    Ok(())
}

fn cmd_check_config() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    println!("port:                        {}", config.port);
    println!("api keys:                    {}", config.api_keys.len());
    println!("max workspaces:              {}", config.max_workspaces);
    println!("max workspace connections:   {}", config.max_workspace_connections);
    println!("max running workspace tasks: {}", config.max_running_workspace_tasks);
    println!("task failure rate:           {}", config.task_failure_rate);
    match config.workspace_idle_timeout {
        Some(t) => println!("workspace idle timeout:      {}s", t.as_secs()),
        None => println!("workspace idle timeout:      disabled"),
    }
    println!(
        "otel endpoint:               {}",
        config.otel_endpoint.as_deref().unwrap_or("-")
    );
    Ok(())
}
