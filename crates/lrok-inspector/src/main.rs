use anyhow::Context;
use clap::{Parser, ValueEnum};
use lrok_inspector::config::InspectorConfig;
use lrok_inspector::dashboard::{DashboardServer, DashboardState};
use lrok_inspector::ProxyServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Capturing reverse proxy for a local HTTP service
#[derive(Parser, Debug)]
#[command(name = "lrok-inspector")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port of the local service to forward to
    #[arg(short = 't', long, env = "LROK_TARGET_PORT")]
    target_port: Option<u16>,

    /// Host of the local service
    #[arg(long, env = "LROK_TARGET_HOST")]
    target_host: Option<String>,

    /// Proxy listen port (0 = OS-assigned)
    #[arg(short, long, env = "LROK_PROXY_PORT")]
    port: Option<u16>,

    /// Number of exchanges kept in history
    #[arg(long, env = "LROK_CAPACITY")]
    capacity: Option<usize>,

    /// Preferred dashboard API port
    #[arg(long, env = "LROK_DASHBOARD_PORT")]
    dashboard_port: Option<u16>,

    /// Do not start the dashboard API
    #[arg(long)]
    no_dashboard: bool,

    /// YAML configuration file
    #[arg(short, long, env = "LROK_CONFIG")]
    config: Option<String>,

    #[arg(long, value_enum, default_value = "text", env = "LROK_LOG_FORMAT")]
    log_format: LogFormat,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<InspectorConfig> {
        let mut config = match &self.config {
            Some(path) => InspectorConfig::from_file(path)
                .with_context(|| format!("failed to load config from {path}"))?,
            None => InspectorConfig::default(),
        };

        if let Some(port) = self.target_port {
            config.target.port = port;
        }
        if let Some(host) = &self.target_host {
            config.target.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(capacity) = self.capacity {
            config.capture.capacity = capacity;
        }
        if let Some(port) = self.dashboard_port {
            config.dashboard.port = port;
        }
        if self.no_dashboard {
            config.dashboard.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lrok_inspector=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.load_config()?;
    let target = config.target.authority();
    let dashboard_config = config.dashboard.clone();

    info!("Starting lrok-inspector v{}", env!("CARGO_PKG_VERSION"));
    let handle = match ProxyServer::new(config).start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Proxy failed to start: {}", e);
            return Err(e.into());
        }
    };
    info!("Forwarding http://{} -> http://{}", handle.addr(), target);

    let dashboard = if dashboard_config.enabled {
        let state = DashboardState::new(handle.query().clone(), target, handle.port())
            .with_labels(&dashboard_config);
        let server = DashboardServer::bind(&dashboard_config, state)?;
        info!("Dashboard API at http://{}", server.local_addr());
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Dashboard server stopped: {}", e);
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some(task) = dashboard {
        task.abort();
    }
    handle.shutdown().await;
    Ok(())
}
