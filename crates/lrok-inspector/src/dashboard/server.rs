//! Dashboard API server.

use super::router::route_request;
use crate::config::DashboardConfig;
use crate::error::StartupError;
use crate::proxy::bind_with_fallback;
use crate::query::QuerySurface;
use chrono::{DateTime, Utc};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Everything the dashboard routes read from.
pub struct DashboardState {
    pub query: QuerySurface,
    pub target: String,
    pub proxy_port: u16,
    pub tunnel_name: Option<String>,
    pub public_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    /// Interval between SSE keep-alive comments
    pub keep_alive: Duration,
}

impl DashboardState {
    pub fn new(query: QuerySurface, target: impl Into<String>, proxy_port: u16) -> Self {
        Self {
            query,
            target: target.into(),
            proxy_port,
            tunnel_name: None,
            public_url: None,
            started_at: Utc::now(),
            started: Instant::now(),
            keep_alive: Duration::from_secs(15),
        }
    }

    pub fn with_labels(mut self, config: &DashboardConfig) -> Self {
        self.tunnel_name = config.tunnel_name.clone();
        self.public_url = config.public_url.clone();
        self
    }
}

/// Dashboard API server, bound and ready to run.
pub struct DashboardServer {
    listener: TcpListener,
    addr: SocketAddr,
    state: Arc<DashboardState>,
}

impl DashboardServer {
    /// Bind the preferred dashboard port, or an ephemeral one if it is taken.
    pub fn bind(config: &DashboardConfig, state: DashboardState) -> Result<Self, StartupError> {
        let listener = bind_with_fallback(&config.host, config.port)?;
        let addr = listener
            .local_addr()
            .map_err(|source| StartupError::Bind {
                addr: SocketAddr::from(([127, 0, 0, 1], config.port)),
                source,
            })?;
        Ok(Self {
            listener,
            addr,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the dashboard API server
    pub async fn run(self) -> Result<(), anyhow::Error> {
        info!("Dashboard API listening on http://{}", self.addr);

        loop {
            let (stream, _) = self.listener.accept().await?;
            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { route_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Dashboard connection error: {}", e);
                }
            });
        }
    }
}
