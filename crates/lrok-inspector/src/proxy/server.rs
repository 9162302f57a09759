//! ProxyServer startup and the accept loop.
//!
//! `ProxyServer::start` binds, spawns the accept loop and walks the readiness
//! gate. The caller gets a [`ProxyHandle`] only once the proxy is `Ready`.

use super::connection::{ConnectionActivity, TimeoutStream};
use super::forwarding::ForwardingEngine;
use super::headers::generate_warmup_token;
use super::network::{bind_with_fallback, listen_addr};
use crate::broadcaster::Broadcaster;
use crate::capture::CaptureStore;
use crate::config::{InspectorConfig, ListenConfig};
use crate::error::StartupError;
use crate::query::QuerySurface;
use crate::readiness::{HttpProbe, ReadinessEvent, ReadinessGate, ReadinessProbe};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
struct ConnectionTimeouts {
    read: Duration,
    write: Duration,
    idle: Duration,
}

impl From<&ListenConfig> for ConnectionTimeouts {
    fn from(listen: &ListenConfig) -> Self {
        Self {
            read: listen.read_timeout(),
            write: listen.write_timeout(),
            idle: listen.idle_timeout(),
        }
    }
}

/// An inspecting proxy instance that has not been started yet.
pub struct ProxyServer {
    config: InspectorConfig,
    store: Arc<CaptureStore>,
    broadcaster: Broadcaster,
    warmup_token: String,
}

impl ProxyServer {
    /// Create a proxy with its own capture store and broadcaster.
    pub fn new(config: InspectorConfig) -> Self {
        let store = Arc::new(CaptureStore::new(config.capture.effective_capacity()));
        let broadcaster = Broadcaster::new(config.capture.subscriber_capacity);
        Self::with_components(config, store, broadcaster)
    }

    /// Create a proxy around caller-supplied capture components.
    pub fn with_components(
        config: InspectorConfig,
        store: Arc<CaptureStore>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            config,
            store,
            broadcaster,
            warmup_token: generate_warmup_token(),
        }
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Value of the warm-up marker header that this instance will not capture.
    /// Custom probes must send it on their warm-up requests.
    pub fn warmup_token(&self) -> &str {
        &self.warmup_token
    }

    pub fn query(&self) -> QuerySurface {
        QuerySurface::new(Arc::clone(&self.store), self.broadcaster.clone())
    }

    /// Bind, serve and wait for readiness using HTTP probes.
    pub async fn start(self) -> Result<ProxyHandle, StartupError> {
        let probe = HttpProbe::new(&self.config.readiness, self.warmup_token.clone())?;
        self.start_with_probe(&probe).await
    }

    /// Bind, serve and wait for readiness using `probe`.
    pub async fn start_with_probe<P>(self, probe: &P) -> Result<ProxyHandle, StartupError>
    where
        P: ReadinessProbe + ?Sized,
    {
        let mut gate = ReadinessGate::new(&self.config.readiness);
        let listen = &self.config.listen;

        let listener = match bind_with_fallback(&listen.host, listen.port) {
            Ok(listener) => listener,
            Err(e) => {
                gate.apply(ReadinessEvent::BindFailed {
                    reason: e.to_string(),
                })?;
                error!("Inspector failed to start: {}", e);
                return Err(e);
            }
        };
        let addr = listener
            .local_addr()
            .map_err(|source| StartupError::Bind {
                addr: listen_addr(&listen.host, listen.port),
                source,
            })?;
        gate.apply(ReadinessEvent::Bound { port: addr.port() })?;

        let engine = ForwardingEngine::new(
            &self.config,
            Arc::clone(&self.store),
            self.broadcaster.clone(),
        )
        .with_warmup_token(self.warmup_token.clone());
        let engine = Arc::new(engine);
        info!("Listening on http://{}", addr);
        info!("Forwarding to {}", engine.target_uri());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(serve(
            listener,
            engine,
            ConnectionTimeouts::from(listen),
            shutdown_rx,
        ));
        gate.apply(ReadinessEvent::Serving)?;

        match gate.run(probe, addr).await {
            Ok(_) => Ok(ProxyHandle {
                addr,
                query: self.query(),
                shutdown_tx,
                task,
            }),
            Err(e) => {
                error!("Inspector failed to start: {}", e);
                let _ = shutdown_tx.send(true);
                task.abort();
                Err(e)
            }
        }
    }
}

/// A running, ready proxy. Dropping the handle stops the proxy.
pub struct ProxyHandle {
    addr: SocketAddr,
    query: QuerySurface,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The port the proxy ended up listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn query(&self) -> &QuerySurface {
        &self.query
    }

    /// Stop accepting, close open connections and end live subscriptions.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("Proxy accept loop ended abnormally: {}", e);
        }
        self.query.close_subscriptions();
        info!("Proxy on {} stopped", self.addr);
    }
}

async fn serve(
    listener: TcpListener,
    engine: Arc<ForwardingEngine>,
    timeouts: ConnectionTimeouts,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        tokio::spawn(serve_connection(
            stream,
            remote_addr,
            Arc::clone(&engine),
            timeouts,
            shutdown.clone(),
        ));
    }
    debug!("Proxy accept loop stopped");
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    engine: Arc<ForwardingEngine>,
    timeouts: ConnectionTimeouts,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let activity = ConnectionActivity::new();
    let io = TokioIo::new(TimeoutStream::new(
        stream,
        timeouts.write,
        Arc::clone(&activity),
    ));

    let service_activity = Arc::clone(&activity);
    let service = service_fn(move |req| {
        let engine = Arc::clone(&engine);
        let guard = service_activity.begin_request();
        async move {
            let response = engine.handle(req).await;
            drop(guard);
            Ok::<_, Infallible>(response)
        }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read)
        .keep_alive(true);
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        let idle_deadline = activity.idle_deadline(timeouts.idle);
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!("Connection from {} ended with error: {}", remote_addr, e);
                }
                break;
            }
            _ = shutdown.changed() => {
                debug!("Closing connection from {} on shutdown", remote_addr);
                break;
            }
            _ = tokio::time::sleep_until(idle_deadline), if !closing => {
                if activity.is_idle(timeouts.idle) {
                    debug!("Closing idle connection from {}", remote_addr);
                    conn.as_mut().graceful_shutdown();
                    closing = true;
                }
            }
        }
    }
}
