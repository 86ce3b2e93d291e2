//! TCP server: connection acceptance and lifecycle control.
//!
//! A [`Server`] owns the listening socket, the shutdown signal, and the
//! bounded pool of session tasks, so there is no process-wide mutable state.
//! Its lifetime runs `Stopped -> Starting -> Running -> Stopping -> Stopped`
//! exactly once; restarting requires a fresh instance.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatch::Dispatch;
use crate::session;

/// Lifecycle states of a [`Server`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
}

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

fn state_from(value: u8) -> State {
    match value {
        STARTING => State::Starting,
        RUNNING => State::Running,
        STOPPING => State::Stopping,
        _ => State::Stopped,
    }
}

/// Server startup and lifecycle errors.
#[derive(Debug)]
pub enum ServerError {
    /// The listening socket could not be bound.
    Bind(String, std::io::Error),
    /// `start` was called on an instance that already ran.
    AlreadyStarted,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ServerError::AlreadyStarted => write!(f, "Server was already started"),
        }
    }
}

impl std::error::Error for ServerError {}

/// Cloneable, non-blocking view of whether the server is accepting traffic.
///
/// Handed to external health reporting; reads false once the listening
/// socket has been closed.
#[derive(Debug, Clone)]
pub struct LivenessHandle(Arc<AtomicBool>);

impl LivenessHandle {
    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Server instance.
pub struct Server {
    config: Config,
    dispatcher: Arc<dyn Dispatch>,
    state: AtomicU8,
    live: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    acceptor: Mutex<Option<JoinHandle<JoinSet<()>>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Create a server that will hand decoded requests to `dispatcher`.
    pub fn new(config: Config, dispatcher: Arc<dyn Dispatch>) -> Self {
        let (shutdown, _) = watch::channel(false);

        Server {
            config,
            dispatcher,
            state: AtomicU8::new(STOPPED),
            live: Arc::new(AtomicBool::new(false)),
            shutdown,
            acceptor: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        state_from(self.state.load(Ordering::SeqCst))
    }

    /// Whether the server is currently accepting and serving connections.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// A cloneable liveness view for external health reporting.
    pub fn liveness(&self) -> LivenessHandle {
        LivenessHandle(Arc::clone(&self.live))
    }

    /// The address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Bind the listening socket and spawn the acceptor loop.
    ///
    /// Returns once the server is accepting; the acceptor runs on its own
    /// task. Fails with [`ServerError::Bind`] if the address is unavailable.
    pub async fn start(&self) -> Result<(), ServerError> {
        if self
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.store(STOPPED, Ordering::SeqCst);
                return Err(ServerError::Bind(addr, e));
            }
        };

        if let Ok(local) = listener.local_addr() {
            *self.local_addr.lock().unwrap() = Some(local);
            info!(address = %local, "Server listening");
        }

        let shutdown_rx = self.shutdown.subscribe();
        let limit = Arc::new(Semaphore::new(self.config.max_connections));
        let dispatcher = Arc::clone(&self.dispatcher);
        let live = Arc::clone(&self.live);

        live.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(accept_loop(listener, shutdown_rx, limit, dispatcher, live));
        *self.acceptor.lock().unwrap() = Some(handle);

        self.state.store(RUNNING, Ordering::SeqCst);
        Ok(())
    }

    /// Shut the server down, giving in-flight sessions `drain_timeout` to
    /// finish before force-closing them.
    ///
    /// Idempotent: calling it again, or before `start`, is a no-op.
    pub async fn stop(&self, drain_timeout: Duration) {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        info!("Shutting down server");
        // Unblocks both the accept loop and any permit wait.
        let _ = self.shutdown.send(true);

        let handle = self.acceptor.lock().unwrap().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(sessions) => drain_sessions(sessions, drain_timeout).await,
                Err(e) => warn!(error = %e, "Acceptor task failed during shutdown"),
            }
        }

        self.state.store(STOPPED, Ordering::SeqCst);
        info!("Server shut down");
    }
}

/// Accept connections until the shutdown signal fires.
///
/// Each connection takes one semaphore permit before it is accepted, which
/// bounds the number of live sessions; once the pool is saturated new
/// accepts wait for a slot. Returns the set of still-running session tasks
/// so the caller can drain them.
async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
    limit: Arc<Semaphore>,
    dispatcher: Arc<dyn Dispatch>,
    live: Arc<AtomicBool>,
) -> JoinSet<()> {
    let mut sessions: JoinSet<()> = JoinSet::new();

    loop {
        // Wait for a connection slot.
        let permit = tokio::select! {
            permit = limit.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown_rx.changed() => break,
        };

        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let dispatcher = Arc::clone(&dispatcher);
                    sessions.spawn(async move {
                        match session::run_session(stream, dispatcher).await {
                            Ok(()) => debug!(peer = %addr, "Client disconnected"),
                            Err(e) => debug!(peer = %addr, error = %e, "Connection error"),
                        }
                        drop(permit);
                    });

                    // Reap sessions that already finished so the set does
                    // not grow with connection churn.
                    while sessions.try_join_next().is_some() {}
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    // Closing the listener is what makes liveness read false.
    drop(listener);
    live.store(false, Ordering::SeqCst);
    info!("Acceptor stopped");

    sessions
}

/// Wait up to `drain_timeout` for sessions to finish, then abort the rest.
async fn drain_sessions(mut sessions: JoinSet<()>, drain_timeout: Duration) {
    if sessions.is_empty() {
        return;
    }

    info!(in_flight = sessions.len(), "Draining sessions");

    let drained = tokio::time::timeout(drain_timeout, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = sessions.len(),
            "Drain timeout elapsed, force-closing sessions"
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}
