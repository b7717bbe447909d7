//! Event-streaming server.
//!
//! # Architecture
//!
//! ```text
//! optimization process                       host application
//!   REQ  ──HELLO/GOODBYE──► reply (ROUTER) ┐
//!   PUB  ──MESSAGE────────► subscribe (SUB)├─► server thread ─► on_event / on_error
//!              EventServer::stop ─► signal (REP, inproc)┘
//! ```
//!
//! The server thread owns every socket. The host only calls
//! [`EventServer::start`] and [`EventServer::stop`] and reads the published
//! state and ports. Callbacks run on the server thread; the host decides how
//! their effects reach its own thread (see [`EventServer::channel`]).

mod callbacks;
pub mod machine;
pub mod sockets;
pub mod state;
mod worker;

pub use callbacks::{ErrorCallback, EventCallback};
pub use machine::{handler_for, Action, Handler, ProtocolMachine};
pub use sockets::{Endpoint, SocketManager};
pub use state::{Ports, ServerState};

use crate::config::ServerConfig;
use crate::error::{ErrorSeverity, Result};
use crate::events::Event;
use callbacks::Callbacks;
use parking_lot::Mutex;
use state::Status;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// A callback invocation, as delivered by [`EventServer::channel`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Event(Event),
    Error(ErrorSeverity, String),
}

/// Controller for the event-streaming server.
///
/// Serves exactly one external client at a time. Dropping the server stops it.
pub struct EventServer {
    config: ServerConfig,
    context: Arc<zmq::Context>,
    status: Arc<Status>,
    callbacks: Arc<Callbacks>,
    run: Mutex<Option<Run>>,
}

/// Server thread of the current (or last) run.
struct Run {
    handle: JoinHandle<()>,
    /// Signal address bound by this run
    signal_endpoint: String,
}

impl EventServer {
    /// Create a server with its own ZMQ context.
    pub fn new<E, R>(config: ServerConfig, on_event: E, on_error: R) -> Result<Self>
    where
        E: Fn(Event) -> anyhow::Result<()> + Send + Sync + 'static,
        R: Fn(ErrorSeverity, &str) + Send + Sync + 'static,
    {
        let context = zmq::Context::new();
        if let Err(e) = context.set_io_threads(config.io_threads) {
            warn!(
                "Failed to set ZMQ IO threads to {}: {}, using default",
                config.io_threads, e
            );
        }
        Self::with_context(config, Arc::new(context), on_event, on_error)
    }

    /// Create a server on a shared ZMQ context.
    ///
    /// Each run binds `signal_endpoint` suffixed with its run number, scoped
    /// to `context`, so two servers sharing a context need distinct
    /// `signal_endpoint`s.
    pub fn with_context<E, R>(
        config: ServerConfig,
        context: Arc<zmq::Context>,
        on_event: E,
        on_error: R,
    ) -> Result<Self>
    where
        E: Fn(Event) -> anyhow::Result<()> + Send + Sync + 'static,
        R: Fn(ErrorSeverity, &str) + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            context,
            status: Arc::new(Status::default()),
            callbacks: Arc::new(Callbacks::new(Box::new(on_event), Box::new(on_error))),
            run: Mutex::new(None),
        })
    }

    /// Create a server whose callbacks forward into a channel.
    ///
    /// The host drains the receiver on whatever thread it owns.
    pub fn channel(config: ServerConfig) -> Result<(Self, mpsc::Receiver<Notification>)> {
        let (tx, rx) = mpsc::channel();
        let error_tx = tx.clone();

        let server = Self::new(
            config,
            move |event| {
                tx.send(Notification::Event(event))
                    .map_err(|_| anyhow::anyhow!("notification receiver dropped"))
            },
            move |severity, message| {
                let _ = error_tx.send(Notification::Error(severity, message.to_string()));
            },
        )?;
        Ok((server, rx))
    }

    /// Bind the endpoints and start the server thread.
    ///
    /// No-op returning the current ports if already running. A bind failure
    /// is reported once as `Critical` through the error callback and returned.
    pub fn start(&self) -> Result<Ports> {
        let mut current = self.run.lock();

        if let Some(ports) = self.status.ports() {
            debug!(%ports, "start ignored, server already running");
            return Ok(ports);
        }

        // Previous loop has reached Stopped; reap it if it already exited
        if let Some(previous) = current.take() {
            if previous.handle.is_finished() {
                join_worker(previous.handle);
            } else {
                warn!(
                    signal = %previous.signal_endpoint,
                    "previous server thread still running, detaching it"
                );
            }
        }

        let status = self.status.begin();
        let signal_endpoint = self.config.run_signal_endpoint(status.generation());
        let config = ServerConfig {
            signal_endpoint: signal_endpoint.clone(),
            ..self.config.clone()
        };

        let (handle, ports) = worker::spawn(
            Arc::clone(&self.context),
            config,
            status,
            Arc::clone(&self.callbacks),
        )?;
        *current = Some(Run {
            handle,
            signal_endpoint,
        });

        info!(%ports, "event server started");
        Ok(ports)
    }

    /// Ask the server thread to stop and wait up to `stop_timeout_ms`.
    ///
    /// Never blocks longer than the timeout and never fails; problems are logged.
    /// Without an acknowledgement the server is marked `Stopped` anyway and its
    /// thread exits once it observes that. Concurrent calls are serialized;
    /// only the first performs the signal exchange.
    pub fn stop(&self) {
        if self.status.state() == ServerState::Stopped {
            trace!("stop ignored, server already stopped");
            return;
        }

        let mut current = self.run.lock();
        if self.status.state() == ServerState::Stopped {
            trace!("stop ignored, stopped while waiting");
            return;
        }
        let Some(run) = current.as_ref() else {
            return;
        };

        match self.signal(&run.signal_endpoint) {
            Ok(()) => {
                if let Some(run) = current.take() {
                    join_worker(run.handle);
                }
                info!("event server stopped");
            }
            // The loop failed on its own while the signal was in flight
            Err(e) if self.status.state() == ServerState::Stopped => {
                debug!(error = %e, "stop signal unanswered, server already stopped");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    timeout_ms = self.config.stop_timeout_ms,
                    "stop signal not acknowledged, marking server stopped"
                );
                self.status.stopped();
            }
        }
    }

    /// Send the shutdown signal and wait for its acknowledgement.
    fn signal(&self, endpoint: &str) -> Result<()> {
        let timeout = self.config.stop_timeout_ms;
        let socket = self.context.socket(zmq::REQ)?;
        socket.set_linger(0)?;
        socket.set_sndtimeo(timeout)?;
        socket.set_rcvtimeo(timeout)?;
        socket.connect(endpoint)?;

        socket.send(zmq::Message::new(), 0)?;
        socket.recv_bytes(0)?;
        Ok(())
    }

    /// Current protocol state.
    pub fn state(&self) -> ServerState {
        self.status.state()
    }

    /// Bound `(subscribe, reply)` ports, present iff not `Stopped`.
    pub fn ports(&self) -> Option<Ports> {
        self.status.ports()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for EventServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Join the server thread unless called from it (e.g. from inside a callback).
fn join_worker(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        debug!("not joining server thread from itself");
        return;
    }
    if handle.join().is_err() {
        warn!("server thread panicked");
    }
}
