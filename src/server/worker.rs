//! Server loop running on the dedicated server thread.
//!
//! The thread binds the endpoints, reports the outcome back to `start()`, then
//! waits on all endpoints until the shutdown signal (or a failure) moves the
//! protocol to `Stopped`.

use super::callbacks::Callbacks;
use super::machine::{Action, ProtocolMachine};
use super::sockets::{Endpoint, Inbound, SocketManager};
use super::state::{Ports, RunStatus, ServerState};
use crate::config::ServerConfig;
use crate::error::{ErrorSeverity, Result, StreamError};
use crate::protocol::{decode_frame, encode_frame, Frame};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Name of the server thread.
pub const THREAD_NAME: &str = "optistream-server";

/// Wait without timeout; the signal endpoint is part of the wait set.
const WAIT_FOREVER: i64 = -1;

/// Spawn the server thread and wait until its endpoints are bound.
///
/// A bind failure is reported as `Critical` through `callbacks` on the server
/// thread and returned here as well.
pub(crate) fn spawn(
    context: Arc<zmq::Context>,
    config: ServerConfig,
    status: RunStatus,
    callbacks: Arc<Callbacks>,
) -> Result<(JoinHandle<()>, Ports)> {
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Ports>>(1);

    let handle = thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || {
            let mut sockets = SocketManager::new(context, config);
            let mut machine = ProtocolMachine::new(status);

            let ports = match sockets.bind() {
                Ok(ports) => ports,
                Err(e) => {
                    error!(error = %e, "failed to bind endpoints");
                    machine.stopped();
                    callbacks.error(
                        ErrorSeverity::Critical,
                        &format!("server failed to start: {}", e),
                    );
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            machine.bound(ports);
            // Signal ready AFTER the endpoints are bound
            if ready_tx.send(Ok(ports)).is_err() {
                warn!("ready signal dropped - starter gone");
            }

            let mut server_loop = ServerLoop {
                sockets,
                machine,
                callbacks,
            };
            server_loop.run();
        })
        .map_err(|e| StreamError::Spawn(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(ports)) => Ok((handle, ports)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(StreamError::Spawn(
                "server thread exited before signaling ready".to_string(),
            ))
        }
    }
}

struct ServerLoop {
    sockets: SocketManager,
    machine: ProtocolMachine,
    callbacks: Arc<Callbacks>,
}

impl ServerLoop {
    fn run(&mut self) {
        info!("server loop started");

        while self.machine.state() != ServerState::Stopped {
            if let Err(e) = self.iterate() {
                self.fail(e);
                break;
            }
        }

        // Also reached when the controller forced Stopped
        self.sockets.close_all();
        info!("server loop exited");
    }

    /// One wait plus processing of every endpoint that became ready.
    fn iterate(&mut self) -> Result<()> {
        let ready = self.sockets.poll(WAIT_FOREVER)?;

        for endpoint in Endpoint::ORDER {
            if !ready.is_ready(endpoint) {
                continue;
            }
            let Some(inbound) = self.sockets.receive(endpoint)? else {
                continue;
            };
            let Inbound { envelope, parts } = inbound;

            let frame = match endpoint {
                // Signal content is ignored
                Endpoint::Signal => Frame::new(),
                _ => match decode_frame(parts) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(%endpoint, error = %e, "undecodable frame skipped");
                        self.callbacks.error(
                            ErrorSeverity::Warning,
                            &format!("{} endpoint: {}", endpoint, e),
                        );
                        continue;
                    }
                },
            };

            let action = self.machine.dispatch(endpoint, frame);
            self.perform(&envelope, action)?;

            if self.machine.state() == ServerState::Stopped {
                break;
            }
        }
        Ok(())
    }

    fn perform(&mut self, envelope: &[Vec<u8>], action: Action) -> Result<()> {
        match action {
            Action::Echo(frame) => self.sockets.reply(envelope, encode_frame(&frame))?,
            Action::Deliver(event) => self.callbacks.event(event),
            Action::Reject(message) => self.callbacks.error(ErrorSeverity::Warning, &message),
            Action::Discard => {}
            Action::Shutdown => {
                self.sockets.close_network();
                self.sockets.acknowledge()?;
                self.sockets.close_all();
                info!("server stopped");
            }
        }
        Ok(())
    }

    /// Critical path: release everything, stop, and report.
    fn fail(&mut self, e: StreamError) {
        error!(error = %e, "server loop failed, stopping");
        self.sockets.close_all();
        self.machine.stopped();
        debug!("endpoints released after failure");
        self.callbacks
            .error(ErrorSeverity::Critical, &format!("server stopped: {}", e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::state::Status;
    use parking_lot::Mutex;

    type Reports = Arc<Mutex<Vec<(ErrorSeverity, String)>>>;

    fn recording_callbacks() -> (Arc<Callbacks>, Reports) {
        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let callbacks = Callbacks::new(
            Box::new(|_| Ok(())),
            Box::new(move |severity, message| sink.lock().push((severity, message.to_string()))),
        );
        (Arc::new(callbacks), reports)
    }

    fn config(name: &str) -> ServerConfig {
        ServerConfig {
            signal_endpoint: format!("inproc://worker-test/{}", name),
            ..Default::default()
        }
    }

    #[test]
    fn test_poll_failure_stops_with_single_critical() {
        let status = Arc::new(Status::default());
        let mut machine = ProtocolMachine::new(status.begin());
        machine.bound(Ports {
            subscribe: 40000,
            reply: 40001,
        });
        assert_eq!(status.state(), ServerState::Waiting);

        // Nothing bound, so the wait fails
        let sockets = SocketManager::new(Arc::new(zmq::Context::new()), config("unbound"));
        let (callbacks, reports) = recording_callbacks();
        let mut server_loop = ServerLoop {
            sockets,
            machine,
            callbacks,
        };
        server_loop.run();

        assert_eq!(status.state(), ServerState::Stopped);
        assert_eq!(status.ports(), None);
        assert!(!server_loop.sockets.is_open());

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, ErrorSeverity::Critical);
        assert!(reports[0].1.starts_with("server stopped"), "{}", reports[0].1);
    }

    #[test]
    fn test_signal_acknowledged_and_endpoints_released() {
        let context = Arc::new(zmq::Context::new());
        let config = config("signal");
        let signal_endpoint = config.signal_endpoint.clone();

        let status = Arc::new(Status::default());
        let mut sockets = SocketManager::new(Arc::clone(&context), config);
        let mut machine = ProtocolMachine::new(status.begin());
        machine.bound(sockets.bind().unwrap());

        let signaller = {
            let context = Arc::clone(&context);
            thread::spawn(move || {
                let socket = context.socket(zmq::REQ).unwrap();
                socket.set_linger(0).unwrap();
                socket.set_rcvtimeo(5000).unwrap();
                socket.connect(&signal_endpoint).unwrap();
                socket.send(zmq::Message::new(), 0).unwrap();
                socket.recv_bytes(0).is_ok()
            })
        };

        let (callbacks, reports) = recording_callbacks();
        let mut server_loop = ServerLoop {
            sockets,
            machine,
            callbacks,
        };
        server_loop.run();

        assert!(signaller.join().unwrap(), "acknowledgement received");
        assert_eq!(status.state(), ServerState::Stopped);
        assert_eq!(status.ports(), None);
        assert!(!server_loop.sockets.is_open());
        assert!(reports.lock().is_empty());
    }

    #[test]
    fn test_forced_stop_ends_loop_without_reports() {
        let status = Arc::new(Status::default());
        let mut sockets = SocketManager::new(Arc::new(zmq::Context::new()), config("forced"));
        let mut machine = ProtocolMachine::new(status.begin());
        machine.bound(sockets.bind().unwrap());
        status.stopped();

        let (callbacks, reports) = recording_callbacks();
        let mut server_loop = ServerLoop {
            sockets,
            machine,
            callbacks,
        };
        server_loop.run();

        assert!(!server_loop.sockets.is_open());
        assert!(reports.lock().is_empty());
    }
}
