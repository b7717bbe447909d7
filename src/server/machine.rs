//! Protocol state machine.
//!
//! Every frame is routed through an explicit `(state, endpoint) -> handler`
//! table. Combinations without a handler are logged and discarded, which makes
//! unexpected input an ordinary outcome rather than an error.
//!
//! | state     | endpoint  | handler |
//! |-----------|-----------|---------|
//! | Waiting   | reply     | hello   |
//! | Receiving | reply     | goodbye |
//! | Receiving | subscribe | message |
//! | Waiting   | signal    | signal  |
//! | Receiving | signal    | signal  |

use super::sockets::Endpoint;
use super::state::{Ports, RunStatus, ServerState};
use crate::events::{self, Event};
use crate::protocol::{Frame, MessageKind, PROTOCOL_VERSION};
use tracing::{debug, info, warn};

/// Handler selected for a `(state, endpoint)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Hello,
    Goodbye,
    Message,
    Signal,
}

/// Look up the handler for a frame arriving on `endpoint` in `state`.
pub fn handler_for(state: ServerState, endpoint: Endpoint) -> Option<Handler> {
    match (state, endpoint) {
        (ServerState::Waiting, Endpoint::Reply) => Some(Handler::Hello),
        (ServerState::Receiving, Endpoint::Reply) => Some(Handler::Goodbye),
        (ServerState::Receiving, Endpoint::Subscribe) => Some(Handler::Message),
        (ServerState::Waiting | ServerState::Receiving, Endpoint::Signal) => Some(Handler::Signal),
        _ => None,
    }
}

/// What the server loop must do after a frame was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send this frame back on the reply endpoint.
    Echo(Frame),
    /// Hand the event to the host.
    Deliver(Event),
    /// Drop the frame and report a warning.
    Reject(String),
    /// Drop the frame silently.
    Discard,
    /// Release the network endpoints, acknowledge, and exit.
    Shutdown,
}

/// Protocol state for a single client session.
pub struct ProtocolMachine {
    status: RunStatus,
    client_id: Option<String>,
}

impl ProtocolMachine {
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            client_id: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.status.state()
    }

    /// Client id of the current session, if a handshake completed.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Endpoints are bound: `Stopped -> Waiting`.
    pub fn bound(&mut self, ports: Ports) {
        self.client_id = None;
        self.status.running(ports);
    }

    /// Any shutdown path: `* -> Stopped`.
    pub fn stopped(&mut self) {
        self.client_id = None;
        self.status.stopped();
    }

    /// Route one decoded frame.
    pub fn dispatch(&mut self, endpoint: Endpoint, frame: Frame) -> Action {
        let state = self.state();
        match handler_for(state, endpoint) {
            Some(Handler::Hello) => self.on_hello(frame),
            Some(Handler::Goodbye) => self.on_goodbye(frame),
            Some(Handler::Message) => self.on_message(frame),
            Some(Handler::Signal) => self.on_signal(),
            None => {
                debug!(%state, %endpoint, fields = frame.len(), "no handler, frame discarded");
                Action::Discard
            }
        }
    }

    fn on_hello(&mut self, frame: Frame) -> Action {
        if !MessageKind::Hello.matches(&frame) {
            debug!(fields = frame.len(), "expected HELLO, frame discarded");
            return Action::Discard;
        }
        if frame[2] != PROTOCOL_VERSION {
            warn!(
                client_id = %frame[1],
                version = %frame[2],
                supported = PROTOCOL_VERSION,
                "unsupported protocol version, handshake ignored"
            );
            return Action::Discard;
        }

        if !self.status.set(ServerState::Receiving) {
            debug!("server stopped, HELLO discarded");
            return Action::Discard;
        }
        info!(client_id = %frame[1], "handshake accepted");
        self.client_id = Some(frame[1].clone());
        Action::Echo(frame)
    }

    fn on_goodbye(&mut self, frame: Frame) -> Action {
        if !MessageKind::Goodbye.matches(&frame) {
            debug!(fields = frame.len(), "expected GOODBYE, frame discarded");
            return Action::Discard;
        }
        if self.client_id.as_deref() != Some(frame[1].as_str()) {
            warn!(
                client_id = %frame[1],
                session = ?self.client_id,
                "GOODBYE from a different client id, closing session anyway"
            );
        }

        if !self.status.set(ServerState::Waiting) {
            debug!("server stopped, GOODBYE discarded");
            return Action::Discard;
        }
        info!(client_id = %frame[1], "client said goodbye");
        self.client_id = None;
        Action::Echo(frame)
    }

    fn on_message(&mut self, frame: Frame) -> Action {
        if !MessageKind::Message.matches(&frame) {
            debug!(fields = frame.len(), "expected MESSAGE, frame discarded");
            return Action::Discard;
        }

        match events::deserialize(frame[2].as_bytes()) {
            Ok(event) => {
                debug!(client_id = %frame[1], kind = event.kind(), "event received");
                Action::Deliver(event)
            }
            Err(e) => {
                warn!(client_id = %frame[1], error = %e, "notification discarded");
                Action::Reject(format!(
                    "discarded notification from {}: {}",
                    frame[1], e
                ))
            }
        }
    }

    fn on_signal(&mut self) -> Action {
        info!(state = %self.state(), "shutdown signal received");
        self.stopped();
        Action::Shutdown
    }
}
