//! Endpoint ownership for the server thread.
//!
//! Three endpoints are bound:
//! - subscribe (`SUB`, ephemeral TCP port, subscribed to everything)
//! - reply (`ROUTER`, ephemeral TCP port, carries the handshake)
//! - signal (`REP`, fixed local-only address, used to request shutdown)
//!
//! The reply endpoint is a `ROUTER` so a frame can be dropped without
//! answering; a `REP` socket would refuse the next request until it replied.

use super::state::Ports;
use crate::config::ServerConfig;
use crate::error::{Result, StreamError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// One of the server's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Subscribe,
    Reply,
    Signal,
}

impl Endpoint {
    /// Order in which ready endpoints are processed within one wait.
    pub const ORDER: [Endpoint; 3] = [Endpoint::Subscribe, Endpoint::Reply, Endpoint::Signal];
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Subscribe => write!(f, "subscribe"),
            Endpoint::Reply => write!(f, "reply"),
            Endpoint::Signal => write!(f, "signal"),
        }
    }
}

/// Which endpoints had data after a wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    subscribe: bool,
    reply: bool,
    signal: bool,
}

impl Readiness {
    pub fn is_ready(&self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Subscribe => self.subscribe,
            Endpoint::Reply => self.reply,
            Endpoint::Signal => self.signal,
        }
    }

    fn mark(&mut self, endpoint: Endpoint) {
        match endpoint {
            Endpoint::Subscribe => self.subscribe = true,
            Endpoint::Reply => self.reply = true,
            Endpoint::Signal => self.signal = true,
        }
    }
}

/// A raw multipart message read from an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inbound {
    /// Routing envelope to send back with a reply (reply endpoint only)
    pub envelope: Vec<Vec<u8>>,
    /// Protocol fields
    pub parts: Vec<Vec<u8>>,
}

/// Owns the subscribe, reply and signal endpoints.
pub struct SocketManager {
    context: Arc<zmq::Context>,
    config: ServerConfig,
    subscribe: Option<zmq::Socket>,
    reply: Option<zmq::Socket>,
    signal: Option<zmq::Socket>,
}

impl SocketManager {
    pub fn new(context: Arc<zmq::Context>, config: ServerConfig) -> Self {
        Self {
            context,
            config,
            subscribe: None,
            reply: None,
            signal: None,
        }
    }

    /// Create and bind all three endpoints, returning the allocated ports.
    ///
    /// On failure every endpoint opened so far is released.
    pub fn bind(&mut self) -> Result<Ports> {
        match self.bind_all() {
            Ok(ports) => Ok(ports),
            Err(e) => {
                self.close_all();
                Err(e)
            }
        }
    }

    fn bind_all(&mut self) -> Result<Ports> {
        let network = self.config.ephemeral_endpoint();

        let subscribe = self.open(zmq::SUB, &network)?;
        subscribe
            .set_subscribe(b"")
            .map_err(|source| bind_error(&network, source))?;
        subscribe
            .set_rcvhwm(self.config.receive_hwm)
            .map_err(|source| bind_error(&network, source))?;
        let subscribe_port = bound_port(&subscribe, &network)?;
        self.subscribe = Some(subscribe);

        let reply = self.open(zmq::ROUTER, &network)?;
        let reply_port = bound_port(&reply, &network)?;
        self.reply = Some(reply);

        let signal_endpoint = self.config.signal_endpoint.clone();
        self.signal = Some(self.open(zmq::REP, &signal_endpoint)?);

        let ports = Ports {
            subscribe: subscribe_port,
            reply: reply_port,
        };
        info!(
            host = %self.config.bind_host,
            subscribe = ports.subscribe,
            reply = ports.reply,
            signal = %signal_endpoint,
            "endpoints bound"
        );
        Ok(ports)
    }

    fn open(&self, kind: zmq::SocketType, endpoint: &str) -> Result<zmq::Socket> {
        let socket = self
            .context
            .socket(kind)
            .map_err(|source| bind_error(endpoint, source))?;
        socket
            .set_linger(self.config.linger_ms)
            .map_err(|source| bind_error(endpoint, source))?;
        socket
            .set_sndtimeo(self.config.send_timeout_ms)
            .map_err(|source| bind_error(endpoint, source))?;
        socket
            .bind(endpoint)
            .map_err(|source| bind_error(endpoint, source))?;
        Ok(socket)
    }

    /// Release the subscribe and reply endpoints. Idempotent.
    pub fn close_network(&mut self) {
        if self.subscribe.take().is_some() {
            debug!("subscribe endpoint closed");
        }
        if self.reply.take().is_some() {
            debug!("reply endpoint closed");
        }
    }

    /// Release every endpoint, including the signal endpoint. Idempotent.
    pub fn close_all(&mut self) {
        self.close_network();
        if self.signal.take().is_some() {
            debug!("signal endpoint closed");
        }
    }

    /// Whether any endpoint is still open.
    pub fn is_open(&self) -> bool {
        self.subscribe.is_some() || self.reply.is_some() || self.signal.is_some()
    }

    fn socket(&self, endpoint: Endpoint) -> Option<&zmq::Socket> {
        match endpoint {
            Endpoint::Subscribe => self.subscribe.as_ref(),
            Endpoint::Reply => self.reply.as_ref(),
            Endpoint::Signal => self.signal.as_ref(),
        }
    }

    fn open_socket(&self, endpoint: Endpoint) -> Result<&zmq::Socket> {
        self.socket(endpoint)
            .ok_or(StreamError::Zmq(zmq::Error::ENOTSOCK))
    }

    /// Block until at least one open endpoint is readable.
    ///
    /// `timeout_ms` of `-1` waits indefinitely. An interrupted wait is retried.
    pub fn poll(&self, timeout_ms: i64) -> Result<Readiness> {
        let open: Vec<(Endpoint, &zmq::Socket)> = Endpoint::ORDER
            .iter()
            .filter_map(|endpoint| self.socket(*endpoint).map(|s| (*endpoint, s)))
            .collect();
        if open.is_empty() {
            return Err(StreamError::Zmq(zmq::Error::ENOTSOCK));
        }

        let mut items: Vec<zmq::PollItem> = open
            .iter()
            .map(|(_, socket)| socket.as_poll_item(zmq::POLLIN))
            .collect();

        loop {
            match zmq::poll(&mut items, timeout_ms) {
                Ok(_) => break,
                Err(zmq::Error::EINTR) => {
                    trace!("wait interrupted, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut ready = Readiness::default();
        for ((endpoint, _), item) in open.iter().zip(items.iter()) {
            if item.is_readable() {
                ready.mark(*endpoint);
            }
        }
        Ok(ready)
    }

    /// Read one multipart message without blocking.
    ///
    /// Returns `None` when the endpoint turned out to have nothing queued.
    pub fn receive(&self, endpoint: Endpoint) -> Result<Option<Inbound>> {
        let socket = self.open_socket(endpoint)?;
        let parts = match socket.recv_multipart(zmq::DONTWAIT) {
            Ok(parts) => parts,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        trace!(%endpoint, parts = parts.len(), "frame received");

        if endpoint != Endpoint::Reply {
            return Ok(Some(Inbound {
                envelope: Vec::new(),
                parts,
            }));
        }

        // ROUTER prepends the peer identity; REQ peers close the envelope with
        // an empty delimiter, preceded by a request id when correlating
        let split = parts
            .iter()
            .skip(1)
            .position(|p| p.is_empty())
            .map(|delimiter| delimiter + 2)
            .unwrap_or(1);
        let mut envelope = parts;
        let body = envelope.split_off(split.min(envelope.len()));
        Ok(Some(Inbound {
            envelope,
            parts: body,
        }))
    }

    /// Send `parts` back to the peer identified by `envelope` on the reply endpoint.
    pub fn reply(&self, envelope: &[Vec<u8>], parts: Vec<Vec<u8>>) -> Result<()> {
        let socket = self.open_socket(Endpoint::Reply)?;
        let message: Vec<Vec<u8>> = envelope.iter().cloned().chain(parts).collect();
        socket.send_multipart(message, 0)?;
        Ok(())
    }

    /// Answer a shutdown signal with an empty acknowledgement.
    pub fn acknowledge(&self) -> Result<()> {
        let socket = self.open_socket(Endpoint::Signal)?;
        socket.send(zmq::Message::new(), 0)?;
        Ok(())
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("socket manager dropped with open endpoints");
            self.close_all();
        }
    }
}

fn bind_error(endpoint: &str, source: zmq::Error) -> StreamError {
    StreamError::Bind {
        endpoint: endpoint.to_string(),
        source,
    }
}

/// Port a wildcard-bound socket ended up on.
fn bound_port(socket: &zmq::Socket, requested: &str) -> Result<u16> {
    let last = socket
        .get_last_endpoint()
        .map_err(|source| bind_error(requested, source))?
        .map_err(|_| StreamError::Frame(format!("non UTF-8 endpoint bound for {}", requested)))?;

    parse_port(&last)
        .ok_or_else(|| StreamError::Frame(format!("no port in bound endpoint {}", last)))
}

fn parse_port(endpoint: &str) -> Option<u16> {
    endpoint
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok())
        .filter(|port| *port > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SocketManager {
        let config = ServerConfig {
            signal_endpoint: "inproc://sockets-test/signal".to_string(),
            ..Default::default()
        };
        SocketManager::new(Arc::new(zmq::Context::new()), config)
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("tcp://127.0.0.1:5555"), Some(5555));
        assert_eq!(parse_port("tcp://[::1]:40001"), Some(40001));
        assert_eq!(parse_port("tcp://127.0.0.1:0"), None);
        assert_eq!(parse_port("inproc://x"), None);
    }

    #[test]
    fn test_bind_allocates_distinct_ports() {
        let mut sockets = manager();
        let ports = sockets.bind().unwrap();
        assert!(ports.subscribe > 0);
        assert!(ports.reply > 0);
        assert_ne!(ports.subscribe, ports.reply);
        assert!(sockets.is_open());
        sockets.close_all();
        assert!(!sockets.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut sockets = manager();
        sockets.bind().unwrap();
        sockets.close_network();
        sockets.close_network();
        assert!(sockets.is_open(), "signal endpoint stays open");
        sockets.close_all();
        sockets.close_all();
        assert!(!sockets.is_open());
    }

    #[test]
    fn test_bind_failure_releases_everything() {
        let context = Arc::new(zmq::Context::new());
        let blocker = context.socket(zmq::REP).unwrap();
        blocker.bind("inproc://sockets-test/taken").unwrap();

        let config = ServerConfig {
            signal_endpoint: "inproc://sockets-test/taken".to_string(),
            ..Default::default()
        };
        let mut sockets = SocketManager::new(context, config);
        let err = sockets.bind().unwrap_err();
        assert!(matches!(err, StreamError::Bind { .. }));
        assert!(!sockets.is_open());
    }

    #[test]
    fn test_receive_on_closed_endpoint_fails() {
        let sockets = manager();
        assert!(sockets.receive(Endpoint::Subscribe).is_err());
        assert!(sockets.poll(0).is_err());
    }

    #[test]
    fn test_reply_envelope_is_split_from_body() {
        let mut sockets = manager();
        let ports = sockets.bind().unwrap();

        let context = zmq::Context::new();
        let req = context.socket(zmq::REQ).unwrap();
        req.set_linger(0).unwrap();
        req.connect(&format!("tcp://127.0.0.1:{}", ports.reply)).unwrap();
        req.send_multipart(["HELLO", "c1", "1"], 0).unwrap();

        let ready = sockets.poll(5000).unwrap();
        assert!(ready.is_ready(Endpoint::Reply));
        let inbound = sockets.receive(Endpoint::Reply).unwrap().unwrap();
        assert_eq!(inbound.envelope.len(), 2);
        assert_eq!(inbound.parts, vec![b"HELLO".to_vec(), b"c1".to_vec(), b"1".to_vec()]);

        sockets.reply(&inbound.envelope, inbound.parts.clone()).unwrap();
        req.set_rcvtimeo(5000).unwrap();
        assert_eq!(req.recv_multipart(0).unwrap(), inbound.parts);
        sockets.close_all();
    }

    #[test]
    fn test_correlated_request_keeps_request_id_in_envelope() {
        let mut sockets = manager();
        let ports = sockets.bind().unwrap();

        let context = zmq::Context::new();
        let req = context.socket(zmq::REQ).unwrap();
        req.set_linger(0).unwrap();
        req.set_req_relaxed(true).unwrap();
        req.set_req_correlate(true).unwrap();
        req.set_rcvtimeo(5000).unwrap();
        req.connect(&format!("tcp://127.0.0.1:{}", ports.reply)).unwrap();
        req.send_multipart(["GOODBYE", "c1"], 0).unwrap();

        sockets.poll(5000).unwrap();
        let inbound = sockets.receive(Endpoint::Reply).unwrap().unwrap();
        assert_eq!(inbound.envelope.len(), 3);
        assert_eq!(inbound.parts, vec![b"GOODBYE".to_vec(), b"c1".to_vec()]);

        sockets.reply(&inbound.envelope, inbound.parts.clone()).unwrap();
        assert_eq!(req.recv_multipart(0).unwrap(), inbound.parts);
        sockets.close_all();
    }
}
