//! Producer-side client: the optimization process's end of the protocol.
//!
//! Connects a `REQ` socket to the reply port for the handshake and a `PUB`
//! socket to the subscribe port for notifications.
//!
//! # Example
//!
//! ```ignore
//! let mut client = ProgressClient::connect("127.0.0.1", ports, "run-1", Duration::from_secs(2))?;
//! client.hello()?;
//! client.publish(&Event::RunStarted { parameters: vec!["x".into()], kpis: vec!["y".into()] })?;
//! client.goodbye()?;
//! ```

use crate::error::{Result, StreamError};
use crate::events::Event;
use crate::protocol::{decode_frame, encode_frame, goodbye_frame, hello_frame, message_frame, Frame};
use crate::server::Ports;
use std::time::Duration;
use tracing::{debug, trace};

/// Client for publishing progress to an [`EventServer`](crate::server::EventServer).
pub struct ProgressClient {
    client_id: String,
    request: zmq::Socket,
    publisher: zmq::Socket,
    timeout: Duration,
    _context: zmq::Context,
}

impl ProgressClient {
    /// Connect to a server listening on `host` with the given ports.
    ///
    /// `timeout` bounds every handshake round trip.
    pub fn connect(host: &str, ports: Ports, client_id: &str, timeout: Duration) -> Result<Self> {
        let context = zmq::Context::new();
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        let request = context.socket(zmq::REQ)?;
        // Allow a new request after an unanswered one
        request.set_req_relaxed(true)?;
        request.set_req_correlate(true)?;
        request.set_linger(0)?;
        request.set_rcvtimeo(timeout_ms)?;
        request.set_sndtimeo(timeout_ms)?;
        request.connect(&format!("tcp://{}:{}", host, ports.reply))?;

        let publisher = context.socket(zmq::PUB)?;
        publisher.set_linger(timeout_ms)?;
        publisher.connect(&format!("tcp://{}:{}", host, ports.subscribe))?;

        debug!(%host, %ports, %client_id, "progress client connected");

        Ok(Self {
            client_id: client_id.to_string(),
            request,
            publisher,
            timeout,
            _context: context,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Send `frame` on the reply endpoint and wait for an answer.
    ///
    /// Returns `None` if nothing arrives within the timeout.
    pub fn request(&self, frame: &[String]) -> Result<Option<Frame>> {
        trace!(fields = frame.len(), "sending request");
        self.request.send_multipart(encode_frame(frame), 0)?;
        match self.request.recv_multipart(0) {
            Ok(parts) => Ok(Some(decode_frame(parts)?)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Perform the `HELLO` handshake.
    pub fn hello(&self) -> Result<()> {
        self.handshake(hello_frame(&self.client_id))
    }

    /// Close the session with `GOODBYE`.
    pub fn goodbye(&self) -> Result<()> {
        self.handshake(goodbye_frame(&self.client_id))
    }

    fn handshake(&self, frame: Frame) -> Result<()> {
        match self.request(&frame)? {
            Some(echo) if echo == frame => Ok(()),
            Some(echo) => Err(StreamError::Handshake(format!(
                "expected echo of {:?}, got {:?}",
                frame, echo
            ))),
            None => Err(StreamError::Handshake(format!(
                "no answer to {} within {:?}",
                frame[0], self.timeout
            ))),
        }
    }

    /// Publish an event as a `MESSAGE` notification.
    pub fn publish(&self, event: &Event) -> Result<()> {
        self.publish_raw(&event.to_payload())
    }

    /// Publish an arbitrary payload as a `MESSAGE` notification.
    pub fn publish_raw(&self, payload: &[u8]) -> Result<()> {
        let frame = message_frame(&self.client_id, payload)?;
        self.publish_frame(&frame)
    }

    /// Publish any frame on the subscribe endpoint.
    pub fn publish_frame(&self, frame: &[String]) -> Result<()> {
        self.publisher.send_multipart(encode_frame(frame), 0)?;
        Ok(())
    }
}
