//! Event-streaming server for an external optimization process.
//!
//! The server binds a reply endpoint (handshake), a subscribe endpoint
//! (progress notifications), and a local signal endpoint (shutdown). A
//! dedicated thread waits on all three, runs each frame through the protocol
//! state machine, and hands decoded [`Event`]s to the host.
//!
//! # Example
//!
//! ```no_run
//! use optistream_core::{EventServer, Notification, ServerConfig};
//!
//! let (server, notifications) = EventServer::channel(ServerConfig::default())?;
//! let ports = server.start()?;
//! println!("subscribe={} reply={}", ports.subscribe, ports.reply);
//!
//! for notification in notifications.iter() {
//!     match notification {
//!         Notification::Event(event) => println!("{:?}", event),
//!         Notification::Error(severity, message) => eprintln!("{}: {}", severity, message),
//!     }
//! }
//! server.stop();
//! # Ok::<(), optistream_core::StreamError>(())
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use client::ProgressClient;
pub use config::ServerConfig;
pub use error::{DeserializationError, ErrorSeverity, Result, StreamError};
pub use events::Event;
pub use server::{EventServer, Notification, Ports, ServerState};
