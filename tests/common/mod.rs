//! Common test utilities for the event server integration tests

#![allow(dead_code)]

use optistream_core::{EventServer, Notification, Ports, ProgressClient, ServerConfig, ServerState};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

/// Generous bound for anything crossing the loopback network.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Time for a freshly connected PUB socket to reach the server's SUB.
pub const PUBLISHER_SETTLE: Duration = Duration::from_millis(300);

pub struct TestServer {
    pub server: EventServer,
    pub notifications: Receiver<Notification>,
    pub ports: Ports,
}

/// Start a server on 127.0.0.1 with channel-backed callbacks.
pub fn start_test_server() -> TestServer {
    let (server, notifications) =
        EventServer::channel(ServerConfig::default()).expect("server construction");
    let ports = server.start().expect("server start");
    TestServer {
        server,
        notifications,
        ports,
    }
}

/// Connect a client and wait for its publisher to attach.
pub fn connect_client(ports: Ports, client_id: &str, timeout: Duration) -> ProgressClient {
    let client = ProgressClient::connect("127.0.0.1", ports, client_id, timeout)
        .expect("client connect");
    thread::sleep(PUBLISHER_SETTLE);
    client
}

/// Start a server and complete the handshake for `client_id`.
pub fn receiving_server(client_id: &str) -> (TestServer, ProgressClient) {
    let test = start_test_server();
    let client = connect_client(test.ports, client_id, RECV_TIMEOUT);
    client.hello().expect("handshake");
    assert_eq!(test.server.state(), ServerState::Receiving);
    (test, client)
}

/// Poll until the server reaches `state` or `timeout` elapses.
pub fn wait_for_state(server: &EventServer, state: ServerState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if server.state() == state {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    server.state() == state
}

pub fn frame(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}
