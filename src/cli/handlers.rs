use crate::cli::commands::{EmitCommand, ListenCommand};
use crate::client::ProgressClient;
use crate::config::ServerConfig;
use crate::error::ErrorSeverity;
use crate::events::Event;
use crate::server::{EventServer, Notification, Ports};
use anyhow::{Context, Result};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Wait for the publisher connection before the first notification.
const PUBLISHER_SETTLE: Duration = Duration::from_millis(200);

/// Run the server until Ctrl-C or a critical error.
pub async fn handle_listen(cmd: ListenCommand) -> Result<()> {
    let mut config =
        ServerConfig::load(cmd.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = cmd.bind_host {
        config.bind_host = host;
    }

    let (server, notifications) = EventServer::channel(config)?;
    let ports = server.start().context("Failed to start event server")?;
    println!("subscribe_port={} reply_port={}", ports.subscribe, ports.reply);

    let drain = tokio::task::spawn_blocking(move || drain_notifications(notifications));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Ctrl-C received, stopping");
        }
        _ = drain => {
            warn!("notification stream ended");
        }
    }

    tokio::task::block_in_place(|| server.stop());
    Ok(())
}

/// Print events as JSON lines; returns on the first critical error.
fn drain_notifications(notifications: Receiver<Notification>) {
    for notification in notifications.iter() {
        match notification {
            Notification::Event(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "failed to render event"),
            },
            Notification::Error(ErrorSeverity::Warning, message) => warn!("{}", message),
            Notification::Error(ErrorSeverity::Critical, message) => {
                error!("{}", message);
                return;
            }
        }
    }
}

/// Handshake, publish a run with synthetic progress, say goodbye.
pub fn handle_emit(cmd: EmitCommand) -> Result<()> {
    let ports = Ports {
        subscribe: cmd.subscribe_port,
        reply: cmd.reply_port,
    };
    let client = ProgressClient::connect(
        &cmd.host,
        ports,
        &cmd.client_id,
        Duration::from_millis(cmd.timeout_ms),
    )?;
    thread::sleep(PUBLISHER_SETTLE);

    client.hello().context("Handshake failed")?;
    info!(client_id = %cmd.client_id, "handshake complete");

    client.publish(&Event::RunStarted {
        parameters: cmd.parameters.clone(),
        kpis: cmd.kpis.clone(),
    })?;

    for iteration in 0..cmd.points {
        client.publish(&synthetic_progress(
            iteration,
            cmd.parameters.len(),
            cmd.kpis.len(),
        ))?;
        thread::sleep(Duration::from_millis(cmd.interval_ms));
    }

    client.goodbye().context("Goodbye was not acknowledged")?;
    info!(points = cmd.points, "run published");
    Ok(())
}

/// Deterministic point on a quadratic bowl.
fn synthetic_progress(iteration: u64, parameters: usize, kpis: usize) -> Event {
    let step = (iteration + 1) as f64;
    let point: Vec<f64> = (0..parameters).map(|i| step / (i + 1) as f64).collect();
    let distance: f64 = point.iter().map(|x| x * x).sum();
    Event::Progress {
        point,
        kpis: (0..kpis).map(|k| distance * (k + 1) as f64).collect(),
        iteration: Some(iteration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_progress_shape() {
        match synthetic_progress(1, 2, 3) {
            Event::Progress {
                point,
                kpis,
                iteration,
            } => {
                assert_eq!(point, vec![2.0, 1.0]);
                assert_eq!(kpis, vec![5.0, 10.0, 15.0]);
                assert_eq!(iteration, Some(1));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
