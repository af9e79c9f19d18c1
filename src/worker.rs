//! Worker entry point.
//!
//! The worker owns the one device connection for its whole life. It connects,
//! reports the outcome in an id-less bootstrap envelope, then serves commands
//! strictly one at a time until it processes `shutdown` or its inbound
//! channel closes. The device is closed on the way out.

use crate::config::WorkerConfig;
use crate::dispatcher::Dispatcher;
use crate::protocol::{CommandEnvelope, ResponseEnvelope};
use serde_json::json;
use std::io;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "pitaya-worker";

/// Connect the device described by `config`.
///
/// On success returns the dispatcher and the `ok` bootstrap envelope; on
/// failure returns the `error` bootstrap envelope.
pub async fn bootstrap(
    config: &WorkerConfig,
) -> Result<(Dispatcher, ResponseEnvelope), ResponseEnvelope> {
    let device = match daq_driver_red_pitaya::connect(&config.device_config()).await {
        Ok(device) => device,
        Err(err) => {
            tracing::error!(host = %config.hostname, error = %err, "Device connection failed");
            return Err(ResponseEnvelope::error(None, err));
        }
    };

    let mut dispatcher = Dispatcher::new(device);
    let identity = match dispatcher.identify().await {
        Ok(identity) => identity,
        Err(err) => {
            dispatcher.close().await;
            return Err(ResponseEnvelope::error(None, err));
        }
    };

    tracing::info!(
        %identity,
        host = %config.hostname,
        config_name = %config.config_name,
        mock = config.mock_mode,
        "Worker ready"
    );
    let ready = ResponseEnvelope::ok(
        None,
        json!({
            "identity": identity,
            "hostname": config.hostname,
            "config_name": config.config_name,
            "mock": dispatcher.is_mock(),
        }),
    );
    Ok((dispatcher, ready))
}

/// Worker body: bootstrap, then the receive, dispatch, send loop.
pub async fn serve(
    config: WorkerConfig,
    mut inbound: UnboundedReceiver<CommandEnvelope>,
    outbound: UnboundedSender<ResponseEnvelope>,
) {
    let mut dispatcher = match bootstrap(&config).await {
        Ok((dispatcher, ready)) => {
            if outbound.send(ready).is_err() {
                tracing::warn!("Manager went away before the worker became ready");
                let mut dispatcher = dispatcher;
                dispatcher.close().await;
                return;
            }
            dispatcher
        }
        Err(failure) => {
            let _ = outbound.send(failure);
            return;
        }
    };

    while let Some(envelope) = inbound.recv().await {
        let outcome = dispatcher.dispatch(envelope).await;
        let stop = outcome.is_shutdown();
        if outbound.send(outcome.into_response()).is_err() {
            tracing::warn!("Response channel closed; stopping worker");
            break;
        }
        if stop {
            break;
        }
    }

    dispatcher.close().await;
    tracing::info!("Worker stopped");
}

/// Run the worker on its own thread with a private single-threaded runtime.
pub fn spawn(
    config: WorkerConfig,
    inbound: UnboundedReceiver<CommandEnvelope>,
    outbound: UnboundedSender<ResponseEnvelope>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to build worker runtime");
                    let _ = outbound.send(ResponseEnvelope::error(
                        None,
                        format!("failed to start worker runtime: {err}"),
                    ));
                    return;
                }
            };
            runtime.block_on(serve(config, inbound, outbound));
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Params, PONG, SHUTDOWN_ACK};
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_serve_bootstraps_then_stops_on_shutdown() {
        let (inbound_tx, inbound_rx) = unbounded_channel();
        let (outbound_tx, mut outbound_rx) = unbounded_channel();

        inbound_tx
            .send(CommandEnvelope::new(1, "ping", Params::new()))
            .unwrap();
        inbound_tx
            .send(CommandEnvelope::new(2, "shutdown", Params::new()))
            .unwrap();
        inbound_tx
            .send(CommandEnvelope::new(3, "ping", Params::new()))
            .unwrap();

        serve(WorkerConfig::mock(), inbound_rx, outbound_tx).await;

        let bootstrap = outbound_rx.recv().await.unwrap();
        assert_eq!(bootstrap.id, None);
        assert!(bootstrap.is_ok());
        assert_eq!(bootstrap.data["mock"], json!(true));

        let pong = outbound_rx.recv().await.unwrap();
        assert_eq!((pong.id, pong.data), (Some(1), json!(PONG)));

        let ack = outbound_rx.recv().await.unwrap();
        assert_eq!((ack.id, ack.data), (Some(2), json!(SHUTDOWN_ACK)));

        // Command 3 was never served.
        assert!(outbound_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_connection_sends_error_bootstrap() {
        let config = WorkerConfig {
            hostname: "127.0.0.1".to_string(),
            port: 1,
            mock_mode: false,
            ..WorkerConfig::default()
        };
        let (_inbound_tx, inbound_rx) = unbounded_channel();
        let (outbound_tx, mut outbound_rx) = unbounded_channel();

        serve(config, inbound_rx, outbound_tx).await;

        let bootstrap = outbound_rx.recv().await.unwrap();
        assert_eq!(bootstrap.id, None);
        assert!(!bootstrap.is_ok());
        assert!(bootstrap.message().contains("connection failed"));
        assert!(outbound_rx.recv().await.is_none());
    }
}
