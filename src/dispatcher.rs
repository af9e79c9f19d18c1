//! Worker-side command dispatch.
//!
//! The [`Dispatcher`] owns the device facade and turns every
//! [`CommandEnvelope`] into exactly one [`ResponseEnvelope`]. Unknown
//! commands, bad params, device errors and even panics inside a handler all
//! become error envelopes; nothing escapes to the receive loop.

use crate::protocol::{Command, CommandEnvelope, ResponseEnvelope, PONG, SHUTDOWN_ACK};
use daq_driver_red_pitaya::{DeviceError, RedPitaya};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use thiserror::Error;

/// Result of dispatching one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send the response and keep serving.
    Continue(ResponseEnvelope),
    /// Send the response, then stop the worker loop.
    Shutdown(ResponseEnvelope),
}

impl Outcome {
    pub fn response(&self) -> &ResponseEnvelope {
        match self {
            Outcome::Continue(response) | Outcome::Shutdown(response) => response,
        }
    }

    pub fn into_response(self) -> ResponseEnvelope {
        match self {
            Outcome::Continue(response) | Outcome::Shutdown(response) => response,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Outcome::Shutdown(_))
    }
}

#[derive(Error, Debug)]
enum HandlerError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Maps commands onto the device facade.
pub struct Dispatcher {
    device: Box<dyn RedPitaya>,
}

impl Dispatcher {
    pub fn new(device: Box<dyn RedPitaya>) -> Self {
        Self { device }
    }

    /// Whether the underlying device is simulated.
    pub fn is_mock(&self) -> bool {
        self.device.is_mock()
    }

    /// Query the instrument identity.
    pub async fn identify(&mut self) -> Result<String, DeviceError> {
        self.device.identify().await
    }

    /// Execute one envelope and produce its response.
    pub async fn dispatch(&mut self, envelope: CommandEnvelope) -> Outcome {
        let CommandEnvelope {
            id,
            command: name,
            params,
        } = envelope;

        let command = match Command::parse(&name, &params) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(id, command = %name, error = %err, "Rejected command");
                return Outcome::Continue(ResponseEnvelope::error(Some(id), err));
            }
        };

        if command == Command::Shutdown {
            tracing::info!(id, "Shutdown requested");
            return Outcome::Shutdown(ResponseEnvelope::ok(Some(id), Value::from(SHUTDOWN_ACK)));
        }

        let module = command.module().map(|module| module.as_str());
        tracing::debug!(id, command = %name, module, "Dispatching command");
        let result = AssertUnwindSafe(self.execute(command)).catch_unwind().await;

        let response = match result {
            Ok(Ok(data)) => ResponseEnvelope::ok(Some(id), data),
            Ok(Err(err)) => {
                tracing::warn!(id, command = %name, module, error = %err, "Command failed");
                ResponseEnvelope::error(Some(id), err)
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(id, command = %name, %reason, "Command handler panicked");
                ResponseEnvelope::error(Some(id), format!("command '{name}' panicked: {reason}"))
            }
        };
        Outcome::Continue(response)
    }

    async fn execute(&mut self, command: Command) -> Result<Value, HandlerError> {
        let device = self.device.as_mut();
        let data = match command {
            Command::Ping => Value::from(device.ping().await?),
            Command::Echo(params) => Value::Object(params),
            Command::ScopeAcquire(params) => encode(device.scope_acquire(&params).await?)?,
            Command::ScopeSetDecimation(params) => {
                device.scope_set_decimation(params.value).await?;
                Value::Null
            }
            Command::ScopeSetTrigger(params) => {
                device.scope_set_trigger(params.source).await?;
                Value::Null
            }
            Command::AsgSetup(params) => {
                device.asg_setup(&params).await?;
                Value::Null
            }
            Command::AsgGetState(params) => encode(device.asg_state(params.channel).await?)?,
            Command::PidConfigure(params) => {
                device.pid_configure(&params).await?;
                Value::Null
            }
            Command::PidSetSetpoint(params) => {
                device.pid_set_setpoint(params.channel, params.value).await?;
                Value::Null
            }
            Command::PidGetSetpoint(params) => {
                Value::from(device.pid_get_setpoint(params.channel).await?)
            }
            Command::IqSetup(params) => {
                device.iq_setup(&params).await?;
                Value::Null
            }
            Command::IqGetQuadratures(params) => {
                encode(device.iq_get_quadratures(params.channel).await?)?
            }
            Command::SamplerRead(params) => Value::from(device.sampler_read(params.channel).await?),
            // Intercepted in `dispatch`.
            Command::Shutdown => Value::from(SHUTDOWN_ACK),
        };
        Ok(data)
    }

    /// Close the device connection, logging any failure.
    pub async fn close(&mut self) {
        if let Err(err) = self.device.close().await {
            tracing::warn!(error = %err, "Failed to close device cleanly");
        }
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, HandlerError> {
    Ok(serde_json::to_value(value)?)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Params, ResponseStatus};
    use async_trait::async_trait;
    use daq_driver_red_pitaya::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn mock_dispatcher() -> Dispatcher {
        Dispatcher::new(Box::new(MockRedPitaya::new(Some(11))))
    }

    fn envelope(id: u64, command: &str, params: Value) -> CommandEnvelope {
        let params = match params {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        CommandEnvelope::new(id, command, params)
    }

    #[tokio::test]
    async fn test_ping_returns_pong_with_same_id() {
        let mut dispatcher = mock_dispatcher();
        let outcome = dispatcher.dispatch(envelope(42, "ping", json!({}))).await;
        assert_eq!(
            outcome,
            Outcome::Continue(ResponseEnvelope::ok(Some(42), json!(PONG)))
        );
    }

    #[tokio::test]
    async fn test_unknown_command_is_an_error_envelope() {
        let mut dispatcher = mock_dispatcher();
        let response = dispatcher
            .dispatch(envelope(1, "scope.data", json!({})))
            .await
            .into_response();
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.id, Some(1));
        assert!(response.message().contains("unknown command"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_device_error_text_becomes_data() {
        let mut dispatcher = mock_dispatcher();
        let response = dispatcher
            .dispatch(envelope(
                2,
                "pid_configure",
                json!({"channel": "pid1", "p": 0.1, "d": 0.0}),
            ))
            .await
            .into_response();
        assert!(!response.is_ok());
        assert!(response.message().starts_with("invalid parameter:"));
        assert!(logs_contain("pid1"));

        // The worker keeps serving afterwards.
        let next = dispatcher.dispatch(envelope(3, "ping", json!({}))).await;
        assert!(next.response().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_is_intercepted() {
        let mut dispatcher = mock_dispatcher();
        let outcome = dispatcher.dispatch(envelope(5, "shutdown", json!({}))).await;
        assert!(outcome.is_shutdown());
        assert_eq!(outcome.response().data, json!(SHUTDOWN_ACK));
    }

    #[tokio::test]
    async fn test_acquisition_payload_shape() {
        let mut dispatcher = mock_dispatcher();
        let response = dispatcher
            .dispatch(envelope(
                6,
                "scope_acquire",
                json!({
                    "decimation": 64,
                    "trigger_source": "immediately",
                    "input_channel": "in1",
                    "timeout": 5.0
                }),
            ))
            .await
            .into_response();
        assert!(response.is_ok());
        let trace: ScopeTrace = serde_json::from_value(response.data).unwrap();
        assert_eq!(trace.voltage.len(), trace.time.len());
        assert!(!trace.is_empty());
    }

    #[tokio::test]
    async fn test_setpoint_round_trip_and_echo() {
        let mut dispatcher = mock_dispatcher();
        let set = dispatcher
            .dispatch(envelope(
                7,
                "pid_set_setpoint",
                json!({"channel": "pid2", "value": 0.3}),
            ))
            .await;
        assert_eq!(set.response().data, Value::Null);

        let get = dispatcher
            .dispatch(envelope(8, "pid_get_setpoint", json!({"channel": "pid2"})))
            .await;
        assert_eq!(get.response().data, json!(0.3));

        let echo = dispatcher
            .dispatch(envelope(9, "echo", json!({"marker": "thread-3"})))
            .await;
        assert_eq!(echo.response().data, json!({"marker": "thread-3"}));
    }

    struct PanickingDevice;

    #[async_trait]
    impl RedPitaya for PanickingDevice {
        async fn identify(&mut self) -> DeviceResult<String> {
            Ok("panicky".to_string())
        }
        async fn scope_acquire(&mut self, _: &ScopeAcquireParams) -> DeviceResult<ScopeTrace> {
            panic!("driver exploded");
        }
        async fn scope_set_decimation(&mut self, _: u32) -> DeviceResult<()> {
            Ok(())
        }
        async fn scope_set_trigger(&mut self, _: TriggerSource) -> DeviceResult<()> {
            Ok(())
        }
        async fn asg_setup(&mut self, _: &AsgSetupParams) -> DeviceResult<()> {
            Ok(())
        }
        async fn asg_state(&mut self, _: AsgChannel) -> DeviceResult<AsgState> {
            Ok(AsgState::default())
        }
        async fn pid_configure(&mut self, _: &PidConfigureParams) -> DeviceResult<()> {
            Ok(())
        }
        async fn pid_set_setpoint(&mut self, _: PidChannel, _: f64) -> DeviceResult<()> {
            Ok(())
        }
        async fn pid_get_setpoint(&mut self, _: PidChannel) -> DeviceResult<f64> {
            Ok(0.0)
        }
        async fn iq_setup(&mut self, _: &IqSetupParams) -> DeviceResult<()> {
            Ok(())
        }
        async fn iq_get_quadratures(&mut self, _: IqChannel) -> DeviceResult<Quadratures> {
            Ok(Quadratures { i: 0.0, q: 0.0 })
        }
        async fn sampler_read(&mut self, _: InputChannel) -> DeviceResult<f64> {
            Err(DeviceError::Communication("link down".to_string()))
        }
        async fn close(&mut self) -> DeviceResult<()> {
            Ok(())
        }
        fn is_mock(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_handler_panic_is_contained() {
        let mut dispatcher = Dispatcher::new(Box::new(PanickingDevice));
        let response = dispatcher
            .dispatch(envelope(10, "scope_acquire", json!({})))
            .await
            .into_response();
        assert_eq!(response.id, Some(10));
        assert!(!response.is_ok());
        assert!(response.message().contains("driver exploded"));
        assert!(logs_contain("Command handler panicked"));

        let response = dispatcher
            .dispatch(envelope(11, "sampler_read", json!({"channel": "in1"})))
            .await
            .into_response();
        assert_eq!(response.message(), "communication error: link down");
    }
}
