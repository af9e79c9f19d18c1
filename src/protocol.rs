//! Command and response envelopes exchanged with the worker.
//!
//! Both envelopes are plain serde data so the same shapes work over the
//! in-process channel pair and over newline-delimited JSON on stdio.
//!
//! # Command set
//!
//! | command | params | success data |
//! |---|---|---|
//! | `ping` | `{}` | `"pong"` |
//! | `echo` | anything | the params object |
//! | `scope_acquire` | decimation, trigger_source, input_channel, timeout | `{voltage, time}` |
//! | `scope_set_decimation` | value | `null` |
//! | `scope_set_trigger` | source | `null` |
//! | `asg_setup` | channel, waveform, frequency, amplitude, offset, output_direct, trigger_source | `null` |
//! | `asg_get_state` | channel | ASG state |
//! | `pid_configure` | channel, p, i?, d?, setpoint, input, output_direct | `null` |
//! | `pid_set_setpoint` | channel, value | `null` |
//! | `pid_get_setpoint` | channel | float |
//! | `iq_setup` | channel, frequency, bandwidth, input, output_direct | `null` |
//! | `iq_get_quadratures` | channel | `{i, q}` |
//! | `sampler_read` | channel | float |
//! | `shutdown` | `{}` | `"Server shutting down"` |

use daq_driver_red_pitaya::{
    AsgChannel, AsgSetupParams, ChannelParams, DecimationParams, InputChannel, IqChannel,
    IqSetupParams, Module, PidChannel, PidConfigureParams, ScopeAcquireParams, SetpointParams,
    TriggerParams,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Command parameters: a JSON object.
pub type Params = serde_json::Map<String, Value>;

/// Data returned for `ping`.
pub const PONG: &str = "pong";

/// Data returned when the worker acknowledges `shutdown`.
pub const SHUTDOWN_ACK: &str = "Server shutting down";

/// Request sent to the worker. `id` is assigned by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: u64,
    pub command: String,
    #[serde(default)]
    pub params: Params,
}

impl CommandEnvelope {
    pub fn new(id: u64, command: impl Into<String>, params: Params) -> Self {
        Self {
            id,
            command: command.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Reply from the worker.
///
/// `id` echoes the request; it is absent only on the bootstrap message the
/// worker sends once its device is connected (or failed to connect).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: Value,
}

impl ResponseEnvelope {
    pub fn ok(id: Option<u64>, data: Value) -> Self {
        Self {
            id,
            status: ResponseStatus::Ok,
            data,
        }
    }

    /// Error envelope whose data is the message text.
    pub fn error(id: Option<u64>, message: impl fmt::Display) -> Self {
        Self {
            id,
            status: ResponseStatus::Error,
            data: Value::String(message.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Human-readable description of an error envelope's data.
    pub fn message(&self) -> String {
        match &self.data {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Why an envelope could not be turned into a [`Command`].
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid params for '{command}': {source}")]
    InvalidParams {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A parsed, typed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Echo(Params),
    ScopeAcquire(ScopeAcquireParams),
    ScopeSetDecimation(DecimationParams),
    ScopeSetTrigger(TriggerParams),
    AsgSetup(AsgSetupParams),
    AsgGetState(ChannelParams<AsgChannel>),
    PidConfigure(PidConfigureParams),
    PidSetSetpoint(SetpointParams),
    PidGetSetpoint(ChannelParams<PidChannel>),
    IqSetup(IqSetupParams),
    IqGetQuadratures(ChannelParams<IqChannel>),
    SamplerRead(ChannelParams<InputChannel>),
    Shutdown,
}

impl Command {
    /// Every command name the worker accepts.
    pub const NAMES: &'static [&'static str] = &[
        "ping",
        "echo",
        "scope_acquire",
        "scope_set_decimation",
        "scope_set_trigger",
        "asg_setup",
        "asg_get_state",
        "pid_configure",
        "pid_set_setpoint",
        "pid_get_setpoint",
        "iq_setup",
        "iq_get_quadratures",
        "sampler_read",
        "shutdown",
    ];

    /// Resolve a command name and its params.
    ///
    /// `ping` and `shutdown` ignore their params.
    pub fn parse(name: &str, params: &Params) -> Result<Self, ProtocolError> {
        let command = match name {
            "ping" => Command::Ping,
            "echo" => Command::Echo(params.clone()),
            "scope_acquire" => Command::ScopeAcquire(typed(name, params)?),
            "scope_set_decimation" => Command::ScopeSetDecimation(typed(name, params)?),
            "scope_set_trigger" => Command::ScopeSetTrigger(typed(name, params)?),
            "asg_setup" => Command::AsgSetup(typed(name, params)?),
            "asg_get_state" => Command::AsgGetState(typed(name, params)?),
            "pid_configure" => Command::PidConfigure(typed(name, params)?),
            "pid_set_setpoint" => Command::PidSetSetpoint(typed(name, params)?),
            "pid_get_setpoint" => Command::PidGetSetpoint(typed(name, params)?),
            "iq_setup" => Command::IqSetup(typed(name, params)?),
            "iq_get_quadratures" => Command::IqGetQuadratures(typed(name, params)?),
            "sampler_read" => Command::SamplerRead(typed(name, params)?),
            "shutdown" => Command::Shutdown,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Echo(_) => "echo",
            Command::ScopeAcquire(_) => "scope_acquire",
            Command::ScopeSetDecimation(_) => "scope_set_decimation",
            Command::ScopeSetTrigger(_) => "scope_set_trigger",
            Command::AsgSetup(_) => "asg_setup",
            Command::AsgGetState(_) => "asg_get_state",
            Command::PidConfigure(_) => "pid_configure",
            Command::PidSetSetpoint(_) => "pid_set_setpoint",
            Command::PidGetSetpoint(_) => "pid_get_setpoint",
            Command::IqSetup(_) => "iq_setup",
            Command::IqGetQuadratures(_) => "iq_get_quadratures",
            Command::SamplerRead(_) => "sampler_read",
            Command::Shutdown => "shutdown",
        }
    }

    /// The board module this command addresses, if any.
    pub fn module(&self) -> Option<Module> {
        let module = match self {
            Command::Ping | Command::Echo(_) | Command::Shutdown => return None,
            Command::ScopeAcquire(_)
            | Command::ScopeSetDecimation(_)
            | Command::ScopeSetTrigger(_) => Module::Scope,
            Command::AsgSetup(params) => params.channel.into(),
            Command::AsgGetState(params) => params.channel.into(),
            Command::PidConfigure(params) => params.channel.into(),
            Command::PidSetSetpoint(params) => params.channel.into(),
            Command::PidGetSetpoint(params) => params.channel.into(),
            Command::IqSetup(params) => params.channel.into(),
            Command::IqGetQuadratures(params) => params.channel.into(),
            Command::SamplerRead(_) => Module::Sampler,
        };
        Some(module)
    }
}

fn typed<T: DeserializeOwned>(command: &str, params: &Params) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|source| {
        ProtocolError::InvalidParams {
            command: command.to_string(),
            source,
        }
    })
}

/// Convert any serialisable params struct into a [`Params`] object.
pub fn to_params<T: Serialize>(value: &T) -> Result<Params, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Params::new()),
        other => Err(serde::ser::Error::custom(format!(
            "params must serialise to an object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_driver_red_pitaya::{TriggerSource, Waveform};
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_every_name_parses_or_needs_params() {
        for name in Command::NAMES {
            match Command::parse(name, &Params::new()) {
                Ok(command) => assert_eq!(command.name(), *name),
                Err(err) => assert!(
                    matches!(err, ProtocolError::InvalidParams { .. }),
                    "{name}: {err}"
                ),
            }
        }
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::parse("self_destruct", &Params::new()).unwrap_err();
        assert_eq!(err.to_string(), "unknown command: self_destruct");
    }

    #[test]
    fn test_parse_scope_acquire() {
        let command = Command::parse(
            "scope_acquire",
            &params(json!({
                "decimation": 64,
                "trigger_source": "immediately",
                "input_channel": "in1",
                "timeout": 5.0
            })),
        )
        .unwrap();
        match command {
            Command::ScopeAcquire(p) => {
                assert_eq!(p.decimation, Some(64));
                assert_eq!(p.trigger_source, Some(TriggerSource::Immediately));
                assert_eq!(p.timeout, 5.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invalid_params_names_command() {
        let err = Command::parse(
            "asg_setup",
            &params(json!({"channel": "asg0", "waveform": "triangle"})),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("invalid params for 'asg_setup'"));

        let err = Command::parse("pid_get_setpoint", &params(json!({"channel": "pid9"})))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParams { .. }));
    }

    #[test]
    fn test_command_addresses_module() {
        let command = Command::parse(
            "pid_set_setpoint",
            &params(json!({"channel": "pid2", "value": 0.1})),
        )
        .unwrap();
        assert_eq!(command.module(), Some(Module::Pid2));

        let command =
            Command::parse("iq_get_quadratures", &params(json!({"channel": "iq1"}))).unwrap();
        assert_eq!(command.module(), Some(Module::Iq1));

        let command = Command::parse("sampler_read", &params(json!({"channel": "in2"}))).unwrap();
        assert_eq!(command.module(), Some(Module::Sampler));
        assert_eq!(
            Command::parse("scope_acquire", &Params::new()).unwrap().module(),
            Some(Module::Scope)
        );
        assert_eq!(Command::Ping.module(), None);
    }

    #[test]
    fn test_to_params_skips_unset_overrides() {
        let map = to_params(&AsgSetupParams {
            channel: AsgChannel::Asg1,
            waveform: Some(Waveform::Square),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"channel": "asg1", "waveform": "square"})
        );
    }

    #[test]
    fn test_response_wire_shape() {
        let ok = ResponseEnvelope::ok(Some(7), json!(PONG));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"id": 7, "status": "ok", "data": "pong"})
        );

        let bootstrap: ResponseEnvelope =
            serde_json::from_str(r#"{"status":"error","data":"connection failed"}"#).unwrap();
        assert_eq!(bootstrap.id, None);
        assert!(!bootstrap.is_ok());
        assert_eq!(bootstrap.message(), "connection failed");
    }

    #[test]
    fn test_command_envelope_params_default_to_empty() {
        let envelope: CommandEnvelope =
            serde_json::from_str(r#"{"id": 3, "command": "ping"}"#).unwrap();
        assert_eq!(envelope, CommandEnvelope::new(3, "ping", Params::new()));
    }
}
