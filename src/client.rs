//! Typed convenience calls on [`WorkerManager`].
//!
//! Each wrapper serialises a typed params struct, sends it with the
//! configured command timeout and decodes the typed result.

use crate::error::{WorkerError, WorkerResult};
use crate::manager::WorkerManager;
use crate::protocol::{to_params, Params, PONG};
use daq_driver_red_pitaya::{
    AsgChannel, AsgSetupParams, AsgState, ChannelParams, InputChannel, IqChannel, PidChannel,
    Quadratures, ScopeAcquireParams, ScopeTrace,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

impl WorkerManager {
    /// Round trip through the worker. Succeeds only on `"pong"`.
    pub fn ping(&self) -> WorkerResult<()> {
        let data = self.call("ping", Params::new())?;
        if data == PONG {
            Ok(())
        } else {
            Err(WorkerError::Command {
                command: "ping".to_string(),
                message: format!("unexpected reply {data}"),
            })
        }
    }

    /// Acquire one trace.
    ///
    /// The caller waits for the acquisition timeout on top of the command
    /// timeout, so a slow trigger is reported by the worker rather than as a
    /// caller-side timeout.
    pub fn scope_acquire(&self, params: &ScopeAcquireParams) -> WorkerResult<ScopeTrace> {
        let timeout = self.timeout()?.saturating_add(params.timeout_duration());
        let data = self.send_command("scope_acquire", to_params(params)?, timeout)?;
        Ok(serde_json::from_value(data)?)
    }

    pub fn asg_setup(&self, params: &AsgSetupParams) -> WorkerResult<()> {
        self.call("asg_setup", to_params(params)?)?;
        Ok(())
    }

    pub fn asg_state(&self, channel: AsgChannel) -> WorkerResult<AsgState> {
        self.typed_call("asg_get_state", &ChannelParams { channel })
    }

    pub fn pid_get_setpoint(&self, channel: PidChannel) -> WorkerResult<f64> {
        self.typed_call("pid_get_setpoint", &ChannelParams { channel })
    }

    pub fn iq_get_quadratures(&self, channel: IqChannel) -> WorkerResult<Quadratures> {
        self.typed_call("iq_get_quadratures", &ChannelParams { channel })
    }

    /// Instantaneous voltage on one input.
    pub fn sampler_read(&self, channel: InputChannel) -> WorkerResult<f64> {
        self.typed_call("sampler_read", &ChannelParams { channel })
    }

    fn typed_call<P: Serialize, R: DeserializeOwned>(
        &self,
        command: &str,
        params: &P,
    ) -> WorkerResult<R> {
        let data = self.call(command, to_params(params)?)?;
        Ok(serde_json::from_value(data)?)
    }

    fn timeout(&self) -> WorkerResult<Duration> {
        self.command_timeout().ok_or(WorkerError::WorkerNotRunning)
    }
}
