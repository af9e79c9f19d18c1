//! In-memory Red Pitaya for hardware-free operation.
//!
//! # Signal model
//!
//! The two DAC outputs are looped back onto the fast inputs: `in1` sees every
//! running generator routed to `out1` (or `both`), `in2` every generator
//! routed to `out2`. Traces and sampler readings carry 1 mV of seeded noise.
//!
//! Trigger behaviour follows the loopback: `immediately` always fires, input
//! edge triggers fire only when the watched input carries a time-varying
//! signal, ASG edge triggers fire when any generator is running, and external
//! triggers never fire because nothing is wired to the trigger input. An
//! acquisition that cannot fire waits out its timeout and fails with
//! [`DeviceError::AcquisitionTimeout`].
//!
//! IQ quadratures are computed from the generators feeding the demodulator
//! input whose frequency lies within the demodulator bandwidth of its centre
//! frequency.

use crate::driver::RedPitaya;
use crate::error::{DeviceError, DeviceResult};
use crate::rng::MockRng;
use crate::types::*;
use async_trait::async_trait;
use std::f64::consts::{PI, TAU};
use std::time::{Duration, Instant};

/// Amplitude of the uniform noise added to simulated voltages.
const NOISE_VOLTS: f64 = 1e-3;

/// Identity reported by the simulated board.
pub const MOCK_IDENTITY: &str = "Red Pitaya,MOCK,00000,0.0.0";

/// Simulated board.
#[derive(Debug)]
pub struct MockRedPitaya {
    rng: MockRng,
    latency: Duration,
    started: Instant,
    closed: bool,
    scope: ScopeState,
    asg: [AsgState; 2],
    pid: [PidState; 3],
    iq: [IqState; 3],
}

impl Default for MockRedPitaya {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MockRedPitaya {
    /// Create a board in its power-on state.
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: MockRng::new(seed),
            latency: Duration::ZERO,
            started: Instant::now(),
            closed: false,
            scope: ScopeState::default(),
            asg: [AsgState::default(); 2],
            pid: [PidState::default(); 3],
            iq: [IqState::default(); 3],
        }
    }

    /// Delay every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Current scope configuration.
    pub fn scope(&self) -> &ScopeState {
        &self.scope
    }

    /// Current state of one signal generator.
    pub fn asg(&self, channel: AsgChannel) -> &AsgState {
        &self.asg[channel.index()]
    }

    /// Current state of one PID controller.
    pub fn pid(&self, channel: PidChannel) -> &PidState {
        &self.pid[channel.index()]
    }

    /// Current state of one IQ demodulator.
    pub fn iq(&self, channel: IqChannel) -> &IqState {
        &self.iq[channel.index()]
    }

    async fn begin(&self) -> DeviceResult<()> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(())
    }

    fn running_generators(&self) -> impl Iterator<Item = &AsgState> {
        self.asg.iter().filter(|asg| asg.is_running())
    }

    /// Running generators whose output is looped back onto `input`.
    fn routed_to(&self, input: InputChannel) -> impl Iterator<Item = &AsgState> {
        self.running_generators()
            .filter(move |asg| asg.output_direct.drives(input))
    }

    /// Noise-free voltage on `input` at time `t` seconds.
    fn input_voltage(&self, input: InputChannel, t: f64) -> f64 {
        self.routed_to(input).map(|asg| generator_voltage(asg, t)).sum()
    }

    fn input_is_varying(&self, input: InputChannel) -> bool {
        self.routed_to(input).any(is_varying)
    }

    fn trigger_fires(&self, source: TriggerSource) -> bool {
        use TriggerSource::*;
        match source {
            Immediately => true,
            Ch1PositiveEdge | Ch1NegativeEdge => self.input_is_varying(InputChannel::In1),
            Ch2PositiveEdge | Ch2NegativeEdge => self.input_is_varying(InputChannel::In2),
            AsgPositiveEdge | AsgNegativeEdge => self.running_generators().any(is_varying),
            ExtPositiveEdge | ExtNegativeEdge => false,
        }
    }

    /// Generators whose signal reaches an IQ module fed from `input`.
    fn iq_sources(&self, input: SignalSource) -> Vec<&AsgState> {
        match input {
            SignalSource::In1 => self.routed_to(InputChannel::In1).collect(),
            SignalSource::In2 => self.routed_to(InputChannel::In2).collect(),
            SignalSource::Asg0 => vec![&self.asg[0]],
            SignalSource::Asg1 => vec![&self.asg[1]],
            _ => Vec::new(),
        }
    }
}

/// Instantaneous output of one generator.
fn generator_voltage(asg: &AsgState, t: f64) -> f64 {
    let phase = (asg.frequency * t).fract();
    let shape = match asg.waveform {
        Waveform::Sin => (TAU * phase).sin(),
        Waveform::Cos => (TAU * phase).cos(),
        Waveform::Ramp => 2.0 * phase - 1.0,
        Waveform::HalfRamp => phase,
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Dc => 1.0,
    };
    asg.offset + asg.amplitude * shape
}

fn is_varying(asg: &AsgState) -> bool {
    asg.waveform != Waveform::Dc && asg.amplitude > 0.0 && asg.frequency > 0.0
}

#[async_trait]
impl RedPitaya for MockRedPitaya {
    async fn identify(&mut self) -> DeviceResult<String> {
        self.begin().await?;
        Ok(MOCK_IDENTITY.to_string())
    }

    async fn ping(&mut self) -> DeviceResult<&'static str> {
        self.begin().await?;
        Ok("pong")
    }

    async fn scope_acquire(&mut self, params: &ScopeAcquireParams) -> DeviceResult<ScopeTrace> {
        params.validate()?;
        self.begin().await?;
        let settings = ScopeState {
            decimation: params.decimation.unwrap_or(self.scope.decimation),
            trigger_source: params.trigger_source.unwrap_or(self.scope.trigger_source),
            input_channel: params.input_channel.unwrap_or(self.scope.input_channel),
        };
        self.scope = settings;

        if !self.trigger_fires(settings.trigger_source) {
            let timeout = params.timeout_duration();
            tracing::debug!(trigger = %settings.trigger_source, ?timeout, "Mock trigger never fires");
            tokio::time::sleep(timeout).await;
            return Err(DeviceError::AcquisitionTimeout(timeout));
        }

        let dt = sample_period(settings.decimation);
        let mut voltage: Vec<f64> = (0..TRACE_LENGTH)
            .map(|i| self.input_voltage(settings.input_channel, i as f64 * dt))
            .collect();
        self.rng.add_noise(&mut voltage, NOISE_VOLTS);
        ScopeTrace::from_samples(voltage, settings.decimation)
    }

    async fn scope_set_decimation(&mut self, value: u32) -> DeviceResult<()> {
        DecimationParams { value }.validate()?;
        self.begin().await?;
        self.scope.decimation = value;
        Ok(())
    }

    async fn scope_set_trigger(&mut self, source: TriggerSource) -> DeviceResult<()> {
        self.begin().await?;
        self.scope.trigger_source = source;
        Ok(())
    }

    async fn asg_setup(&mut self, params: &AsgSetupParams) -> DeviceResult<()> {
        params.validate()?;
        self.begin().await?;
        self.asg[params.channel.index()].apply(params);
        Ok(())
    }

    async fn asg_state(&mut self, channel: AsgChannel) -> DeviceResult<AsgState> {
        self.begin().await?;
        Ok(self.asg[channel.index()])
    }

    async fn pid_configure(&mut self, params: &PidConfigureParams) -> DeviceResult<()> {
        params.validate()?;
        self.begin().await?;
        self.pid[params.channel.index()].apply(params);
        Ok(())
    }

    async fn pid_set_setpoint(&mut self, channel: PidChannel, value: f64) -> DeviceResult<()> {
        SetpointParams { channel, value }.validate()?;
        self.begin().await?;
        self.pid[channel.index()].setpoint = value;
        Ok(())
    }

    async fn pid_get_setpoint(&mut self, channel: PidChannel) -> DeviceResult<f64> {
        self.begin().await?;
        Ok(self.pid[channel.index()].setpoint)
    }

    async fn iq_setup(&mut self, params: &IqSetupParams) -> DeviceResult<()> {
        params.validate()?;
        self.begin().await?;
        self.iq[params.channel.index()].apply(params);
        Ok(())
    }

    async fn iq_get_quadratures(&mut self, channel: IqChannel) -> DeviceResult<Quadratures> {
        self.begin().await?;
        let iq = self.iq[channel.index()];
        if iq.frequency <= 0.0 {
            return Ok(Quadratures { i: 0.0, q: 0.0 });
        }

        let mut result = Quadratures { i: 0.0, q: 0.0 };
        for asg in self.iq_sources(iq.input) {
            if !asg.is_running() || (asg.frequency - iq.frequency).abs() > iq.bandwidth {
                continue;
            }
            match asg.waveform {
                Waveform::Sin => result.i += asg.amplitude / 2.0,
                Waveform::Cos => result.q += asg.amplitude / 2.0,
                Waveform::Square => result.i += 2.0 * asg.amplitude / PI,
                _ => {}
            }
        }
        Ok(result)
    }

    async fn sampler_read(&mut self, channel: InputChannel) -> DeviceResult<f64> {
        self.begin().await?;
        let t = self.started.elapsed().as_secs_f64();
        Ok(self.input_voltage(channel, t) + self.rng.noise(NOISE_VOLTS))
    }

    async fn close(&mut self) -> DeviceResult<()> {
        if !self.closed {
            self.closed = true;
            tracing::info!("Mock Red Pitaya closed");
        }
        Ok(())
    }

    fn is_mock(&self) -> bool {
        true
    }
}
