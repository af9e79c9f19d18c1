//! The Red Pitaya device facade and its SCPI backend.
//!
//! [`RedPitaya`] is the single surface the worker talks to. Each method maps
//! to one worker command; implementations validate their parameters before
//! touching the board and report every failure as a [`DeviceError`].
//!
//! # Backends
//!
//! - [`ScpiRedPitaya`] drives a board running the custom SCPI server over TCP.
//! - [`MockRedPitaya`](crate::MockRedPitaya) simulates a board in memory.
//!
//! [`connect`] picks one of the two from a [`DeviceConfig`].

use crate::error::{DeviceError, DeviceResult};
use crate::mock::MockRedPitaya;
use crate::scpi::{ScpiClient, ScpiOps, DEFAULT_PORT};
use crate::types::*;
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Facade
// =============================================================================

/// Operations supported by a Red Pitaya board.
///
/// Methods take `&mut self`: a facade instance is owned by exactly one task
/// and commands against it run strictly one after another.
#[async_trait]
pub trait RedPitaya: Send {
    /// Instrument identity (`*IDN?` response).
    async fn identify(&mut self) -> DeviceResult<String>;

    /// Liveness check.
    async fn ping(&mut self) -> DeviceResult<&'static str> {
        Ok("pong")
    }

    /// Configure the scope, wait for a trigger and return one trace.
    async fn scope_acquire(&mut self, params: &ScopeAcquireParams) -> DeviceResult<ScopeTrace>;

    /// Set the scope decimation factor.
    async fn scope_set_decimation(&mut self, value: u32) -> DeviceResult<()>;

    /// Set the scope trigger source.
    async fn scope_set_trigger(&mut self, source: TriggerSource) -> DeviceResult<()>;

    /// Merge the supplied overrides onto one signal generator.
    async fn asg_setup(&mut self, params: &AsgSetupParams) -> DeviceResult<()>;

    /// Read back the full state of one signal generator.
    async fn asg_state(&mut self, channel: AsgChannel) -> DeviceResult<AsgState>;

    /// Configure one PID controller.
    async fn pid_configure(&mut self, params: &PidConfigureParams) -> DeviceResult<()>;

    /// Set a PID setpoint in volts.
    async fn pid_set_setpoint(&mut self, channel: PidChannel, value: f64) -> DeviceResult<()>;

    /// Read a PID setpoint in volts.
    async fn pid_get_setpoint(&mut self, channel: PidChannel) -> DeviceResult<f64>;

    /// Configure one IQ demodulator.
    async fn iq_setup(&mut self, params: &IqSetupParams) -> DeviceResult<()>;

    /// Read the demodulated quadratures of one IQ module.
    async fn iq_get_quadratures(&mut self, channel: IqChannel) -> DeviceResult<Quadratures>;

    /// Instantaneous voltage on a fast input.
    async fn sampler_read(&mut self, channel: InputChannel) -> DeviceResult<f64>;

    /// Release the connection. Further calls fail with [`DeviceError::Closed`].
    async fn close(&mut self) -> DeviceResult<()>;

    /// Whether this backend is simulated.
    fn is_mock(&self) -> bool;
}

// =============================================================================
// Configuration
// =============================================================================

/// How to reach (or simulate) a board.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Hostname or IP address of the board.
    pub host: String,
    /// SCPI port.
    pub port: u16,
    /// Simulate the board instead of connecting.
    pub mock: bool,
    /// Give up connecting after this long.
    pub connect_timeout: Duration,
    /// Seed for simulated noise; `None` seeds from the OS.
    pub mock_seed: Option<u64>,
    /// Artificial delay added to every simulated operation.
    pub mock_latency: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "rp-f00000.local".to_string(),
            port: DEFAULT_PORT,
            mock: false,
            connect_timeout: Duration::from_secs(5),
            mock_seed: None,
            mock_latency: Duration::ZERO,
        }
    }
}

/// Open a facade according to `config`.
///
/// The real backend is validated with an identity query before it is
/// returned; any failure is reported as [`DeviceError::Connection`].
pub async fn connect(config: &DeviceConfig) -> DeviceResult<Box<dyn RedPitaya>> {
    if config.mock {
        tracing::info!(seed = ?config.mock_seed, latency = ?config.mock_latency, "Creating mock Red Pitaya");
        let device = MockRedPitaya::new(config.mock_seed).with_latency(config.mock_latency);
        return Ok(Box::new(device));
    }

    tracing::info!(host = %config.host, port = config.port, "Connecting to Red Pitaya");
    let client = ScpiClient::connect(&config.host, config.port, config.connect_timeout)
        .await
        .map_err(|e| DeviceError::Connection(format!("{e:#}")))?;

    let mut device = ScpiRedPitaya::new(Box::new(client));
    let identity = device
        .identify()
        .await
        .map_err(|e| DeviceError::Connection(e.to_string()))?;
    tracing::info!(%identity, "Red Pitaya connected");

    Ok(Box::new(device))
}

// =============================================================================
// SCPI backend
// =============================================================================

/// Interval between `SCOPE:STAT?` polls while waiting for a trigger.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Facade over the SCPI server of a custom-bitstream board.
pub struct ScpiRedPitaya {
    client: Option<Box<dyn ScpiOps>>,
    scope: ScopeState,
    poll_interval: Duration,
}

impl ScpiRedPitaya {
    /// Wrap an open transport.
    pub fn new(client: Box<dyn ScpiOps>) -> Self {
        Self {
            client: Some(client),
            scope: ScopeState::default(),
            poll_interval: STATUS_POLL_INTERVAL,
        }
    }

    /// Override the trigger polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Last scope configuration written to the board.
    pub fn scope_state(&self) -> ScopeState {
        self.scope
    }

    fn client(&self) -> DeviceResult<&dyn ScpiOps> {
        self.client.as_deref().ok_or(DeviceError::Closed)
    }

    async fn write(&self, command: String) -> DeviceResult<()> {
        self.client()?
            .write(&command)
            .await
            .map_err(DeviceError::communication)
    }

    async fn query(&self, query: &str) -> DeviceResult<String> {
        self.client()?
            .query(query)
            .await
            .map_err(DeviceError::communication)
    }

    async fn query_f64(&self, query: &str) -> DeviceResult<f64> {
        let response = self.query(query).await?;
        response.parse::<f64>().map_err(|_| {
            DeviceError::Communication(format!(
                "Failed to parse '{response}' as f64 from query: {query}"
            ))
        })
    }

    async fn query_token<T>(&self, query: &str) -> DeviceResult<T>
    where
        T: FromStr<Err = DeviceError>,
    {
        let response = self.query(query).await?;
        response.to_ascii_lowercase().parse::<T>().map_err(|_| {
            DeviceError::Communication(format!(
                "unexpected response '{response}' to query: {query}"
            ))
        })
    }

    async fn wait_for_trigger(&self, timeout: Duration) -> DeviceResult<()> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.query("SCOPE:STAT?").await? == "TD" {
                return Ok(());
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(DeviceError::AcquisitionTimeout(timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl RedPitaya for ScpiRedPitaya {
    async fn identify(&mut self) -> DeviceResult<String> {
        self.query("*IDN?").await
    }

    async fn scope_acquire(&mut self, params: &ScopeAcquireParams) -> DeviceResult<ScopeTrace> {
        params.validate()?;
        let settings = ScopeState {
            decimation: params.decimation.unwrap_or(self.scope.decimation),
            trigger_source: params.trigger_source.unwrap_or(self.scope.trigger_source),
            input_channel: params.input_channel.unwrap_or(self.scope.input_channel),
        };

        self.write(format!("SCOPE:DEC {}", settings.decimation)).await?;
        self.write(format!("SCOPE:TRIG {}", settings.trigger_source))
            .await?;
        self.write(format!("SCOPE:INP {}", settings.input_channel))
            .await?;
        self.scope = settings;

        self.write("SCOPE:ARM".to_string()).await?;
        self.wait_for_trigger(params.timeout_duration()).await?;

        let raw = self
            .query(&format!("SCOPE:DATA? {}", settings.input_channel))
            .await?;
        let samples = parse_f64_list(&raw)?;
        tracing::debug!(
            samples = samples.len(),
            decimation = settings.decimation,
            "Scope trace received"
        );
        ScopeTrace::from_samples(samples, settings.decimation)
    }

    async fn scope_set_decimation(&mut self, value: u32) -> DeviceResult<()> {
        DecimationParams { value }.validate()?;
        self.write(format!("SCOPE:DEC {value}")).await?;
        self.scope.decimation = value;
        Ok(())
    }

    async fn scope_set_trigger(&mut self, source: TriggerSource) -> DeviceResult<()> {
        self.write(format!("SCOPE:TRIG {source}")).await?;
        self.scope.trigger_source = source;
        Ok(())
    }

    async fn asg_setup(&mut self, params: &AsgSetupParams) -> DeviceResult<()> {
        params.validate()?;
        let n = params.channel.index();
        if let Some(waveform) = params.waveform {
            self.write(format!("ASG{n}:WAVE {waveform}")).await?;
        }
        if let Some(frequency) = params.frequency {
            self.write(format!("ASG{n}:FREQ {frequency}")).await?;
        }
        if let Some(amplitude) = params.amplitude {
            self.write(format!("ASG{n}:AMPL {amplitude}")).await?;
        }
        if let Some(offset) = params.offset {
            self.write(format!("ASG{n}:OFFS {offset}")).await?;
        }
        if let Some(output) = params.output_direct {
            self.write(format!("ASG{n}:OUT {output}")).await?;
        }
        if let Some(trigger) = params.trigger_source {
            self.write(format!("ASG{n}:TRIG {trigger}")).await?;
        }
        Ok(())
    }

    async fn asg_state(&mut self, channel: AsgChannel) -> DeviceResult<AsgState> {
        let n = channel.index();
        Ok(AsgState {
            waveform: self.query_token(&format!("ASG{n}:WAVE?")).await?,
            frequency: self.query_f64(&format!("ASG{n}:FREQ?")).await?,
            amplitude: self.query_f64(&format!("ASG{n}:AMPL?")).await?,
            offset: self.query_f64(&format!("ASG{n}:OFFS?")).await?,
            output_direct: self.query_token(&format!("ASG{n}:OUT?")).await?,
            trigger_source: self.query_token(&format!("ASG{n}:TRIG?")).await?,
        })
    }

    async fn pid_configure(&mut self, params: &PidConfigureParams) -> DeviceResult<()> {
        params.validate()?;
        let n = params.channel.index();
        self.write(format!("PID{n}:P {}", params.p)).await?;
        if let Some(i) = params.i {
            self.write(format!("PID{n}:I {i}")).await?;
        }
        if let Some(d) = params.d {
            self.write(format!("PID{n}:D {d}")).await?;
        }
        if let Some(setpoint) = params.setpoint {
            self.write(format!("PID{n}:SETP {setpoint}")).await?;
        }
        if let Some(input) = params.input {
            self.write(format!("PID{n}:INP {input}")).await?;
        }
        if let Some(output) = params.output_direct {
            self.write(format!("PID{n}:OUT {output}")).await?;
        }
        Ok(())
    }

    async fn pid_set_setpoint(&mut self, channel: PidChannel, value: f64) -> DeviceResult<()> {
        SetpointParams { channel, value }.validate()?;
        self.write(format!("PID{}:SETP {value}", channel.index()))
            .await
    }

    async fn pid_get_setpoint(&mut self, channel: PidChannel) -> DeviceResult<f64> {
        self.query_f64(&format!("PID{}:SETP?", channel.index()))
            .await
    }

    async fn iq_setup(&mut self, params: &IqSetupParams) -> DeviceResult<()> {
        params.validate()?;
        let n = params.channel.index();
        self.write(format!("IQ{n}:FREQ {}", params.frequency)).await?;
        self.write(format!("IQ{n}:BW {}", params.bandwidth)).await?;
        if let Some(input) = params.input {
            self.write(format!("IQ{n}:INP {input}")).await?;
        }
        if let Some(output) = params.output_direct {
            self.write(format!("IQ{n}:OUT {output}")).await?;
        }
        Ok(())
    }

    async fn iq_get_quadratures(&mut self, channel: IqChannel) -> DeviceResult<Quadratures> {
        let query = format!("IQ{}:QUAD?", channel.index());
        let raw = self.query(&query).await?;
        match parse_f64_list(&raw)?.as_slice() {
            [i, q] => Ok(Quadratures { i: *i, q: *q }),
            _ => Err(DeviceError::Communication(format!(
                "expected 'i,q' in response to {query}, got '{raw}'"
            ))),
        }
    }

    async fn sampler_read(&mut self, channel: InputChannel) -> DeviceResult<f64> {
        let query = format!("SAMP:{}?", channel.as_str().to_ascii_uppercase());
        self.query_f64(&query).await
    }

    async fn close(&mut self) -> DeviceResult<()> {
        if let Some(client) = self.client.take() {
            client.close().await.map_err(DeviceError::communication)?;
            tracing::info!("Red Pitaya connection closed");
        }
        Ok(())
    }

    fn is_mock(&self) -> bool {
        false
    }
}

/// Parse a comma-separated list of floats, optionally wrapped in braces
/// (`{0.1,0.2}`), as returned by the SCPI server for traces.
pub fn parse_f64_list(raw: &str) -> DeviceResult<Vec<f64>> {
    let body = raw.trim().trim_start_matches('{').trim_end_matches('}');
    body.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                DeviceError::Communication(format!("malformed sample '{token}' in trace data"))
            })
        })
        .collect()
}
