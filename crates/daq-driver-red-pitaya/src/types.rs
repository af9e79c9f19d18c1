//! Module names, channel selectors and per-command parameter types.
//!
//! The worker never resolves attribute paths at runtime. Every addressable
//! module and every enumerated setting is a closed enum here, and every
//! command carries a typed parameter struct that validates its own ranges
//! before anything reaches the hardware.

use crate::error::{DeviceError, DeviceResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// ADC sampling rate of the STEMlab 125 boards.
pub const ADC_RATE_HZ: f64 = 125e6;

/// Number of samples in one scope acquisition.
pub const TRACE_LENGTH: usize = 16384;

/// Decimation factors supported by the scope.
pub const DECIMATIONS: [u32; 6] = [1, 8, 64, 1024, 8192, 65536];

/// Highest frequency the ASG and IQ modules accept (Nyquist of the DAC).
pub const MAX_FREQUENCY_HZ: f64 = 62.5e6;

/// Longest trigger wait a single acquisition may request, in seconds.
pub const MAX_ACQUIRE_TIMEOUT_S: f64 = 3600.0;

/// Declares a fieldless enum whose variants map one-to-one onto wire tokens.
macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $token:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $token)] $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire token for this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DeviceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($token => Ok($name::$variant),)+
                    other => Err(DeviceError::invalid(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

token_enum! {
    /// Every module handle the worker owns on the board.
    Module {
        Scope => "scope",
        Sampler => "sampler",
        Asg0 => "asg0",
        Asg1 => "asg1",
        Pid0 => "pid0",
        Pid1 => "pid1",
        Pid2 => "pid2",
        Iq0 => "iq0",
        Iq1 => "iq1",
        Iq2 => "iq2",
    }
}

token_enum! {
    /// Signal generator selector.
    #[derive(Default)]
    AsgChannel {
        #[default]
        Asg0 => "asg0",
        Asg1 => "asg1",
    }
}

token_enum! {
    /// PID controller selector.
    PidChannel {
        Pid0 => "pid0",
        Pid1 => "pid1",
        Pid2 => "pid2",
    }
}

token_enum! {
    /// IQ demodulator selector.
    IqChannel {
        Iq0 => "iq0",
        Iq1 => "iq1",
        Iq2 => "iq2",
    }
}

token_enum! {
    /// Fast analog input.
    InputChannel {
        In1 => "in1",
        In2 => "in2",
    }
}

token_enum! {
    /// Scope trigger source.
    TriggerSource {
        Immediately => "immediately",
        Ch1PositiveEdge => "ch1_positive_edge",
        Ch1NegativeEdge => "ch1_negative_edge",
        Ch2PositiveEdge => "ch2_positive_edge",
        Ch2NegativeEdge => "ch2_negative_edge",
        ExtPositiveEdge => "ext_positive_edge",
        ExtNegativeEdge => "ext_negative_edge",
        AsgPositiveEdge => "asg_positive_edge",
        AsgNegativeEdge => "asg_negative_edge",
    }
}

token_enum! {
    /// Signal generator trigger mode.
    AsgTrigger {
        Off => "off",
        Immediately => "immediately",
        ExtPositiveEdge => "ext_positive_edge",
        ExtNegativeEdge => "ext_negative_edge",
    }
}

token_enum! {
    /// Signal generator waveform.
    Waveform {
        Sin => "sin",
        Cos => "cos",
        Ramp => "ramp",
        HalfRamp => "halframp",
        Square => "square",
        Dc => "dc",
    }
}

token_enum! {
    /// Routing of a module output onto the physical DAC outputs.
    OutputDirect {
        Off => "off",
        Out1 => "out1",
        Out2 => "out2",
        Both => "both",
    }
}

token_enum! {
    /// Internal signal that can feed a PID or IQ module.
    SignalSource {
        Off => "off",
        In1 => "in1",
        In2 => "in2",
        Asg0 => "asg0",
        Asg1 => "asg1",
        Iq0 => "iq0",
        Iq1 => "iq1",
        Iq2 => "iq2",
        Pid0 => "pid0",
        Pid1 => "pid1",
        Pid2 => "pid2",
    }
}

impl AsgChannel {
    /// Zero-based index of the generator.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl PidChannel {
    /// Zero-based index of the controller.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl IqChannel {
    /// Zero-based index of the demodulator.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl From<AsgChannel> for Module {
    fn from(channel: AsgChannel) -> Self {
        match channel {
            AsgChannel::Asg0 => Module::Asg0,
            AsgChannel::Asg1 => Module::Asg1,
        }
    }
}

impl From<PidChannel> for Module {
    fn from(channel: PidChannel) -> Self {
        match channel {
            PidChannel::Pid0 => Module::Pid0,
            PidChannel::Pid1 => Module::Pid1,
            PidChannel::Pid2 => Module::Pid2,
        }
    }
}

impl From<IqChannel> for Module {
    fn from(channel: IqChannel) -> Self {
        match channel {
            IqChannel::Iq0 => Module::Iq0,
            IqChannel::Iq1 => Module::Iq1,
            IqChannel::Iq2 => Module::Iq2,
        }
    }
}

impl OutputDirect {
    /// Whether this routing drives the given physical output.
    pub fn drives(self, input: InputChannel) -> bool {
        matches!(
            (self, input),
            (OutputDirect::Both, _)
                | (OutputDirect::Out1, InputChannel::In1)
                | (OutputDirect::Out2, InputChannel::In2)
        )
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> DeviceResult<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(DeviceError::invalid(format!(
            "{name} must be within [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}

fn check_decimation(value: u32) -> DeviceResult<()> {
    if DECIMATIONS.contains(&value) {
        Ok(())
    } else {
        Err(DeviceError::invalid(format!(
            "decimation must be one of {DECIMATIONS:?}, got {value}"
        )))
    }
}

fn check_gain(name: &str, value: Option<f64>) -> DeviceResult<()> {
    match value {
        None => Ok(()),
        Some(gain) if !gain.is_finite() => Err(DeviceError::invalid(format!(
            "{name} gain must be finite, got {gain}"
        ))),
        // The gateware derives its integrator/differentiator shift from the
        // gain, which is undefined at exactly zero.
        Some(gain) if gain == 0.0 => Err(DeviceError::invalid(format!(
            "{name} gain must be non-zero; omit '{name}' to leave it unchanged"
        ))),
        Some(_) => Ok(()),
    }
}

// =============================================================================
// Scope
// =============================================================================

/// Parameters of `scope_acquire`.
///
/// Omitted settings fall back to whatever the scope is currently configured
/// with (see `scope_set_decimation` / `scope_set_trigger`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeAcquireParams {
    /// Decimation factor, one of [`DECIMATIONS`].
    #[serde(default)]
    pub decimation: Option<u32>,
    /// Trigger source for this acquisition.
    #[serde(default)]
    pub trigger_source: Option<TriggerSource>,
    /// Input to record.
    #[serde(default)]
    pub input_channel: Option<InputChannel>,
    /// Seconds to wait for the trigger.
    #[serde(default = "default_acquire_timeout")]
    pub timeout: f64,
}

fn default_acquire_timeout() -> f64 {
    1.0
}

impl Default for ScopeAcquireParams {
    fn default() -> Self {
        Self {
            decimation: None,
            trigger_source: None,
            input_channel: None,
            timeout: default_acquire_timeout(),
        }
    }
}

impl ScopeAcquireParams {
    /// Check ranges.
    pub fn validate(&self) -> DeviceResult<()> {
        if let Some(decimation) = self.decimation {
            check_decimation(decimation)?;
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(DeviceError::invalid(format!(
                "timeout must be a positive number of seconds, got {}",
                self.timeout
            )));
        }
        if self.timeout > MAX_ACQUIRE_TIMEOUT_S {
            return Err(DeviceError::invalid(format!(
                "timeout must not exceed {MAX_ACQUIRE_TIMEOUT_S} s, got {}",
                self.timeout
            )));
        }
        Ok(())
    }

    /// Acquisition timeout as a [`Duration`], clamped to
    /// [`MAX_ACQUIRE_TIMEOUT_S`]. Values [`validate`](Self::validate)
    /// rejects map to zero or the cap instead of panicking.
    pub fn timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout.min(MAX_ACQUIRE_TIMEOUT_S))
            .unwrap_or(Duration::ZERO)
    }
}

/// Parameters of `scope_set_decimation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecimationParams {
    /// New decimation factor.
    pub value: u32,
}

impl DecimationParams {
    /// Check that the factor is supported.
    pub fn validate(&self) -> DeviceResult<()> {
        check_decimation(self.value)
    }
}

/// Parameters of `scope_set_trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerParams {
    /// New trigger source.
    pub source: TriggerSource,
}

/// Current scope configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScopeState {
    pub decimation: u32,
    pub trigger_source: TriggerSource,
    pub input_channel: InputChannel,
}

impl Default for ScopeState {
    fn default() -> Self {
        Self {
            decimation: 64,
            trigger_source: TriggerSource::Immediately,
            input_channel: InputChannel::In1,
        }
    }
}

/// One recorded trace: paired voltage and time axes of equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeTrace {
    /// Sample values in volts.
    pub voltage: Vec<f64>,
    /// Sample times in seconds relative to the trigger.
    pub time: Vec<f64>,
}

impl ScopeTrace {
    /// Build a trace from raw samples, deriving the time axis from the decimation.
    ///
    /// Fails with [`DeviceError::EmptyAcquisition`] for an empty sample buffer.
    pub fn from_samples(voltage: Vec<f64>, decimation: u32) -> DeviceResult<Self> {
        if voltage.is_empty() {
            return Err(DeviceError::EmptyAcquisition);
        }
        let dt = sample_period(decimation);
        let time = (0..voltage.len()).map(|i| i as f64 * dt).collect();
        Ok(Self { voltage, time })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    /// Whether the trace holds no samples.
    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }
}

/// Seconds between two samples at the given decimation.
pub fn sample_period(decimation: u32) -> f64 {
    f64::from(decimation) / ADC_RATE_HZ
}

// =============================================================================
// ASG
// =============================================================================

/// Parameters of `asg_setup`. Every field except `channel` is an override
/// merged onto the generator's current state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AsgSetupParams {
    pub channel: AsgChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Waveform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_direct: Option<OutputDirect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_source: Option<AsgTrigger>,
}

impl AsgSetupParams {
    /// Check ranges of the supplied overrides.
    pub fn validate(&self) -> DeviceResult<()> {
        if let Some(frequency) = self.frequency {
            check_range("frequency", frequency, 0.0, MAX_FREQUENCY_HZ)?;
        }
        if let Some(amplitude) = self.amplitude {
            check_range("amplitude", amplitude, 0.0, 1.0)?;
        }
        if let Some(offset) = self.offset {
            check_range("offset", offset, -1.0, 1.0)?;
        }
        Ok(())
    }
}

/// Full configuration of one signal generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsgState {
    pub waveform: Waveform,
    pub frequency: f64,
    pub amplitude: f64,
    pub offset: f64,
    pub output_direct: OutputDirect,
    pub trigger_source: AsgTrigger,
}

impl Default for AsgState {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sin,
            frequency: 0.0,
            amplitude: 0.0,
            offset: 0.0,
            output_direct: OutputDirect::Off,
            trigger_source: AsgTrigger::Off,
        }
    }
}

impl AsgState {
    /// Merge the overrides carried by `params` onto this state.
    pub fn apply(&mut self, params: &AsgSetupParams) {
        if let Some(waveform) = params.waveform {
            self.waveform = waveform;
        }
        if let Some(frequency) = params.frequency {
            self.frequency = frequency;
        }
        if let Some(amplitude) = params.amplitude {
            self.amplitude = amplitude;
        }
        if let Some(offset) = params.offset {
            self.offset = offset;
        }
        if let Some(output_direct) = params.output_direct {
            self.output_direct = output_direct;
        }
        if let Some(trigger_source) = params.trigger_source {
            self.trigger_source = trigger_source;
        }
    }

    /// Whether the generator is currently producing a signal.
    pub fn is_running(&self) -> bool {
        self.trigger_source != AsgTrigger::Off
    }
}

// =============================================================================
// PID
// =============================================================================

/// Parameters of `pid_configure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PidConfigureParams {
    pub channel: PidChannel,
    /// Proportional gain.
    pub p: f64,
    /// Integral gain; omitted to keep the current value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i: Option<f64>,
    /// Derivative gain; omitted to keep the current value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<f64>,
    /// Setpoint in volts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<SignalSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_direct: Option<OutputDirect>,
}

impl PidConfigureParams {
    /// Check gains and setpoint.
    pub fn validate(&self) -> DeviceResult<()> {
        if !self.p.is_finite() {
            return Err(DeviceError::invalid(format!(
                "p gain must be finite, got {}",
                self.p
            )));
        }
        check_gain("i", self.i)?;
        check_gain("d", self.d)?;
        if let Some(setpoint) = self.setpoint {
            check_range("setpoint", setpoint, -1.0, 1.0)?;
        }
        Ok(())
    }
}

/// Parameters of `pid_set_setpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetpointParams {
    pub channel: PidChannel,
    /// Setpoint in volts.
    pub value: f64,
}

impl SetpointParams {
    /// Check the setpoint range.
    pub fn validate(&self) -> DeviceResult<()> {
        check_range("setpoint", self.value, -1.0, 1.0)
    }
}

/// Full configuration of one PID controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidState {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub setpoint: f64,
    pub input: SignalSource,
    pub output_direct: OutputDirect,
}

impl Default for PidState {
    fn default() -> Self {
        Self {
            p: 0.0,
            i: 0.0,
            d: 0.0,
            setpoint: 0.0,
            input: SignalSource::Off,
            output_direct: OutputDirect::Off,
        }
    }
}

impl PidState {
    /// Merge a `pid_configure` request onto this state.
    pub fn apply(&mut self, params: &PidConfigureParams) {
        self.p = params.p;
        if let Some(i) = params.i {
            self.i = i;
        }
        if let Some(d) = params.d {
            self.d = d;
        }
        if let Some(setpoint) = params.setpoint {
            self.setpoint = setpoint;
        }
        if let Some(input) = params.input {
            self.input = input;
        }
        if let Some(output_direct) = params.output_direct {
            self.output_direct = output_direct;
        }
    }
}

// =============================================================================
// IQ
// =============================================================================

/// Parameters of `iq_setup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IqSetupParams {
    pub channel: IqChannel,
    /// Demodulation frequency in Hz.
    pub frequency: f64,
    /// Low-pass bandwidth in Hz.
    pub bandwidth: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<SignalSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_direct: Option<OutputDirect>,
}

impl IqSetupParams {
    /// Check frequency and bandwidth.
    pub fn validate(&self) -> DeviceResult<()> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return Err(DeviceError::invalid(format!(
                "frequency must be positive, got {}",
                self.frequency
            )));
        }
        check_range("frequency", self.frequency, 0.0, MAX_FREQUENCY_HZ)?;
        if !self.bandwidth.is_finite() || self.bandwidth <= 0.0 {
            return Err(DeviceError::invalid(format!(
                "bandwidth must be positive, got {}",
                self.bandwidth
            )));
        }
        Ok(())
    }
}

/// Full configuration of one IQ demodulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IqState {
    pub frequency: f64,
    pub bandwidth: f64,
    pub input: SignalSource,
    pub output_direct: OutputDirect,
}

impl Default for IqState {
    fn default() -> Self {
        Self {
            frequency: 0.0,
            bandwidth: 0.0,
            input: SignalSource::Off,
            output_direct: OutputDirect::Off,
        }
    }
}

impl IqState {
    /// Merge an `iq_setup` request onto this state.
    pub fn apply(&mut self, params: &IqSetupParams) {
        self.frequency = params.frequency;
        self.bandwidth = params.bandwidth;
        if let Some(input) = params.input {
            self.input = input;
        }
        if let Some(output_direct) = params.output_direct {
            self.output_direct = output_direct;
        }
    }
}

/// Demodulated in-phase and quadrature components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadratures {
    pub i: f64,
    pub q: f64,
}

// =============================================================================
// Shared
// =============================================================================

/// Parameters of any command that only names a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelParams<C> {
    pub channel: C,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn module_names_round_trip() {
        for module in Module::ALL {
            let parsed: Module = module.as_str().parse().unwrap();
            assert_eq!(parsed, *module);
        }
        assert!("asg7".parse::<Module>().is_err());
    }

    #[test]
    fn channel_converts_to_module() {
        assert_eq!(Module::from(PidChannel::Pid2), Module::Pid2);
        assert_eq!(Module::from(IqChannel::Iq1).to_string(), "iq1");
        assert_eq!(AsgChannel::Asg1.index(), 1);
    }

    #[test]
    fn acquire_params_use_defaults() {
        let params: ScopeAcquireParams = serde_json::from_value(json!({})).unwrap();
        assert_eq!(params, ScopeAcquireParams::default());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn acquire_params_reject_unknown_fields_and_bad_decimation() {
        let unknown = serde_json::from_value::<ScopeAcquireParams>(json!({"decim": 64}));
        assert!(unknown.is_err());

        let params: ScopeAcquireParams =
            serde_json::from_value(json!({"decimation": 63, "timeout": 1.0})).unwrap();
        assert!(matches!(
            params.validate(),
            Err(DeviceError::InvalidParameter(_))
        ));

        let params: ScopeAcquireParams = serde_json::from_value(json!({"timeout": 0.0})).unwrap();
        assert!(params.validate().is_err());
    }

    #[test]
    fn acquire_timeout_beyond_cap_is_invalid_not_a_panic() {
        let params = ScopeAcquireParams {
            timeout: 1e30,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(DeviceError::InvalidParameter(_))
        ));
        assert_eq!(
            params.timeout_duration(),
            Duration::from_secs_f64(MAX_ACQUIRE_TIMEOUT_S)
        );

        let negative = ScopeAcquireParams {
            timeout: -5.0,
            ..Default::default()
        };
        assert_eq!(negative.timeout_duration(), Duration::ZERO);

        let at_cap = ScopeAcquireParams {
            timeout: MAX_ACQUIRE_TIMEOUT_S,
            ..Default::default()
        };
        assert!(at_cap.validate().is_ok());
    }

    #[test]
    fn trigger_source_uses_snake_case_tokens() {
        let params: TriggerParams =
            serde_json::from_value(json!({"source": "ch1_positive_edge"})).unwrap();
        assert_eq!(params.source, TriggerSource::Ch1PositiveEdge);
        assert_eq!(
            serde_json::to_value(TriggerSource::ExtNegativeEdge).unwrap(),
            json!("ext_negative_edge")
        );
    }

    #[test]
    fn trace_from_empty_samples_is_an_error() {
        assert_eq!(
            ScopeTrace::from_samples(Vec::new(), 64),
            Err(DeviceError::EmptyAcquisition)
        );
    }

    #[test]
    fn trace_time_axis_follows_decimation() {
        let trace = ScopeTrace::from_samples(vec![0.0; 4], 125).unwrap();
        assert_eq!(trace.len(), 4);
        assert_eq!(trace.time.len(), trace.voltage.len());
        assert!((trace.time[3] - 3e-6).abs() < 1e-15);
    }

    #[test]
    fn asg_apply_merges_only_supplied_fields() {
        let mut state = AsgState::default();
        state.apply(&AsgSetupParams {
            channel: AsgChannel::Asg0,
            frequency: Some(1e3),
            amplitude: Some(0.5),
            ..Default::default()
        });
        state.apply(&AsgSetupParams {
            channel: AsgChannel::Asg0,
            offset: Some(0.1),
            ..Default::default()
        });
        assert_eq!(state.frequency, 1e3);
        assert_eq!(state.amplitude, 0.5);
        assert_eq!(state.offset, 0.1);
        assert_eq!(state.waveform, Waveform::Sin);
    }

    #[test]
    fn asg_validate_rejects_out_of_range() {
        let params = AsgSetupParams {
            channel: AsgChannel::Asg1,
            amplitude: Some(1.5),
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = AsgSetupParams {
            channel: AsgChannel::Asg1,
            frequency: Some(f64::NAN),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn pid_zero_integral_gain_is_rejected() {
        let params: PidConfigureParams =
            serde_json::from_value(json!({"channel": "pid0", "p": 0.5, "i": 0.0})).unwrap();
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("non-zero"));

        let params: PidConfigureParams =
            serde_json::from_value(json!({"channel": "pid0", "p": 0.5})).unwrap();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn pid_apply_keeps_omitted_gains() {
        let mut state = PidState {
            i: 10.0,
            ..Default::default()
        };
        state.apply(&PidConfigureParams {
            channel: PidChannel::Pid1,
            p: 0.2,
            i: None,
            d: Some(1e-3),
            setpoint: None,
            input: Some(SignalSource::In2),
            output_direct: None,
        });
        assert_eq!(state.p, 0.2);
        assert_eq!(state.i, 10.0);
        assert_eq!(state.d, 1e-3);
        assert_eq!(state.input, SignalSource::In2);
    }

    #[test]
    fn iq_validate_requires_positive_bandwidth() {
        let params = IqSetupParams {
            channel: IqChannel::Iq0,
            frequency: 1e6,
            bandwidth: 0.0,
            input: None,
            output_direct: None,
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn output_routing() {
        assert!(OutputDirect::Both.drives(InputChannel::In2));
        assert!(OutputDirect::Out1.drives(InputChannel::In1));
        assert!(!OutputDirect::Out1.drives(InputChannel::In2));
        assert!(!OutputDirect::Off.drives(InputChannel::In1));
    }
}
