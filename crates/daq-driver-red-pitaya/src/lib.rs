//! Red Pitaya device facade.
//!
//! This crate is the hardware boundary of the Pitaya worker. It exposes a
//! closed vocabulary of modules and settings ([`types`]) and one async
//! trait, [`RedPitaya`], with a method per supported operation.
//!
//! # Backends
//!
//! - [`ScpiRedPitaya`]: SCPI over TCP (default port 5000) against boards
//!   running the custom lock-in/PID bitstream.
//! - [`MockRedPitaya`]: simulated board with DAC-to-ADC loopback, seeded
//!   noise and optional latency. No I/O.
//!
//! # Usage
//!
//! ```rust,no_run
//! use daq_driver_red_pitaya::{connect, DeviceConfig, ScopeAcquireParams};
//!
//! # async fn demo() -> Result<(), daq_driver_red_pitaya::DeviceError> {
//! let config = DeviceConfig { mock: true, ..Default::default() };
//! let mut rp = connect(&config).await?;
//! let trace = rp.scope_acquire(&ScopeAcquireParams::default()).await?;
//! assert_eq!(trace.voltage.len(), trace.time.len());
//! # Ok(())
//! # }
//! ```

mod driver;
mod error;
mod mock;
mod rng;
mod scpi;
pub mod types;

pub use driver::{connect, parse_f64_list, DeviceConfig, RedPitaya, ScpiRedPitaya};
pub use error::{DeviceError, DeviceResult};
pub use mock::{MockRedPitaya, MOCK_IDENTITY};
pub use rng::MockRng;
pub use scpi::{ScpiClient, ScpiOps, DEFAULT_PORT, DEFAULT_TIMEOUT_MS};
pub use types::*;
