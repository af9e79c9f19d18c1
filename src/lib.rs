//! # Pitaya DAQ
//!
//! Out-of-process worker for a Red Pitaya board, with command multiplexing.
//!
//! The hardware driver is not reentrant, so exactly one worker owns the device
//! connection and runs commands one at a time. Any number of host threads
//! talk to it through the [`WorkerManager`], which tags each request with a
//! correlation id and wakes only the caller the response belongs to.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: command and response envelopes, the closed command set.
//! - **`dispatcher`**: worker-side mapping from commands to the device facade.
//! - **`worker`**: the worker entry point (bootstrap, then the serve loop).
//! - **`manager`**: start, send and shutdown for host callers.
//! - **`pending`**: the correlation table and per-caller wait slots.
//! - **`stdio`**: the same worker speaking newline-delimited JSON on stdio.
//! - **`config`** / **`logging`**: figment configuration and tracing setup.
//!
//! The device facade itself lives in the `daq-driver-red-pitaya` crate.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod manager;
pub mod pending;
pub mod protocol;
pub mod stdio;
pub mod worker;

mod client;
mod router;

pub use config::{ApplicationConfig, MockConfig, PitayaConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use manager::{shared_manager, WorkerManager, WorkerState};
pub use protocol::{CommandEnvelope, Params, ResponseEnvelope, ResponseStatus};
pub use router::ROUTER_THREAD_NAME;
pub use worker::WORKER_THREAD_NAME;
