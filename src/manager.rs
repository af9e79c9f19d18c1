//! Shared Worker Manager
//!
//! The single point of access for every caller in the host process. It
//! starts and stops the worker, owns the correlation table and hides the
//! channel plumbing behind the blocking [`WorkerManager::send_command`].
//!
//! # Threads
//!
//! - `pitaya-worker`: owns the device, serves one command at a time
//! - `pitaya-router`: drains worker responses into the correlation table
//! - any number of caller threads blocked in `send_command`, each on its own
//!   wait slot
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted -> Starting -> Ready -> ShuttingDown -> Stopped
//!                   |          |                        ^
//!                   |          +---- worker died -------+
//!                   +----- bootstrap failed/timeout ----+
//! ```
//!
//! `start_worker` from `Stopped` starts a fresh worker; there is no
//! automatic restart.
//!
//! # Example
//! ```no_run
//! use pitaya_daq::{config::WorkerConfig, protocol::Params, WorkerManager};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = WorkerManager::new();
//! manager.start_worker(&WorkerConfig::mock())?;
//! let pong = manager.send_command("ping", Params::new(), Duration::from_secs(1))?;
//! assert_eq!(pong, "pong");
//! manager.shutdown();
//! # Ok(())
//! # }
//! ```

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pending::WaitSlot;
use crate::protocol::{CommandEnvelope, Params, SHUTDOWN_ACK};
use crate::router::{self, Shared, ROUTER_THREAD_NAME};
use crate::worker::{self, WORKER_THREAD_NAME};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Last known lifecycle state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::NotStarted => "not_started",
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::ShuttingDown => "shutting_down",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Handles to one running worker generation.
struct WorkerLink {
    inbound: UnboundedSender<CommandEnvelope>,
    worker: JoinHandle<()>,
    router: JoinHandle<()>,
    config: WorkerConfig,
}

/// Owner of the worker, the response router and the correlation table.
pub struct WorkerManager {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    /// Serialises `start_worker` and `shutdown`.
    control: Mutex<()>,
    link: Mutex<Option<WorkerLink>>,
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerManager")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl WorkerManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            next_id: AtomicU64::new(1),
            control: Mutex::new(()),
            link: Mutex::new(None),
        }
    }

    /// Start the worker and block until it reports readiness.
    ///
    /// Returns immediately if a worker is already ready. Fails with
    /// [`WorkerError::WorkerStartupFailed`] when the worker reports a failed
    /// connection or stays silent for `config.startup_timeout`.
    pub fn start_worker(&self, config: &WorkerConfig) -> WorkerResult<()> {
        config.validate().map_err(WorkerError::Config)?;
        let _control = self.control.lock();

        if self.state() == WorkerState::Ready {
            tracing::debug!("Worker already running");
            return Ok(());
        }
        // A worker that died on its own still has threads to reap.
        if let Some(stale) = self.link.lock().take() {
            reap(stale, "stale");
        }

        let bootstrap = Arc::new(WaitSlot::new());
        let generation = {
            let mut lifecycle = self.shared.lifecycle.lock();
            lifecycle.generation += 1;
            lifecycle.state = WorkerState::Starting;
            lifecycle.bootstrap = Some(Arc::clone(&bootstrap));
            lifecycle.generation
        };
        tracing::info!(
            generation,
            host = %config.hostname,
            config_name = %config.config_name,
            mock = config.mock_mode,
            "Starting worker"
        );

        let (inbound_tx, inbound_rx) = unbounded_channel();
        let (outbound_tx, outbound_rx) = unbounded_channel();

        let router = match router::spawn(outbound_rx, Arc::clone(&self.shared), generation) {
            Ok(router) => router,
            Err(err) => {
                self.set_stopped();
                return Err(WorkerError::WorkerStartupFailed(format!(
                    "failed to spawn response router: {err}"
                )));
            }
        };
        let worker = match worker::spawn(config.clone(), inbound_rx, outbound_tx) {
            Ok(worker) => worker,
            Err(err) => {
                // The sender half went down with the closure; the router exits.
                join_until(router, deadline_after(config.shutdown_timeout), ROUTER_THREAD_NAME);
                self.set_stopped();
                return Err(WorkerError::WorkerStartupFailed(format!(
                    "failed to spawn worker thread: {err}"
                )));
            }
        };

        *self.link.lock() = Some(WorkerLink {
            inbound: inbound_tx,
            worker,
            router,
            config: config.clone(),
        });

        let reason = match bootstrap.wait(config.startup_timeout) {
            Some(response) if response.is_ok() => {
                let mut lifecycle = self.shared.lifecycle.lock();
                if lifecycle.state == WorkerState::Starting {
                    lifecycle.state = WorkerState::Ready;
                    drop(lifecycle);
                    tracing::info!(generation, details = %response.data, "Worker ready");
                    return Ok(());
                }
                "worker exited right after reporting readiness".to_string()
            }
            Some(response) => response.message(),
            None => format!(
                "no bootstrap message within {:?}",
                config.startup_timeout
            ),
        };

        tracing::error!(generation, %reason, "Worker failed to start");
        self.abort_start();
        Err(WorkerError::WorkerStartupFailed(reason))
    }

    fn abort_start(&self) {
        self.shared.lifecycle.lock().bootstrap = None;
        if let Some(link) = self.link.lock().take() {
            reap(link, "failed");
        }
        self.set_stopped();
    }

    fn set_stopped(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        lifecycle.state = WorkerState::Stopped;
        lifecycle.bootstrap = None;
    }

    /// Send one command and block until its response or `timeout`.
    ///
    /// Safe to call from any number of threads at once. `"shutdown"` is
    /// routed to [`shutdown`](Self::shutdown).
    pub fn send_command(
        &self,
        command: &str,
        params: Params,
        timeout: Duration,
    ) -> WorkerResult<Value> {
        if command == "shutdown" {
            self.shutdown();
            return Ok(Value::from(SHUTDOWN_ACK));
        }
        if self.state() != WorkerState::Ready {
            return Err(WorkerError::WorkerNotRunning);
        }
        let inbound = self
            .link
            .lock()
            .as_ref()
            .map(|link| link.inbound.clone())
            .ok_or(WorkerError::WorkerNotRunning)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = self.shared.pending.register(id);
        tracing::trace!(id, command, "Sending command");
        if inbound
            .send(CommandEnvelope::new(id, command, params))
            .is_err()
        {
            return Err(WorkerError::WorkerNotRunning);
        }

        let Some(response) = guard.wait(timeout) else {
            tracing::warn!(id, command, ?timeout, "Command timed out");
            return Err(WorkerError::Timeout {
                command: command.to_string(),
                timeout,
            });
        };
        if response.is_ok() {
            Ok(response.data)
        } else {
            Err(WorkerError::Command {
                command: command.to_string(),
                message: response.message(),
            })
        }
    }

    /// [`send_command`](Self::send_command) with the configured
    /// `command_timeout`.
    pub fn call(&self, command: &str, params: Params) -> WorkerResult<Value> {
        let timeout = self
            .link
            .lock()
            .as_ref()
            .map(|link| link.config.command_timeout)
            .ok_or(WorkerError::WorkerNotRunning)?;
        self.send_command(command, params, timeout)
    }

    pub(crate) fn command_timeout(&self) -> Option<Duration> {
        self.link
            .lock()
            .as_ref()
            .map(|link| link.config.command_timeout)
    }

    /// Stop the worker and the router. A no-op when nothing is running.
    pub fn shutdown(&self) {
        let _control = self.control.lock();
        let Some(link) = self.link.lock().take() else {
            return;
        };
        let shutdown_timeout = link.config.shutdown_timeout;

        let was_ready = {
            let mut lifecycle = self.shared.lifecycle.lock();
            let was_ready = lifecycle.state == WorkerState::Ready;
            if was_ready {
                lifecycle.state = WorkerState::ShuttingDown;
            }
            was_ready
        };
        tracing::info!(was_ready, "Shutting down worker");

        if was_ready {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let guard = self.shared.pending.register(id);
            if link
                .inbound
                .send(CommandEnvelope::new(id, "shutdown", Params::new()))
                .is_ok()
            {
                match guard.wait(shutdown_timeout) {
                    Some(ack) => tracing::debug!(ack = %ack.data, "Worker acknowledged shutdown"),
                    None => tracing::warn!(
                        ?shutdown_timeout,
                        "Worker did not acknowledge shutdown"
                    ),
                }
            }
        }

        reap(link, "shutdown");
        self.set_stopped();
        tracing::info!("Worker stopped");
    }

    /// Whether the worker is ready for commands. Never blocks on the worker.
    pub fn is_worker_running(&self) -> bool {
        self.state() == WorkerState::Ready
    }

    pub fn state(&self) -> WorkerState {
        self.shared.lifecycle.lock().state
    }

    /// Number of callers currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Close the command channel and join both threads within the shutdown
/// timeout. Threads that overrun are detached.
fn reap(link: WorkerLink, reason: &str) {
    let WorkerLink {
        inbound,
        worker,
        router,
        config,
    } = link;
    drop(inbound);
    tracing::debug!(reason, "Joining worker threads");
    let deadline = deadline_after(config.shutdown_timeout);
    join_until(worker, deadline, WORKER_THREAD_NAME);
    join_until(router, deadline, ROUTER_THREAD_NAME);
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn join_until(handle: JoinHandle<()>, deadline: Option<Instant>, name: &str) {
    while !handle.is_finished() {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::warn!(thread = name, "Thread did not stop in time; detaching");
            return;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    if handle.join().is_err() {
        tracing::error!(thread = name, "Thread panicked");
    }
}

/// The process-wide manager, created on first use.
///
/// Independent [`WorkerManager`] instances remain available for tests and
/// hosts that need more than one worker.
pub fn shared_manager() -> &'static WorkerManager {
    static MANAGER: OnceLock<WorkerManager> = OnceLock::new();
    MANAGER.get_or_init(WorkerManager::new)
}
