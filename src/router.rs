//! Response router.
//!
//! One dedicated thread per worker drains the outbound channel and hands each
//! response to the caller waiting on its id. Responses nobody waits for
//! (timed out, or unsolicited) are dropped. The id-less bootstrap envelope
//! goes to the `start_worker` call that spawned this generation.

use crate::manager::WorkerState;
use crate::pending::{PendingTable, WaitSlot};
use crate::protocol::ResponseEnvelope;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedReceiver;

/// Name of the router thread.
pub const ROUTER_THREAD_NAME: &str = "pitaya-router";

/// Lifecycle bookkeeping shared by the manager and its routers.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    pub(crate) state: WorkerState,
    /// Bumped on every start; a router only touches lifecycle state while its
    /// generation is current.
    pub(crate) generation: u64,
    /// Where the bootstrap envelope of the current generation goes.
    pub(crate) bootstrap: Option<Arc<WaitSlot>>,
}

/// State shared between callers and the router thread.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) pending: PendingTable,
    pub(crate) lifecycle: Mutex<Lifecycle>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            pending: PendingTable::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::NotStarted,
                generation: 0,
                bootstrap: None,
            }),
        }
    }
}

/// Start the router thread for worker `generation`.
pub(crate) fn spawn(
    outbound: UnboundedReceiver<ResponseEnvelope>,
    shared: Arc<Shared>,
    generation: u64,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(ROUTER_THREAD_NAME.to_string())
        .spawn(move || run(outbound, &shared, generation))
}

fn run(mut outbound: UnboundedReceiver<ResponseEnvelope>, shared: &Shared, generation: u64) {
    tracing::debug!(generation, "Response router started");
    while let Some(response) = outbound.blocking_recv() {
        route(shared, generation, response);
    }
    worker_exited(shared, generation);
    tracing::debug!(generation, "Response router stopped");
}

fn route(shared: &Shared, generation: u64, response: ResponseEnvelope) {
    match response.id {
        Some(id) => {
            if !shared.pending.deliver(response) {
                tracing::debug!(id, "Dropping response with no waiting caller");
            }
        }
        None => {
            let slot = {
                let mut lifecycle = shared.lifecycle.lock();
                if lifecycle.generation == generation {
                    lifecycle.bootstrap.take()
                } else {
                    None
                }
            };
            match slot {
                Some(slot) => slot.deliver(response),
                None => tracing::debug!(
                    status = ?response.status,
                    "Dropping unsolicited response without id"
                ),
            }
        }
    }
}

/// The outbound channel closed: the worker thread is gone.
fn worker_exited(shared: &Shared, generation: u64) {
    let mut lifecycle = shared.lifecycle.lock();
    if lifecycle.generation != generation {
        return;
    }
    if let Some(slot) = lifecycle.bootstrap.take() {
        slot.deliver(ResponseEnvelope::error(
            None,
            "worker exited before reporting readiness",
        ));
    }
    if matches!(lifecycle.state, WorkerState::Starting | WorkerState::Ready) {
        tracing::warn!(
            generation,
            in_flight = shared.pending.len(),
            "Worker exited without a shutdown request"
        );
        lifecycle.state = WorkerState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_routes_by_id_and_bootstrap_to_current_generation() {
        let shared = Arc::new(Shared::new());
        let bootstrap = Arc::new(WaitSlot::new());
        {
            let mut lifecycle = shared.lifecycle.lock();
            lifecycle.generation = 1;
            lifecycle.state = WorkerState::Starting;
            lifecycle.bootstrap = Some(Arc::clone(&bootstrap));
        }
        let (tx, rx) = unbounded_channel();
        let handle = spawn(rx, Arc::clone(&shared), 1).unwrap();

        let guard = shared.pending.register(5);
        tx.send(ResponseEnvelope::ok(None, json!({"mock": true})))
            .unwrap();
        tx.send(ResponseEnvelope::ok(Some(99), json!("orphan")))
            .unwrap();
        tx.send(ResponseEnvelope::ok(Some(5), json!("mine")))
            .unwrap();

        let ready = bootstrap.wait(Duration::from_secs(1)).unwrap();
        assert!(ready.is_ok());
        let mine = guard.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(mine.data, json!("mine"));

        drop(tx);
        handle.join().unwrap();
        // The worker vanished while the manager still believed it was starting.
        assert_eq!(shared.lifecycle.lock().state, WorkerState::Stopped);
    }

    #[test]
    fn test_pending_bootstrap_fails_when_worker_exits() {
        let shared = Arc::new(Shared::new());
        let bootstrap = Arc::new(WaitSlot::new());
        {
            let mut lifecycle = shared.lifecycle.lock();
            lifecycle.generation = 3;
            lifecycle.state = WorkerState::Starting;
            lifecycle.bootstrap = Some(Arc::clone(&bootstrap));
        }
        let (tx, rx) = unbounded_channel::<ResponseEnvelope>();
        let handle = spawn(rx, Arc::clone(&shared), 3).unwrap();
        drop(tx);
        handle.join().unwrap();

        let failure = bootstrap.wait(Duration::from_secs(1)).unwrap();
        assert!(!failure.is_ok());
        assert!(failure.message().contains("exited"));
    }

    #[test]
    fn test_stale_router_leaves_newer_generation_alone() {
        let shared = Arc::new(Shared::new());
        {
            let mut lifecycle = shared.lifecycle.lock();
            lifecycle.generation = 2;
            lifecycle.state = WorkerState::Ready;
        }
        let (tx, rx) = unbounded_channel();
        let handle = spawn(rx, Arc::clone(&shared), 1).unwrap();
        tx.send(ResponseEnvelope::ok(None, json!("late bootstrap")))
            .unwrap();
        drop(tx);
        handle.join().unwrap();

        assert_eq!(shared.lifecycle.lock().state, WorkerState::Ready);
    }
}
