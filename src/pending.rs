//! Correlation table for in-flight requests.
//!
//! Every caller blocked in `send_command` owns one [`WaitSlot`] registered
//! under its request id. The response router looks the id up, removes the
//! entry and fills the slot; the caller's [`PendingGuard`] removes the entry
//! on every other exit path. The table therefore holds exactly the calls that
//! are currently waiting.

use crate::protocol::ResponseEnvelope;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A queue-of-one a single caller waits on.
#[derive(Debug, Default)]
pub struct WaitSlot {
    response: Mutex<Option<ResponseEnvelope>>,
    ready: Condvar,
}

impl WaitSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the response and wake the waiter.
    pub fn deliver(&self, response: ResponseEnvelope) {
        *self.response.lock() = Some(response);
        self.ready.notify_all();
    }

    /// Block until a response is delivered or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<ResponseEnvelope> {
        let mut response = self.response.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while response.is_none() {
                    if self.ready.wait_until(&mut response, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while response.is_none() {
                    self.ready.wait(&mut response);
                }
            }
        }
        response.take()
    }
}

/// Map from request id to the slot its caller waits on.
#[derive(Debug, Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<u64, Arc<WaitSlot>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`. The entry lives until the response is
    /// delivered or the returned guard is dropped.
    pub fn register(&self, id: u64) -> PendingGuard<'_> {
        let slot = Arc::new(WaitSlot::new());
        self.slots.lock().insert(id, Arc::clone(&slot));
        PendingGuard {
            table: self,
            id,
            slot,
        }
    }

    /// Hand a response to the caller waiting on its id.
    ///
    /// Returns `false` when nobody is waiting (no id, already timed out, or
    /// never registered); the response is dropped.
    pub fn deliver(&self, response: ResponseEnvelope) -> bool {
        let Some(id) = response.id else {
            return false;
        };
        let slot = self.slots.lock().remove(&id);
        match slot {
            Some(slot) => {
                slot.deliver(response);
                true
            }
            None => false,
        }
    }

    /// Number of callers currently waiting.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration of one in-flight request. Dropping it removes the entry.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: u64,
    slot: Arc<WaitSlot>,
}

impl PendingGuard<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the response for this id arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<ResponseEnvelope> {
        self.slot.wait(timeout)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.slots.lock().remove(&self.id);
    }
}
