//! Per-owner admission control
//!
//! Counters live behind a single mutex so check-and-increment is atomic:
//! under any number of simultaneous attempts for one owner, at most
//! `max_concurrent` succeed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

struct GateInner {
    max_concurrent: usize,
    active: Mutex<HashMap<String, usize>>,
}

/// Shared counter of active tasks per owner
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                max_concurrent,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Take a slot for `owner` if one is free
    pub fn try_acquire(&self, owner: &str) -> bool {
        let mut active = self.inner.active.lock();
        let held = active.get(owner).copied().unwrap_or(0);

        if held >= self.inner.max_concurrent {
            debug!(owner, active = held, "Admission refused");
            return false;
        }
        *active.entry(owner.to_string()).or_insert(0) += 1;
        true
    }

    /// Give a slot back; no-op when `owner` holds none
    pub fn release(&self, owner: &str) {
        let mut active = self.inner.active.lock();
        match active.get_mut(owner) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                active.remove(owner);
            }
            None => warn!(owner, "Release without an active slot"),
        }
    }

    /// Slots currently held by `owner`
    pub fn active(&self, owner: &str) -> usize {
        self.inner.active.lock().get(owner).copied().unwrap_or(0)
    }

    /// Acquire wrapped in a guard that releases on drop
    pub fn try_reserve(&self, owner: &str) -> Option<CapacitySlot> {
        if self.try_acquire(owner) {
            Some(CapacitySlot {
                gate: self.clone(),
                owner: owner.to_string(),
            })
        } else {
            None
        }
    }
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("active", &*self.inner.active.lock())
            .finish()
    }
}

/// A held admission slot
///
/// Released exactly once: by `release()` or when dropped, including while
/// unwinding.
#[derive(Debug)]
pub struct CapacitySlot {
    gate: ConcurrencyGate,
    owner: String,
}

impl CapacitySlot {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CapacitySlot {
    fn drop(&mut self) {
        self.gate.release(&self.owner);
    }
}
