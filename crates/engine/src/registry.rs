//! Resource Handle Registry
//!
//! Host-owned table binding opaque handle ids to live request contexts.
//! Shared by every in-flight task, so all operations go through one mutex.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::envelope::RequestContext;
use crate::error::{BridgeError, BridgeResult};

/// Opaque identifier for one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct HandleRegistry {
    entries: Mutex<HashMap<Handle, Arc<RequestContext>>>,
    next_id: AtomicU32,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first_id: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(first_id),
        }
    }

    /// Bind a request context to a fresh handle.
    ///
    /// Ids come from a wrapping counter; 0 and ids that are still live are
    /// skipped, so a live id is never handed out twice.
    pub fn allocate(&self, context: RequestContext) -> Handle {
        let context = Arc::new(context);
        let mut entries = self.lock();
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            let handle = Handle(id);
            if let Entry::Vacant(slot) = entries.entry(handle) {
                slot.insert(context);
                tracing::debug!(handle = id, live = entries.len(), "allocated request handle");
                return handle;
            }
        }
    }

    pub fn lookup(&self, handle: Handle) -> BridgeResult<Arc<RequestContext>> {
        self.lock()
            .get(&handle)
            .cloned()
            .ok_or(BridgeError::InvalidHandle(handle))
    }

    /// Release a handle. Idempotent: returns `false` when the handle was
    /// already released (or never allocated).
    pub fn release(&self, handle: Handle) -> bool {
        let removed = self.lock().remove(&handle).is_some();
        if removed {
            tracing::debug!(handle = handle.id(), "released request handle");
        }
        removed
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.lock().contains_key(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Handle, Arc<RequestContext>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
