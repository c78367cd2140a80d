//! Single-slot call registry
//!
//! At most one non-finished call may exist per device. The registry is the
//! only shared mutable state in the core and is consulted only at setup:
//! [`CallSlotRegistry::acquire`] hands out a [`CallSlot`] guard that travels
//! with the call and frees the slot when it is released or dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::call::CallId;
use crate::error::{SetupError, SetupResult};

#[derive(Debug)]
struct Holder {
    call_id: CallId,
    token: u64,
}

#[derive(Debug, Default)]
struct RegistryInner {
    holder: Mutex<Option<Holder>>,
    next_token: AtomicU64,
}

/// Process-wide owner of the single call slot.
///
/// Cloning is cheap; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct CallSlotRegistry {
    inner: Arc<RegistryInner>,
}

impl CallSlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `call_id`.
    ///
    /// Fails with [`SetupError::CallAlreadyActive`] while another slot guard
    /// is alive; the current holder is not touched.
    pub fn acquire(&self, call_id: &CallId) -> SetupResult<CallSlot> {
        let mut holder = self.inner.holder.lock();
        if let Some(active) = holder.as_ref() {
            debug!(requested = %call_id, active = %active.call_id, "Call slot busy");
            return Err(SetupError::CallAlreadyActive {
                active: active.call_id.clone(),
            });
        }

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        *holder = Some(Holder {
            call_id: call_id.clone(),
            token,
        });
        info!(call_id = %call_id, "Call slot acquired");

        Ok(CallSlot {
            registry: self.inner.clone(),
            call_id: call_id.clone(),
            token,
            released: false,
        })
    }

    /// Fail fast if the slot is taken, without claiming it
    pub fn ensure_vacant(&self) -> SetupResult<()> {
        match self.active() {
            Some(active) => Err(SetupError::CallAlreadyActive { active }),
            None => Ok(()),
        }
    }

    /// Id of the call currently holding the slot
    pub fn active(&self) -> Option<CallId> {
        self.inner.holder.lock().as_ref().map(|h| h.call_id.clone())
    }

    pub fn is_vacant(&self) -> bool {
        self.inner.holder.lock().is_none()
    }

    /// Whether `slot` is the live holder of this registry
    pub fn is_held_by(&self, slot: &CallSlot) -> bool {
        Arc::ptr_eq(&self.inner, &slot.registry)
            && self
                .inner
                .holder
                .lock()
                .as_ref()
                .is_some_and(|h| h.token == slot.token)
    }
}

/// Exclusive claim on the call slot.
///
/// Released exactly once: explicitly through [`CallSlot::release`] or
/// implicitly on drop.
#[derive(Debug)]
pub struct CallSlot {
    registry: Arc<RegistryInner>,
    call_id: CallId,
    token: u64,
    released: bool,
}

impl CallSlot {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Move the claim to `call_id`, keeping the slot held throughout.
    ///
    /// Used when the slot is reserved before the final call id is known.
    pub fn rekey(&mut self, call_id: CallId) {
        let mut holder = self.registry.holder.lock();
        if let Some(h) = holder.as_mut().filter(|h| h.token == self.token) {
            debug!(from = %self.call_id, to = %call_id, "Call slot re-keyed");
            h.call_id = call_id.clone();
            self.call_id = call_id;
        }
    }

    /// Free the slot now
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut holder = self.registry.holder.lock();
        if holder.as_ref().is_some_and(|h| h.token == self.token) {
            *holder = None;
            info!(call_id = %self.call_id, "Call slot released");
        }
    }
}

impl Drop for CallSlot {
    fn drop(&mut self) {
        self.release_inner();
    }
}
