/*!
 * Arc Drop
 * Shared single-shot release for buffer-backing regions
 */

use super::cleaner;
use super::tracer::{LifecycleTracer, TraceOp};
use crate::memory::{MemoryManager, Region};
use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;

/// The action that returns a region's bytes to wherever they came from.
///
/// A tagged variant rather than a trait hierarchy: managed memory goes back
/// to its manager, pooled memory runs the pool's recycle closure, and empty
/// or transferred regions release nothing.
pub enum ReleaseAction {
    /// Return the region to the manager that produced it
    Manager {
        manager: Arc<dyn MemoryManager>,
        region: Region,
    },
    /// Run a custom release path (pooled runs, test hooks)
    Custom(Box<dyn FnOnce() + Send>),
    /// Nothing to release
    None,
}

impl ReleaseAction {
    fn fire(self) {
        match self {
            ReleaseAction::Manager { manager, region } => manager.release_region(region),
            ReleaseAction::Custom(f) => f(),
            ReleaseAction::None => {}
        }
    }
}

impl std::fmt::Debug for ReleaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ReleaseAction::Manager { manager, region } => f
                .debug_struct("Manager")
                .field("manager", &manager.implementation_name())
                .field("capacity", &region.capacity())
                .finish(),
            ReleaseAction::Custom(_) => f.write_str("Custom"),
            ReleaseAction::None => f.write_str("None"),
        }
    }
}

/// Single-shot gate around a [`ReleaseAction`].
///
/// `take_action` drains the gate at most once, which makes explicit close
/// and the drop backstop race-free: whichever runs first gets the action,
/// the other sees an empty gate.
#[derive(Debug)]
pub(crate) struct ReleaseCell {
    gate: Mutex<Option<ReleaseAction>>,
    tracer: LifecycleTracer,
}

impl ReleaseCell {
    fn take_action(&self) -> Option<ReleaseAction> {
        self.gate.lock().take()
    }

    /// Whether the action has already fired
    pub(crate) fn is_spent(&self) -> bool {
        self.gate.lock().is_none()
    }
}

impl Drop for ReleaseCell {
    fn drop(&mut self) {
        // Backstop: the last handle is gone, release whatever is left.
        // Failures are swallowed; the backstop is best-effort by contract.
        if let Some(action) = self.gate.get_mut().take() {
            self.tracer.record(TraceOp::Drop, 0);
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                action.fire();
            })) {
                warn!(
                    "Release action panicked during backstop cleanup: {:?}; lifecycle: {}",
                    panic,
                    self.tracer.dump()
                );
            }
        }
    }
}

/// Reference-counted handle to a [`ReleaseCell`].
///
/// A buffer holds one handle; each acquire/slice/const-child clones it.
/// The wrapped action fires exactly once, when the last handle drops or
/// when the sole handle is explicitly closed. `is_owned` is true only for
/// a sole handle, which is what gates split/send/compact/ensure-writable.
#[derive(Debug, Clone)]
pub struct ArcDrop {
    cell: Arc<ReleaseCell>,
}

impl ArcDrop {
    pub fn new(action: ReleaseAction) -> Self {
        let cell = Arc::new(ReleaseCell {
            gate: Mutex::new(Some(action)),
            tracer: LifecycleTracer::new(),
        });
        cell.tracer.record(TraceOp::Allocate, 0);
        cleaner::register(&cell);
        Self { cell }
    }

    /// Layer a fresh owned handle over an inner shared release.
    ///
    /// The new handle is sole owner of its own cell, whose action releases
    /// one share of the inner handle. Split halves and const children use
    /// this so each comes out OWNED while the region itself stays shared.
    pub fn wrap(inner: ArcDrop) -> ArcDrop {
        ArcDrop::new(ReleaseAction::Custom(Box::new(move || inner.release())))
    }

    /// Share the release: one more handle over the same region
    pub fn acquire(&self) -> ArcDrop {
        let next = ArcDrop {
            cell: Arc::clone(&self.cell),
        };
        next.record(TraceOp::Acquire);
        next
    }

    /// True when this is the only handle to the region
    pub fn is_owned(&self) -> bool {
        Arc::strong_count(&self.cell) == 1
    }

    /// Number of additional handles sharing the region
    pub fn borrow_count(&self) -> usize {
        Arc::strong_count(&self.cell).saturating_sub(1)
    }

    pub(crate) fn record(&self, op: TraceOp) {
        self.cell.tracer.record(op, self.borrow_count());
    }

    /// Render the lifecycle event log for diagnostics
    pub fn trace_dump(&self) -> String {
        self.cell.tracer.dump()
    }

    /// Fire the release now if this is the last handle; otherwise just
    /// drop this handle's share.
    pub fn release(self) {
        self.record(TraceOp::Close);
        if let Some(cell) = Arc::into_inner(self.cell) {
            // Sole handle: fire eagerly instead of via the backstop so the
            // explicit close is what shows up in traces.
            if let Some(action) = cell.take_action() {
                action.fire();
            }
            // `cell` drops here with an empty gate.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_action(counter: &Arc<AtomicUsize>) -> ReleaseAction {
        let counter = Arc::clone(counter);
        ReleaseAction::Custom(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_release_fires_once_for_sole_handle() {
        let fired = Arc::new(AtomicUsize::new(0));
        let drop = ArcDrop::new(counting_action(&fired));
        assert!(drop.is_owned());
        drop.release();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_borrow_fires_the_wrapped_release() {
        let fired = Arc::new(AtomicUsize::new(0));
        let first = ArcDrop::new(counting_action(&fired));
        let second = first.acquire();
        assert!(!first.is_owned());
        assert_eq!(first.borrow_count(), 1);

        first.release();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        second.release();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plain_drop_is_the_backstop() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let _drop = ArcDrop::new(counting_action(&fired));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
