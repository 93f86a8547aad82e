/*!
 * Cleaner
 * Best-effort backstop registry and native-memory accounting
 */

use super::arc_drop::ReleaseCell;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Outstanding native bytes across all managers
static NATIVE_BYTES: AtomicU64 = AtomicU64::new(0);

fn registry() -> &'static SegQueue<Weak<ReleaseCell>> {
    static REGISTRY: OnceLock<SegQueue<Weak<ReleaseCell>>> = OnceLock::new();
    REGISTRY.get_or_init(SegQueue::new)
}

/// Register a release cell for sweep diagnostics.
/// Registration is lock-free; any thread may allocate.
pub(crate) fn register(cell: &Arc<ReleaseCell>) {
    registry().push(Arc::downgrade(cell));
}

/// Native bytes currently allocated and not yet released
pub fn allocated_native_bytes() -> u64 {
    NATIVE_BYTES.load(Ordering::Acquire)
}

pub(crate) fn record_native_alloc(bytes: usize) {
    NATIVE_BYTES.fetch_add(bytes as u64, Ordering::AcqRel);
}

pub(crate) fn record_native_free(bytes: usize) {
    NATIVE_BYTES.fetch_sub(bytes as u64, Ordering::AcqRel);
}

/// Prune dead registry entries and report how many regions are still live.
///
/// This is purely diagnostic: release happens through the drop protocol
/// (the last handle's drop fires the release action), so a sweep never
/// frees memory itself.
pub fn sweep() -> usize {
    let queue = registry();
    let mut live = Vec::new();
    while let Some(weak) = queue.pop() {
        if let Some(cell) = weak.upgrade() {
            if !cell.is_spent() {
                live.push(weak);
            }
        }
    }
    let count = live.len();
    for weak in live {
        queue.push(weak);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::arc_drop::{ArcDrop, ReleaseAction};

    // Unit tests in this binary run in parallel and all share the global
    // registry, so only monotone facts are asserted here; exact counts are
    // covered by the serialized integration tests.
    #[test]
    fn test_live_cell_is_counted() {
        let drop = ArcDrop::new(ReleaseAction::None);
        assert!(sweep() >= 1);
        std::mem::drop(drop);
    }
}
