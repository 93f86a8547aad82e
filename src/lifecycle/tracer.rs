/*!
 * Lifecycle Tracer
 * Debug event log for buffer lifetimes
 */

use parking_lot::Mutex;
use std::fmt::Write as _;
use std::time::Instant;

/// Lifecycle operations worth recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Allocate,
    Acquire,
    Close,
    Send,
    Drop,
}

#[derive(Debug)]
struct TraceEvent {
    op: TraceOp,
    borrows: usize,
    at: Instant,
}

/// Records allocate/acquire/send/close/drop events for a shared region.
///
/// Tracing is compiled-in but only active in debug builds; release builds
/// keep the no-op fast path. The event log is what leak diagnostics print
/// when a region is released by the backstop instead of an explicit close.
#[derive(Debug)]
pub struct LifecycleTracer {
    events: Option<Mutex<Vec<TraceEvent>>>,
}

/// Cap on retained events per region, oldest evicted first
const MAX_TRACE_POINTS: usize = 50;

impl LifecycleTracer {
    pub fn new() -> Self {
        let enabled = cfg!(debug_assertions);
        Self {
            events: enabled.then(|| Mutex::new(Vec::new())),
        }
    }

    /// Disabled tracer (no-op on every record)
    pub fn disabled() -> Self {
        Self { events: None }
    }

    #[inline]
    pub fn record(&self, op: TraceOp, borrows: usize) {
        if let Some(events) = &self.events {
            let mut events = events.lock();
            if events.len() == MAX_TRACE_POINTS {
                events.remove(0);
            }
            events.push(TraceEvent {
                op,
                borrows,
                at: Instant::now(),
            });
        }
    }

    /// Render the recorded lifecycle, newest last
    pub fn dump(&self) -> String {
        let Some(events) = &self.events else {
            return String::from("lifecycle tracing disabled");
        };
        let events = events.lock();
        let mut out = String::new();
        let origin = events.first().map(|e| e.at);
        for event in events.iter() {
            let dt = origin
                .map(|t0| event.at.duration_since(t0).as_micros())
                .unwrap_or(0);
            let _ = writeln!(out, "{:?} (borrows = {}) T+{}us", event.op, event.borrows, dt);
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn event_count(&self) -> usize {
        self.events.as_ref().map(|e| e.lock().len()).unwrap_or(0)
    }
}

impl Default for LifecycleTracer {
    fn default() -> Self {
        Self::new()
    }
}
