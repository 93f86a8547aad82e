/*!
 * Lifecycle
 * Drop protocol, shared release, leak backstop, and diagnostics
 */

pub mod arc_drop;
pub mod cleaner;
pub mod tracer;

pub use arc_drop::{ArcDrop, ReleaseAction};
pub use tracer::{LifecycleTracer, TraceOp};
