//! Workflow state machines layered over `Handle`/`SegmentWriter` (spec §4.9).
//!
//! The teacher never writes an image — it is a pure reader — so these three
//! modules have no direct teacher precedent. They follow the same plain-
//! struct-with-an-explicit-state-field idiom the rest of the engine uses,
//! logging transitions through `log::{info, debug, warn}` the way `ewf::Handle`
//! does, and all three poll a shared `AbortFlag` at chunk/section/I/O
//! boundaries (spec §5 "Cancellation").

pub mod acquire;
pub mod export;
pub mod verify;

pub use acquire::{AcquireOptions, AcquireReport, AcquireState, AcquireWorkflow};
pub use export::{ExportOptions, ExportReport, ExportState, ExportTarget, ExportWorkflow};
pub use verify::{CorruptedChunk, VerifyReport, VerifyState, VerifyWorkflow};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cooperative-cancellation flag. `signal_abort()` (spec §4.8) just
/// sets this; in-flight I/O completes, and the next loop boundary observes it.
pub type AbortFlag = Arc<AtomicBool>;

pub fn new_abort_flag() -> AbortFlag {
    Arc::new(AtomicBool::new(false))
}

pub fn is_aborted(flag: &AbortFlag) -> bool {
    flag.load(Ordering::SeqCst)
}
