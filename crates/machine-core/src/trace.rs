//! Deterministic trace hooks and dispatch statistics.
//!
//! There is no logger in this core: anything time-stamped against a host
//! clock would break run-to-run comparability. Observability is a sink
//! receiving structured events in execution order, plus saturating counters
//! cheap enough to leave on.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::access::{AccessIntent, AccessWidth};
use crate::scheduler::{Cycle, EventKind};
use crate::traps::TrapOperation;

/// Shared handle to a trace sink, attachable to both the bus and the
/// scheduler so one sink observes the whole timeline.
pub type TraceHandle = Rc<RefCell<dyn TraceSink>>;

/// Events emitted in execution order when a sink is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// A completed bus transaction.
    Access {
        /// Transaction address.
        address: u32,
        /// Value read or written (low `width` bits).
        value: u32,
        /// Transaction width.
        width: AccessWidth,
        /// Requester intent.
        intent: AccessIntent,
        /// Cycle the access carried.
        cycle: Cycle,
    },
    /// A read that nothing answered.
    FloatingRead {
        /// Transaction address.
        address: u32,
        /// Cycle the access carried.
        cycle: Cycle,
    },
    /// A trap handler consumed or observed an access.
    TrapFired {
        /// Trapped address.
        address: u32,
        /// Trapped operation kind.
        operation: TrapOperation,
        /// Cycle the access carried.
        cycle: Cycle,
    },
    /// The scheduler dispatched an event.
    EventDispatched {
        /// Semantic class of the event.
        kind: EventKind,
        /// Dispatch priority (lower fired earlier at equal cycles).
        priority: u8,
        /// Opaque tag supplied at scheduling time.
        tag: Option<u32>,
        /// Cycle the event was due.
        due: Cycle,
        /// Cycle at which dispatch actually ran.
        at: Cycle,
    },
}

/// Sink receiving trace events in execution order.
pub trait TraceSink {
    /// Records one event. Implementations must not reorder.
    fn on_event(&mut self, event: &TraceEvent);
}

/// Saturating dispatch counters, in the spirit of a diagnostics window:
/// always on, never wrapping, reset explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusStats {
    /// Completed read transactions.
    pub reads: u64,
    /// Completed write transactions.
    pub writes: u64,
    /// Reads answered by the floating bus.
    pub floating_reads: u64,
    /// Writes discarded by unmapped or refusing pages.
    pub discarded_writes: u64,
    /// Accesses consumed or observed by a trap handler.
    pub trap_hits: u64,
    /// Wide accesses the bus split into byte transactions.
    pub decomposed_accesses: u64,
}

impl BusStats {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every counter to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn count_read(&mut self) {
        self.reads = self.reads.saturating_add(1);
    }

    pub(crate) fn count_write(&mut self) {
        self.writes = self.writes.saturating_add(1);
    }

    pub(crate) fn count_floating_read(&mut self) {
        self.floating_reads = self.floating_reads.saturating_add(1);
    }

    pub(crate) fn count_discarded_write(&mut self) {
        self.discarded_writes = self.discarded_writes.saturating_add(1);
    }

    pub(crate) fn count_trap_hit(&mut self) {
        self.trap_hits = self.trap_hits.saturating_add(1);
    }

    pub(crate) fn count_decomposed(&mut self) {
        self.decomposed_accesses = self.decomposed_accesses.saturating_add(1);
    }
}
