//! Discrete-event scheduler: the single source of truth for time.
//!
//! Time advances only through [`Scheduler::advance`] (or the fast-forward
//! helpers); nothing in the core free-runs against a host clock. Devices
//! schedule future callbacks instead of polling, and every callback fires in
//! the total order (due, priority, sequence), so two runs with identical
//! inputs dispatch identically.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::trace::{TraceEvent, TraceHandle};

/// Monotonically increasing cycle counter; the only representation of time.
pub type Cycle = u64;

/// Semantic class of a scheduled event, carried into trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EventKind {
    /// Periodic or one-shot device timer.
    Timer,
    /// Completion of a modeled I/O operation.
    Io,
    /// Signal-line change (interrupt assertion/release).
    Signal,
    /// Storage/media activity (seek completion, sector ready).
    Media,
    /// Core-internal maintenance work.
    Housekeeping,
}

/// Capability permitting exactly one successful cancellation of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    id: u64,
}

/// Callback dispatched when an event comes due.
///
/// Consumed exactly once; receives the scheduler so it may schedule
/// follow-up events, and the cycle at which dispatch ran.
pub type EventCallback = Box<dyn FnOnce(&mut Scheduler, Cycle)>;

/// Total-order dispatch key. Lower compares earlier on every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EventKey {
    due: Cycle,
    priority: u8,
    sequence: u64,
}

struct QueuedEvent {
    key: EventKey,
    id: u64,
    kind: EventKind,
    tag: Option<u32>,
    callback: EventCallback,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// The authoritative cycle counter and discrete-event dispatcher.
pub struct Scheduler {
    now: Cycle,
    queue: BinaryHeap<Reverse<QueuedEvent>>,
    live: HashSet<u64>,
    next_id: u64,
    next_sequence: u64,
    trace: Option<TraceHandle>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("pending", &self.live.len())
            .finish_non_exhaustive()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a scheduler at cycle 0 with no pending events.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: 0,
            queue: BinaryHeap::new(),
            live: HashSet::new(),
            next_id: 0,
            next_sequence: 0,
            trace: None,
        }
    }

    /// Attaches a trace sink receiving dispatch events in execution order.
    pub fn set_trace(&mut self, trace: TraceHandle) {
        self.trace = Some(trace);
    }

    /// Current cycle. Monotone; moves only through explicit calls.
    #[must_use]
    pub const fn now(&self) -> Cycle {
        self.now
    }

    /// Number of events scheduled and not yet fired or cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    /// Schedules `callback` to fire once `now` reaches `due`.
    ///
    /// A past-or-current due cycle is legal and fires on the next dispatch.
    /// Ties at the same cycle dispatch in (priority, sequence) order, lower
    /// priority value first.
    pub fn schedule_at(
        &mut self,
        due: Cycle,
        kind: EventKind,
        priority: u8,
        tag: Option<u32>,
        callback: EventCallback,
    ) -> EventHandle {
        let id = self.next_id;
        self.next_id += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.live.insert(id);
        self.queue.push(Reverse(QueuedEvent {
            key: EventKey {
                due,
                priority,
                sequence,
            },
            id,
            kind,
            tag,
            callback,
        }));
        EventHandle { id }
    }

    /// Schedules `callback` to fire `delta` cycles from now.
    pub fn schedule_after(
        &mut self,
        delta: Cycle,
        kind: EventKind,
        priority: u8,
        tag: Option<u32>,
        callback: EventCallback,
    ) -> EventHandle {
        let due = self.now.saturating_add(delta);
        self.schedule_at(due, kind, priority, tag, callback)
    }

    /// Cancels a pending event.
    ///
    /// Returns `false` when the handle already fired or was already
    /// cancelled; never an error.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.live.remove(&handle.id)
    }

    /// Moves `now` forward by `delta` and dispatches everything due.
    ///
    /// Events scheduled from inside a callback are eligible within the same
    /// call when their due cycle has already passed.
    pub fn advance(&mut self, delta: Cycle) {
        self.now = self.now.saturating_add(delta);
        self.drain_due();
    }

    /// Dispatches events due at or before the current cycle without moving
    /// the clock.
    pub fn dispatch_due(&mut self) {
        self.drain_due();
    }

    /// Due cycle of the earliest pending event, if any.
    pub fn peek_next_due(&mut self) -> Option<Cycle> {
        self.purge_cancelled();
        self.queue.peek().map(|Reverse(event)| event.key.due)
    }

    /// Jumps the clock to the next pending event and dispatches everything
    /// then due. Returns `false` when nothing is pending.
    ///
    /// This is the idle fast-forward path: a "wait for interrupt" loop skips
    /// straight to the cycle where state can next change.
    pub fn jump_to_next_event_and_dispatch(&mut self) -> bool {
        match self.peek_next_due() {
            Some(due) => {
                if due > self.now {
                    self.now = due;
                }
                self.drain_due();
                true
            }
            None => false,
        }
    }

    /// Clears all pending events and returns the clock to cycle 0.
    ///
    /// Handle ids stay monotone across resets, so a handle issued before the
    /// reset can never cancel an event scheduled after it.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.live.clear();
        self.now = 0;
    }

    fn drain_due(&mut self) {
        loop {
            let due_now = self
                .queue
                .peek()
                .is_some_and(|Reverse(event)| event.key.due <= self.now);
            if !due_now {
                break;
            }
            if let Some(Reverse(event)) = self.queue.pop() {
                if !self.live.remove(&event.id) {
                    // Cancelled after insertion; entry is stale.
                    continue;
                }
                let now = self.now;
                self.emit(TraceEvent::EventDispatched {
                    kind: event.kind,
                    priority: event.key.priority,
                    tag: event.tag,
                    due: event.key.due,
                    at: now,
                });
                (event.callback)(self, now);
            }
        }
    }

    fn purge_cancelled(&mut self) {
        while let Some(Reverse(event)) = self.queue.peek() {
            if self.live.contains(&event.id) {
                break;
            }
            self.queue.pop();
        }
    }

    fn emit(&mut self, event: TraceEvent) {
        if let Some(trace) = &self.trace {
            trace.borrow_mut().on_event(&event);
        }
    }
}
