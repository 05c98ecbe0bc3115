//! The paged memory bus.
//!
//! Every CPU, DMA, and tooling access comes through here. Routing is O(1):
//! page index, row lookup, target dispatch. The trap registry is consulted
//! before the target so native firmware implementations can shadow ROM, and
//! the width-decomposition rule guarantees no target ever sees half of a
//! wide transaction meant for another device.

/// Access descriptors.
pub mod access;
/// Page table and page rows.
pub mod page;
/// Target trait and stock targets.
pub mod target;

use crate::bus::access::{AccessIntent, AccessMode, AccessWidth, BusAccess};
use crate::bus::page::{page_offset_of, PageCapabilities, PageEntry, PageTable};
use crate::bus::target::{compose_wide, split_wide, TargetRef};
use crate::error::BringUpError;
use crate::trace::{BusStats, TraceEvent, TraceHandle};
use crate::traps::{TrapOperation, TrapRegistry, TrapResult};

/// Value returned, per byte, for reads nothing answers.
///
/// All-ones matches the hardware this class of machine is built from;
/// applied uniformly to unmapped pages, composite gaps, and refused peeks.
pub const FLOATING_BUS: u8 = 0xFF;

/// Routing facts for one byte, copied out of the page row so trap
/// consultation can borrow the registry mutably.
struct Route {
    target: Option<TargetRef>,
    physical: u32,
    caps: PageCapabilities,
}

/// The address-routing spine.
pub struct MemoryBus {
    pages: PageTable,
    traps: TrapRegistry,
    stats: BusStats,
    trace: Option<TraceHandle>,
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("pages", &self.pages.page_count())
            .field("traps", &self.traps.registered_count())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl MemoryBus {
    /// Creates a bus with an unmapped page table covering
    /// `address_space_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`BringUpError::MisalignedAddressSpace`] for a size that is
    /// not a whole number of pages.
    pub fn new(address_space_bytes: usize) -> Result<Self, BringUpError> {
        let pages = PageTable::new(address_space_bytes)?;
        Ok(Self::with_page_table(pages))
    }

    /// Wraps an already-assembled page table (the bring-up path).
    #[must_use]
    pub fn with_page_table(pages: PageTable) -> Self {
        let traps = TrapRegistry::new(pages.address_space_bytes());
        Self {
            pages,
            traps,
            stats: BusStats::new(),
            trace: None,
        }
    }

    /// The page table.
    #[must_use]
    pub const fn pages(&self) -> &PageTable {
        &self.pages
    }

    /// Replaces one page row; bring-up and bank-switch only.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range page index (wiring bug).
    pub fn install_page(&mut self, page: usize, entry: PageEntry) {
        self.pages.install(page, entry);
    }

    /// The trap registry.
    #[must_use]
    pub const fn traps(&self) -> &TrapRegistry {
        &self.traps
    }

    /// Mutable trap registry, for registration and toggling.
    pub const fn traps_mut(&mut self) -> &mut TrapRegistry {
        &mut self.traps
    }

    /// Dispatch counters since the last reset.
    #[must_use]
    pub const fn stats(&self) -> BusStats {
        self.stats
    }

    /// Zeroes the dispatch counters.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Attaches a trace sink receiving access events in execution order.
    pub fn set_trace(&mut self, trace: TraceHandle) {
        self.trace = Some(trace);
    }

    /// Executes a read transaction; returns the value in the low `width`
    /// bits.
    ///
    /// Unmapped and unanswered bytes read as [`FLOATING_BUS`]; no
    /// guest-visible access ever errors.
    ///
    /// # Panics
    ///
    /// Panics when the access runs past the routed address space: that is a
    /// bug in the caller's wiring, not a guest-visible fault.
    pub fn read(&mut self, access: &BusAccess) -> u32 {
        let value = if access.width == AccessWidth::Byte {
            u32::from(self.read_byte(access.address, access))
        } else if access.is_side_effect_free() {
            // Snapshot reads decompose unconditionally: a wide transaction
            // against a device that cannot guarantee a mutation-free wide
            // read must not be attempted as one unit.
            self.stats.count_decomposed();
            compose_wide(access, |index| {
                self.read_byte(access.address + index, access)
            })
        } else if access.effective_mode() == AccessMode::Atomic {
            self.read_wide_atomic(access)
        } else {
            self.stats.count_decomposed();
            compose_wide(access, |index| {
                self.read_byte(access.address + index, access)
            })
        };
        self.stats.count_read();
        self.emit(TraceEvent::Access {
            address: access.address,
            value,
            width: access.width,
            intent: access.intent,
            cycle: access.cycle,
        });
        value & access.width.value_mask()
    }

    /// Executes a write transaction; the low `width` bits of `value` are
    /// significant.
    ///
    /// Writes nothing answers are discarded silently, like the hardware.
    ///
    /// # Panics
    ///
    /// Panics when the access runs past the routed address space; see
    /// [`MemoryBus::read`].
    pub fn write(&mut self, access: &BusAccess, value: u32) {
        let value = value & access.width.value_mask();
        if access.width == AccessWidth::Byte {
            self.write_byte(access.address, (value & 0xFF) as u8, access);
        } else if !access.is_side_effect_free()
            && access.effective_mode() == AccessMode::Atomic
        {
            self.write_wide_atomic(access, value);
        } else {
            self.stats.count_decomposed();
            split_wide(access, value, |index, byte| {
                self.write_byte(access.address + index, byte, access);
            });
        }
        self.stats.count_write();
        self.emit(TraceEvent::Access {
            address: access.address,
            value,
            width: access.width,
            intent: access.intent,
            cycle: access.cycle,
        });
    }

    fn route(&self, address: u32) -> Route {
        let entry = self.pages.entry(address);
        Route {
            target: entry.target.clone(),
            physical: entry.physical_base + page_offset_of(address),
            caps: entry.caps,
        }
    }

    fn read_byte(&mut self, address: u32, access: &BusAccess) -> u8 {
        let route = self.route(address);

        if access.is_side_effect_free() {
            return match route.target {
                Some(target) => {
                    let snapshot = target.borrow().peek(route.physical);
                    snapshot.unwrap_or(FLOATING_BUS)
                }
                None => {
                    self.stats.count_floating_read();
                    FLOATING_BUS
                }
            };
        }

        let operation = trap_operation_for(access.intent);
        if let Some(operation) = operation {
            match self.traps.try_execute(address, operation, access.cycle, None) {
                TrapResult::NotHandled => {}
                TrapResult::Handled => {
                    self.note_trap(address, operation, access);
                    if operation != TrapOperation::Call {
                        // Read consumed without a replacement value.
                        return FLOATING_BUS;
                    }
                    // A Call trap without a replacement still fetches the
                    // real byte underneath.
                }
                TrapResult::HandledWithValue(value) => {
                    self.note_trap(address, operation, access);
                    return (value & 0xFF) as u8;
                }
            }
        }

        match route.target {
            Some(target) => target.borrow_mut().read(route.physical, access),
            None => {
                self.stats.count_floating_read();
                self.emit(TraceEvent::FloatingRead {
                    address,
                    cycle: access.cycle,
                });
                FLOATING_BUS
            }
        }
    }

    fn write_byte(&mut self, address: u32, byte: u8, access: &BusAccess) {
        let route = self.route(address);

        if access.is_side_effect_free() {
            // A privileged-looking write through the normal bus still must
            // not strobe device state; only inert targets accept it.
            match route.target {
                Some(target) if !route.caps.has_side_effects => {
                    target.borrow_mut().write(route.physical, byte, access);
                }
                _ => self.stats.count_discarded_write(),
            }
            return;
        }

        if let Some(operation) = trap_operation_for(access.intent) {
            match self
                .traps
                .try_execute(address, operation, access.cycle, Some(u32::from(byte)))
            {
                TrapResult::NotHandled => {}
                TrapResult::Handled | TrapResult::HandledWithValue(_) => {
                    self.note_trap(address, operation, access);
                    return;
                }
            }
        }

        match route.target {
            Some(target) => target.borrow_mut().write(route.physical, byte, access),
            None => self.stats.count_discarded_write(),
        }
    }

    fn read_wide_atomic(&mut self, access: &BusAccess) -> u32 {
        let route = self.route(access.address);
        if !route.caps.supports_wide {
            self.stats.count_decomposed();
            return compose_wide(access, |index| {
                self.read_byte(access.address + index, access)
            });
        }

        if let Some(operation) = trap_operation_for(access.intent) {
            match self
                .traps
                .try_execute(access.address, operation, access.cycle, None)
            {
                TrapResult::NotHandled => {}
                TrapResult::Handled => {
                    self.note_trap(access.address, operation, access);
                    if operation != TrapOperation::Call {
                        return (u32::from(FLOATING_BUS) * 0x0101_0101) & access.width.value_mask();
                    }
                }
                TrapResult::HandledWithValue(value) => {
                    self.note_trap(access.address, operation, access);
                    return value & access.width.value_mask();
                }
            }
        }

        match route.target {
            Some(target) => target.borrow_mut().read_wide(route.physical, access),
            None => {
                self.stats.count_floating_read();
                self.emit(TraceEvent::FloatingRead {
                    address: access.address,
                    cycle: access.cycle,
                });
                (u32::from(FLOATING_BUS) * 0x0101_0101) & access.width.value_mask()
            }
        }
    }

    fn write_wide_atomic(&mut self, access: &BusAccess, value: u32) {
        let route = self.route(access.address);
        if !route.caps.supports_wide {
            self.stats.count_decomposed();
            split_wide(access, value, |index, byte| {
                self.write_byte(access.address + index, byte, access);
            });
            return;
        }

        if let Some(operation) = trap_operation_for(access.intent) {
            match self
                .traps
                .try_execute(access.address, operation, access.cycle, Some(value))
            {
                TrapResult::NotHandled => {}
                TrapResult::Handled | TrapResult::HandledWithValue(_) => {
                    self.note_trap(access.address, operation, access);
                    return;
                }
            }
        }

        match route.target {
            Some(target) => target.borrow_mut().write_wide(route.physical, value, access),
            None => self.stats.count_discarded_write(),
        }
    }

    fn note_trap(&mut self, address: u32, operation: TrapOperation, access: &BusAccess) {
        self.stats.count_trap_hit();
        self.emit(TraceEvent::TrapFired {
            address,
            operation,
            cycle: access.cycle,
        });
    }

    fn emit(&mut self, event: TraceEvent) {
        if let Some(trace) = &self.trace {
            trace.borrow_mut().on_event(&event);
        }
    }
}

/// Maps an intent to the trap operation it consults, if any. Debug intents
/// never consult traps: handlers are entitled to mutate state.
const fn trap_operation_for(intent: AccessIntent) -> Option<TrapOperation> {
    match intent {
        AccessIntent::InstructionFetch => Some(TrapOperation::Call),
        AccessIntent::DataRead | AccessIntent::DmaRead => Some(TrapOperation::Read),
        AccessIntent::DataWrite | AccessIntent::DmaWrite => Some(TrapOperation::Write),
        AccessIntent::DebugRead | AccessIntent::DebugWrite => None,
    }
}
