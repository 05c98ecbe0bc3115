//! Bus targets: the handlers a page routes to.
//!
//! A target answers byte transactions given a physical offset and the access
//! descriptor; wide transactions default to byte composition in address
//! order. Targets bound to plain memory also answer `peek`, the
//! side-effect-free snapshot path the debugger rides.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::access::{AccessIntent, BusAccess};
use crate::bus::page::PAGE_SIZE;
use crate::bus::FLOATING_BUS;
use crate::error::WiringError;
use crate::physical::PoolRef;

/// Shared handle to a bus target. Single logical thread of control;
/// `Rc<RefCell<…>>` is the sharing model throughout the core.
pub type TargetRef = Rc<RefCell<dyn BusTarget>>;

/// A handler bound to one or more pages.
pub trait BusTarget {
    /// Reads one byte at a physical offset.
    fn read(&mut self, offset: u32, access: &BusAccess) -> u8;

    /// Writes one byte at a physical offset.
    fn write(&mut self, offset: u32, value: u8, access: &BusAccess);

    /// Side-effect-free snapshot of one byte.
    ///
    /// Returns `None` when the target cannot guarantee a mutation-free read;
    /// the bus then yields the floating-bus value instead of risking a
    /// strobe clear.
    fn peek(&self, offset: u32) -> Option<u8> {
        let _ = offset;
        None
    }

    /// Reads a wide value as one unit, bytes composed in address order.
    ///
    /// Only called for atomic, non-page-straddling accesses against targets
    /// whose page declares wide support.
    fn read_wide(&mut self, offset: u32, access: &BusAccess) -> u32 {
        compose_wide(access, |index| {
            self.read(offset + index, access)
        })
    }

    /// Writes a wide value as one unit, bytes split in address order.
    fn write_wide(&mut self, offset: u32, value: u32, access: &BusAccess) {
        split_wide(access, value, |index, byte| {
            self.write(offset + index, byte, access);
        });
    }
}

/// Composes `width` bytes (fetched by address-order index) per the access
/// endianness flag.
pub(crate) fn compose_wide(access: &BusAccess, mut fetch: impl FnMut(u32) -> u8) -> u32 {
    let count = access.width.bytes();
    let mut value = 0u32;
    for index in 0..count {
        let byte = u32::from(fetch(index));
        if access.flags.big_endian {
            value = (value << 8) | byte;
        } else {
            value |= byte << (8 * index);
        }
    }
    value
}

/// Splits a wide value into `width` bytes (stored by address-order index)
/// per the access endianness flag.
pub(crate) fn split_wide(access: &BusAccess, value: u32, mut store: impl FnMut(u32, u8)) {
    let count = access.width.bytes();
    for index in 0..count {
        let shift = if access.flags.big_endian {
            8 * (count - 1 - index)
        } else {
            8 * index
        };
        store(index, ((value >> shift) & 0xFF) as u8);
    }
}

/// Read/write target backed by a physical pool.
#[derive(Debug)]
pub struct RamTarget {
    pool: PoolRef,
}

impl RamTarget {
    /// Binds a target to its backing pool.
    #[must_use]
    pub const fn new(pool: PoolRef) -> Self {
        Self { pool }
    }

    /// Wraps the target in a shared handle.
    #[must_use]
    pub fn into_shared(self) -> TargetRef {
        Rc::new(RefCell::new(self))
    }
}

impl BusTarget for RamTarget {
    fn read(&mut self, offset: u32, _access: &BusAccess) -> u8 {
        self.pool.borrow().byte(offset).unwrap_or(FLOATING_BUS)
    }

    fn write(&mut self, offset: u32, value: u8, _access: &BusAccess) {
        // Out-of-pool or read-only stores fall off the bus silently.
        let _ = self.pool.borrow_mut().store_byte(offset, value);
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        Some(self.pool.borrow().byte(offset).unwrap_or(FLOATING_BUS))
    }
}

/// Read-only target backed by a physical pool; writes vanish.
#[derive(Debug)]
pub struct RomTarget {
    pool: PoolRef,
}

impl RomTarget {
    /// Binds a target to its backing pool.
    #[must_use]
    pub const fn new(pool: PoolRef) -> Self {
        Self { pool }
    }

    /// Wraps the target in a shared handle.
    #[must_use]
    pub fn into_shared(self) -> TargetRef {
        Rc::new(RefCell::new(self))
    }
}

impl BusTarget for RomTarget {
    fn read(&mut self, offset: u32, _access: &BusAccess) -> u8 {
        self.pool.borrow().byte(offset).unwrap_or(FLOATING_BUS)
    }

    fn write(&mut self, _offset: u32, _value: u8, _access: &BusAccess) {
        // ROM does not respond to writes.
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        Some(self.pool.borrow().byte(offset).unwrap_or(FLOATING_BUS))
    }
}

struct SubWindow {
    start: u32,
    end: u32,
    target: TargetRef,
}

/// A target that owns a page but routes by offset to finer sub-targets.
///
/// Models pages like a 4 KiB I/O page holding soft switches, per-slot
/// firmware, and a bank-selected expansion window, without fragmenting the
/// page table below its fixed granularity. Offsets outside every window
/// float.
#[derive(Default)]
pub struct CompositeTarget {
    windows: Vec<SubWindow>,
}

impl std::fmt::Debug for CompositeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeTarget")
            .field("windows", &self.windows.len())
            .finish()
    }
}

impl CompositeTarget {
    /// Creates a composite with no windows; every offset floats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a sub-window covering in-page offsets `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::WindowOutOfPage`] for an inverted or
    /// page-exceeding range, [`WiringError::WindowOverlap`] when the range
    /// intersects an existing window. Both indicate a wiring bug.
    pub fn add_window(&mut self, start: u32, end: u32, target: TargetRef) -> Result<(), WiringError> {
        if start > end || end >= PAGE_SIZE as u32 {
            return Err(WiringError::WindowOutOfPage { start, end });
        }
        if self
            .windows
            .iter()
            .any(|window| start <= window.end && window.start <= end)
        {
            return Err(WiringError::WindowOverlap { start, end });
        }
        let position = self
            .windows
            .partition_point(|window| window.start < start);
        self.windows.insert(
            position,
            SubWindow {
                start,
                end,
                target,
            },
        );
        Ok(())
    }

    /// Resolves an in-page offset to its sub-target and relative offset.
    ///
    /// `None` is a floating-bus resolution. The intent is part of the
    /// resolution contract; plain windows route every intent identically.
    #[must_use]
    pub fn resolve_target(&self, offset: u32, _intent: AccessIntent) -> Option<(TargetRef, u32)> {
        let candidate = self
            .windows
            .partition_point(|window| window.start <= offset)
            .checked_sub(1)?;
        let window = &self.windows[candidate];
        (offset <= window.end).then(|| (Rc::clone(&window.target), offset - window.start))
    }

    /// Wraps the composite in a shared handle.
    #[must_use]
    pub fn into_shared(self) -> TargetRef {
        Rc::new(RefCell::new(self))
    }
}

impl BusTarget for CompositeTarget {
    fn read(&mut self, offset: u32, access: &BusAccess) -> u8 {
        match self.resolve_target(offset, access.intent) {
            Some((target, relative)) => target.borrow_mut().read(relative, access),
            None => FLOATING_BUS,
        }
    }

    fn write(&mut self, offset: u32, value: u8, access: &BusAccess) {
        if let Some((target, relative)) = self.resolve_target(offset, access.intent) {
            target.borrow_mut().write(relative, value, access);
        }
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        match self.resolve_target(offset, AccessIntent::DebugRead) {
            Some((target, relative)) => target.borrow().peek(relative),
            None => Some(FLOATING_BUS),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{BusTarget, CompositeTarget, RamTarget, RomTarget};
    use crate::bus::access::{AccessIntent, AccessWidth, BusAccess};
    use crate::bus::FLOATING_BUS;
    use crate::error::WiringError;
    use crate::physical::PhysicalMemory;

    struct CountingTarget {
        byte: u8,
        reads: Rc<RefCell<u32>>,
    }

    impl BusTarget for CountingTarget {
        fn read(&mut self, _offset: u32, _access: &BusAccess) -> u8 {
            *self.reads.borrow_mut() += 1;
            self.byte
        }

        fn write(&mut self, _offset: u32, value: u8, _access: &BusAccess) {
            self.byte = value;
        }
    }

    #[test]
    fn ram_target_round_trips_through_its_pool() {
        let pool = PhysicalMemory::new_ram("main-ram", 32).into_shared();
        let mut target = RamTarget::new(Rc::clone(&pool));
        let access = BusAccess::data_write(0, AccessWidth::Byte, 0);

        target.write(5, 0x42, &access);
        assert_eq!(pool.borrow().byte(5), Some(0x42));
        assert_eq!(
            target.read(5, &BusAccess::data_read(0, AccessWidth::Byte, 0)),
            0x42
        );
        assert_eq!(target.peek(5), Some(0x42));
    }

    #[test]
    fn rom_target_ignores_writes() {
        let pool = PhysicalMemory::from_image("rom", vec![0xD0; 8], true).into_shared();
        let mut target = RomTarget::new(pool);
        target.write(0, 0x00, &BusAccess::data_write(0, AccessWidth::Byte, 0));
        assert_eq!(
            target.read(0, &BusAccess::data_read(0, AccessWidth::Byte, 0)),
            0xD0
        );
    }

    #[test]
    fn default_wide_handlers_compose_in_address_order() {
        let pool = PhysicalMemory::new_ram("main-ram", 8).into_shared();
        let mut target = RamTarget::new(Rc::clone(&pool));

        let write = BusAccess::data_write(0, AccessWidth::Dword, 0);
        target.write_wide(0, 0xAABB_CCDD, &write);
        assert_eq!(pool.borrow().byte(0), Some(0xDD));
        assert_eq!(pool.borrow().byte(3), Some(0xAA));

        let read = BusAccess::data_read(0, AccessWidth::Dword, 0);
        assert_eq!(target.read_wide(0, &read), 0xAABB_CCDD);

        let read_be = read.big_endian();
        assert_eq!(target.read_wide(0, &read_be), 0xDDCC_BBAA);
    }

    #[test]
    fn composite_routes_by_offset_and_floats_in_gaps() {
        let reads = Rc::new(RefCell::new(0));
        let low = Rc::new(RefCell::new(CountingTarget {
            byte: 0x11,
            reads: Rc::clone(&reads),
        }));
        let high = Rc::new(RefCell::new(CountingTarget {
            byte: 0x22,
            reads: Rc::clone(&reads),
        }));

        let mut composite = CompositeTarget::new();
        composite
            .add_window(0x000, 0x0FF, low)
            .expect("low window fits");
        composite
            .add_window(0x800, 0xFFF, high)
            .expect("high window fits");

        let access = BusAccess::data_read(0, AccessWidth::Byte, 0);
        assert_eq!(composite.read(0x080, &access), 0x11);
        assert_eq!(composite.read(0x900, &access), 0x22);
        assert_eq!(composite.read(0x400, &access), FLOATING_BUS);
        assert_eq!(*reads.borrow(), 2);
    }

    #[test]
    fn composite_rejects_overlapping_or_oversized_windows() {
        let pool = PhysicalMemory::new_ram("scratch", 16).into_shared();
        let mut composite = CompositeTarget::new();
        composite
            .add_window(0x100, 0x1FF, RamTarget::new(Rc::clone(&pool)).into_shared())
            .expect("first window fits");

        let overlap = composite.add_window(
            0x180,
            0x280,
            RamTarget::new(Rc::clone(&pool)).into_shared(),
        );
        assert!(matches!(
            overlap,
            Err(WiringError::WindowOverlap { start: 0x180, end: 0x280 })
        ));

        let oversized =
            composite.add_window(0x800, 0x1000, RamTarget::new(pool).into_shared());
        assert!(matches!(
            oversized,
            Err(WiringError::WindowOutOfPage { .. })
        ));
    }

    #[test]
    fn composite_resolution_reports_relative_offsets() {
        let pool = PhysicalMemory::new_ram("scratch", 16).into_shared();
        let mut composite = CompositeTarget::new();
        composite
            .add_window(0x200, 0x2FF, RamTarget::new(pool).into_shared())
            .expect("window fits");

        let resolved = composite.resolve_target(0x210, AccessIntent::DataRead);
        let (_, relative) = resolved.expect("offset inside window");
        assert_eq!(relative, 0x10);
        assert!(composite
            .resolve_target(0x300, AccessIntent::DataRead)
            .is_none());
    }

    #[test]
    fn composite_gap_peek_floats_without_side_effects() {
        let composite = CompositeTarget::new();
        assert_eq!(composite.peek(0x123), Some(FLOATING_BUS));
    }
}
