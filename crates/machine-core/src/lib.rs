//! Bus, scheduler, and trap core for the Halcyon microcomputer emulator.
//!
//! This crate is the machine's backplane: the paged memory bus that routes
//! every access to the right device, the discrete-event scheduler that is
//! the single source of truth for time, and the trap registry that lets
//! native code shadow firmware routines. CPU cores, concrete peripherals,
//! and shells live elsewhere and consume these contracts.

/// Paged dispatch: access descriptors, page table, targets, and the bus.
pub mod bus;
pub use bus::access::{
    AccessFlags, AccessIntent, AccessMode, AccessWidth, BusAccess, SourceId,
};
pub use bus::page::{
    page_index_of, page_offset_of, PageCapabilities, PageEntry, PageTable, RegionTag, PAGE_SHIFT,
    PAGE_SIZE,
};
pub use bus::target::{BusTarget, CompositeTarget, RamTarget, RomTarget, TargetRef};
pub use bus::{MemoryBus, FLOATING_BUS};

/// Peripheral lifecycle contract and initialization context.
pub mod device;
pub use device::{Device, DeviceContext, DeviceId, DeviceRef};

/// Bring-up and wiring error taxonomy.
pub mod error;
pub use error::{BringUpError, WiringError};

/// Machine facade: bring-up orchestration and cross-component operations.
pub mod machine;
pub use machine::{shared_device, Machine};

/// Bank-switch overlay stacks.
pub mod mapping;
pub use mapping::{MappingEntry, MappingStack, PageRange};

/// Reference peripherals exercising the device and slot contracts.
pub mod peripherals;
pub use peripherals::{IntervalTimer, PrinterCard};

/// Physical memory pools and the privileged debug path.
pub mod physical;
pub use physical::{DebugToken, PhysicalMemory, PoolRef};

/// Region manager and provisioning bundle.
pub mod region;
pub use region::{
    page_aligned_len, AssembledMemory, DeviceConfig, MemoryRegion, PlacedRegion,
    ProvisioningBundle, RegionContents, RegionManager, RegionPermissions, RomImage, MAIN_RAM_POOL,
    RAM_PRIORITY, ROM_PRIORITY,
};

/// Discrete-event scheduler and the cycle counter.
pub mod scheduler;
pub use scheduler::{Cycle, EventCallback, EventHandle, EventKind, Scheduler};

/// Shared signal lines.
pub mod signal;
pub use signal::{SignalLine, SignalSet};

/// Expansion slots, the shared expansion window, and its sentinel.
pub mod slots;
pub use slots::{
    ExpansionSentinel, SlotAddressMap, SlotCard, SlotCardRef, SlotManager, SLOT_COUNT,
};

/// Deterministic trace hooks and dispatch statistics.
pub mod trace;
pub use trace::{BusStats, TraceEvent, TraceHandle, TraceSink};

/// ROM-trap registry.
pub mod traps;
pub use traps::{
    TrapCategory, TrapFrame, TrapHandler, TrapInfo, TrapOperation, TrapRegistry, TrapResult,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
