use thiserror::Error;

use crate::traps::TrapOperation;

/// Failures raised while assembling a machine from a provisioning bundle.
///
/// Bring-up either produces a complete machine or one of these; a partially
/// wired machine is never returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BringUpError {
    /// The bundle requested zero bytes of RAM.
    #[error("provisioning bundle contains no RAM")]
    MissingRam,
    /// The bundle carried no boot ROM image.
    #[error("provisioning bundle contains no boot ROM image")]
    MissingBootRom,
    /// The address space size is not a whole number of pages.
    #[error("address space size {0:#x} is not page-aligned")]
    MisalignedAddressSpace(usize),
    /// A region's base or size is not page-aligned.
    #[error("region `{name}` is not page-aligned (base {base:#07x}, size {size:#x})")]
    MisalignedRegion {
        /// Name of the offending region.
        name: String,
        /// Requested base address.
        base: u32,
        /// Requested size in bytes.
        size: u32,
    },
    /// A region extends past the end of the address space.
    #[error("region `{name}` at {base:#07x}+{size:#x} exceeds the address space")]
    RegionOutOfRange {
        /// Name of the offending region.
        name: String,
        /// Requested base address.
        base: u32,
        /// Requested size in bytes.
        size: u32,
    },
    /// A relocatable region found no free window anywhere in the space.
    #[error("region `{name}` ({size:#x} bytes) cannot be placed without overlap")]
    PlacementConflict {
        /// Name of the offending region.
        name: String,
        /// Requested size in bytes.
        size: u32,
    },
    /// Every page of a non-relocatable region lost to higher-priority regions.
    #[error("region `{name}` is fully shadowed by higher-priority regions")]
    RegionShadowed {
        /// Name of the offending region.
        name: String,
    },
    /// Two regions in the bundle share a name; pools are keyed by name.
    #[error("duplicate region name `{name}` in bundle")]
    DuplicateRegionName {
        /// The repeated name.
        name: String,
    },
    /// A ROM image does not fit the region declared for it.
    #[error("image for region `{name}` is {image_len:#x} bytes but the region holds {size:#x}")]
    ImageLargerThanRegion {
        /// Name of the offending region.
        name: String,
        /// Image length in bytes.
        image_len: usize,
        /// Region size in bytes.
        size: u32,
    },
}

/// Programming-invariant violations in wiring code.
///
/// These indicate a bug in the code assembling the machine, not a guest
/// condition; they surface at the call site and never reach the guest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WiringError {
    /// A trap handler already exists for this (address, operation) pair.
    #[error("trap already registered at {address:#07x} for {operation:?} operations")]
    TrapAlreadyRegistered {
        /// Address of the existing registration.
        address: u32,
        /// Operation kind of the existing registration.
        operation: TrapOperation,
    },
    /// A trap address lies outside the bounded address space.
    #[error("trap address {address:#07x} is outside the address space")]
    TrapAddressOutOfRange {
        /// The rejected address.
        address: u32,
    },
    /// Slot index outside the fixed slot range.
    #[error("slot {0} is out of range")]
    SlotOutOfRange(u8),
    /// A card is already installed in this slot.
    #[error("slot {0} is already occupied")]
    SlotOccupied(u8),
    /// The operation requires a card in this slot.
    #[error("slot {0} is empty")]
    SlotEmpty(u8),
    /// The mapping stack holds no entry with this region id.
    #[error("overlay entry `{0}` not present in mapping stack")]
    UnknownOverlayEntry(String),
    /// The overlay index does not name a registered mapping stack.
    #[error("overlay {0} is not registered")]
    UnknownOverlay(usize),
    /// A composite sub-window overlaps one already declared.
    #[error("composite window {start:#05x}..={end:#05x} overlaps an existing window")]
    WindowOverlap {
        /// First in-page offset of the rejected window.
        start: u32,
        /// Last in-page offset of the rejected window.
        end: u32,
    },
    /// A composite sub-window is inverted or exceeds the page.
    #[error("composite window {start:#05x}..={end:#05x} does not fit a page")]
    WindowOutOfPage {
        /// First in-page offset of the rejected window.
        start: u32,
        /// Last in-page offset of the rejected window.
        end: u32,
    },
    /// A privileged physical write ran past the end of its pool.
    #[error("physical write of {len} bytes at offset {offset:#x} exceeds pool `{pool}`")]
    PhysicalRangeOutOfBounds {
        /// Pool the write targeted.
        pool: String,
        /// Starting byte offset.
        offset: usize,
        /// Length of the rejected write.
        len: usize,
    },
    /// The named physical pool does not exist.
    #[error("physical pool `{0}` does not exist")]
    UnknownPool(String),
    /// A device id was registered twice.
    #[error("device id {0} is already registered")]
    DuplicateDeviceId(u16),
}

#[cfg(test)]
mod tests {
    use super::{BringUpError, WiringError};
    use crate::traps::TrapOperation;

    #[test]
    fn bring_up_messages_name_the_offending_region() {
        let err = BringUpError::RegionShadowed {
            name: "main-ram".to_owned(),
        };
        assert!(err.to_string().contains("main-ram"));

        let err = BringUpError::MisalignedRegion {
            name: "rom".to_owned(),
            base: 0xF080,
            size: 0x800,
        };
        assert!(err.to_string().contains("rom"));
        assert!(err.to_string().contains("0x0f080"));
    }

    #[test]
    fn wiring_messages_carry_address_and_operation() {
        let err = WiringError::TrapAlreadyRegistered {
            address: 0xFD6A,
            operation: TrapOperation::Call,
        };
        let text = err.to_string();
        assert!(text.contains("0x0fd6a"));
        assert!(text.contains("Call"));
    }
}
