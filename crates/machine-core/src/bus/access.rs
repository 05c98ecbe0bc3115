//! Bus access descriptors.
//!
//! Every transaction on the bus carries one of these. The descriptor is what
//! lets debuggers, DMA engines, and bank-switching hardware behave correctly:
//! a write is not just an address and a value, it is also a width, an
//! atomicity mode, an intent, an origin, and a side-effect policy.

use crate::bus::page::{page_index_of, PAGE_SIZE};
use crate::scheduler::Cycle;

/// Access width in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Word,
    /// 32-bit access.
    Dword,
}

impl AccessWidth {
    /// Number of bytes moved by an access of this width.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Dword => 4,
        }
    }

    /// Mask selecting the low bits carried by this width.
    #[must_use]
    pub const fn value_mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Dword => 0xFFFF_FFFF,
        }
    }
}

/// Whether a wide access may hit a target as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessMode {
    /// The target sees one wide transaction, if it supports that.
    Atomic,
    /// The bus splits the access into byte transactions in address order.
    Decomposed,
}

/// What the requester is doing with this access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessIntent {
    /// CPU data read.
    DataRead,
    /// CPU data write.
    DataWrite,
    /// CPU opcode/operand fetch; consults Call traps.
    InstructionFetch,
    /// Tooling read; must not disturb device state.
    DebugRead,
    /// Tooling write; must not disturb device state.
    DebugWrite,
    /// DMA engine read.
    DmaRead,
    /// DMA engine write.
    DmaWrite,
}

impl AccessIntent {
    /// Returns `true` for read-direction intents (fetch included).
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            Self::DataRead | Self::InstructionFetch | Self::DebugRead | Self::DmaRead
        )
    }

    /// Returns `true` for write-direction intents.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::DataWrite | Self::DebugWrite | Self::DmaWrite)
    }

    /// Returns `true` for the tooling intents.
    #[must_use]
    pub const fn is_debug(self) -> bool {
        matches!(self, Self::DebugRead | Self::DebugWrite)
    }

    /// Returns `true` for DMA-originated intents.
    #[must_use]
    pub const fn is_dma(self) -> bool {
        matches!(self, Self::DmaRead | Self::DmaWrite)
    }
}

/// Identifies the bus master that originated an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SourceId(pub u16);

impl SourceId {
    /// The CPU core.
    pub const CPU: Self = Self(0);
}

/// Per-access policy bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AccessFlags {
    /// The access must not mutate observable device state.
    pub no_side_effects: bool,
    /// Assemble/split wide values most-significant byte first.
    pub big_endian: bool,
}

/// One logical bus transaction.
///
/// Write values travel alongside the descriptor as a separate argument, the
/// low `width` bits being significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusAccess {
    /// Target address.
    pub address: u32,
    /// Access width.
    pub width: AccessWidth,
    /// Requested atomicity mode.
    pub mode: AccessMode,
    /// What the requester is doing.
    pub intent: AccessIntent,
    /// Originating bus master.
    pub source: SourceId,
    /// Cycle at which the access is issued.
    pub cycle: Cycle,
    /// Policy bits.
    pub flags: AccessFlags,
}

impl BusAccess {
    /// A CPU data read.
    #[must_use]
    pub const fn data_read(address: u32, width: AccessWidth, cycle: Cycle) -> Self {
        Self {
            address,
            width,
            mode: AccessMode::Atomic,
            intent: AccessIntent::DataRead,
            source: SourceId::CPU,
            cycle,
            flags: AccessFlags {
                no_side_effects: false,
                big_endian: false,
            },
        }
    }

    /// A CPU data write.
    #[must_use]
    pub const fn data_write(address: u32, width: AccessWidth, cycle: Cycle) -> Self {
        Self {
            intent: AccessIntent::DataWrite,
            ..Self::data_read(address, width, cycle)
        }
    }

    /// An instruction fetch (always byte-wide; consults Call traps).
    #[must_use]
    pub const fn fetch(address: u32, cycle: Cycle) -> Self {
        Self {
            intent: AccessIntent::InstructionFetch,
            ..Self::data_read(address, AccessWidth::Byte, cycle)
        }
    }

    /// A tooling read; side-effect-free by construction.
    #[must_use]
    pub const fn debug_read(address: u32, width: AccessWidth, cycle: Cycle) -> Self {
        Self {
            intent: AccessIntent::DebugRead,
            flags: AccessFlags {
                no_side_effects: true,
                big_endian: false,
            },
            ..Self::data_read(address, width, cycle)
        }
    }

    /// A tooling write; side-effect-free by construction.
    #[must_use]
    pub const fn debug_write(address: u32, width: AccessWidth, cycle: Cycle) -> Self {
        Self {
            intent: AccessIntent::DebugWrite,
            ..Self::debug_read(address, width, cycle)
        }
    }

    /// A DMA engine read on behalf of `source`.
    #[must_use]
    pub const fn dma_read(address: u32, width: AccessWidth, cycle: Cycle, source: SourceId) -> Self {
        Self {
            intent: AccessIntent::DmaRead,
            source,
            ..Self::data_read(address, width, cycle)
        }
    }

    /// A DMA engine write on behalf of `source`.
    #[must_use]
    pub const fn dma_write(
        address: u32,
        width: AccessWidth,
        cycle: Cycle,
        source: SourceId,
    ) -> Self {
        Self {
            intent: AccessIntent::DmaWrite,
            source,
            ..Self::dma_read(address, width, cycle, source)
        }
    }

    /// Marks the access decomposed regardless of target support.
    #[must_use]
    pub const fn decomposed(self) -> Self {
        Self {
            mode: AccessMode::Decomposed,
            ..self
        }
    }

    /// Marks the access side-effect-free.
    #[must_use]
    pub const fn side_effect_free(self) -> Self {
        Self {
            flags: AccessFlags {
                no_side_effects: true,
                big_endian: self.flags.big_endian,
            },
            ..self
        }
    }

    /// Marks the access big-endian.
    #[must_use]
    pub const fn big_endian(self) -> Self {
        Self {
            flags: AccessFlags {
                no_side_effects: self.flags.no_side_effects,
                big_endian: true,
            },
            ..self
        }
    }

    /// `true` when the access is forbidden from mutating device state,
    /// either by debug intent or by the explicit flag.
    #[must_use]
    pub const fn is_side_effect_free(&self) -> bool {
        self.flags.no_side_effects || self.intent.is_debug()
    }

    /// Address of the last byte moved by this access.
    #[must_use]
    pub const fn end_address(&self) -> u32 {
        self.address + (self.width.bytes() - 1)
    }

    /// `true` when the bytes of this access span two pages.
    #[must_use]
    pub const fn crosses_page(&self) -> bool {
        page_index_of(self.address) != page_index_of(self.end_address())
    }

    /// The atomicity mode actually honored by the bus.
    ///
    /// Page-straddling accesses are always decomposed, regardless of the
    /// requested mode: no target may silently receive half of a wide write
    /// meant for another device.
    #[must_use]
    pub const fn effective_mode(&self) -> AccessMode {
        if self.crosses_page() {
            AccessMode::Decomposed
        } else {
            self.mode
        }
    }
}

/// Compile-time page-size sanity for the descriptor helpers.
const _: () = assert!(PAGE_SIZE.is_power_of_two());
