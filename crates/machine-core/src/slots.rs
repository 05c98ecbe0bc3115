//! Expansion-slot management.
//!
//! A small number of numbered slots share one expansion-ROM address window;
//! at most one slot's card owns the window at a time. Selection is bus
//! state: selecting slot N first deselects the previous owner (both cards
//! are notified), and touching the sentinel address releases the window
//! entirely. Address geometry lives in [`SlotAddressMap`] and is injected at
//! bring-up; device code never hard-codes window addresses.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::access::BusAccess;
use crate::bus::target::BusTarget;
use crate::bus::FLOATING_BUS;
use crate::error::WiringError;

/// Number of expansion slots on the backplane.
pub const SLOT_COUNT: u8 = 8;

/// Address geometry of the slot windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SlotAddressMap {
    /// Base of the per-slot device-select register windows.
    pub io_base: u32,
    /// Bytes of device-select space per slot.
    pub io_stride: u32,
    /// Base of the per-slot firmware windows.
    pub firmware_base: u32,
    /// Bytes of firmware space per slot.
    pub firmware_stride: u32,
    /// Base of the shared expansion-ROM window.
    pub expansion_base: u32,
    /// Size of the shared expansion-ROM window.
    pub expansion_size: u32,
    /// Touching this address deselects the shared window.
    pub sentinel: u32,
}

impl Default for SlotAddressMap {
    fn default() -> Self {
        Self {
            io_base: 0x0C080,
            io_stride: 0x10,
            firmware_base: 0x0C100,
            firmware_stride: 0x100,
            expansion_base: 0x0C800,
            expansion_size: 0x800,
            sentinel: 0x0CFFF,
        }
    }
}

impl SlotAddressMap {
    /// Base of `slot`'s device-select register window.
    #[must_use]
    pub const fn device_select_base(&self, slot: u8) -> u32 {
        self.io_base + self.io_stride * slot as u32
    }

    /// Base of `slot`'s firmware window.
    #[must_use]
    pub const fn slot_firmware_base(&self, slot: u8) -> u32 {
        self.firmware_base + self.firmware_stride * slot as u32
    }
}

/// Contract an expansion card presents to the slot manager.
///
/// Cards also expose [`BusTarget`]s for their windows; those are wired by
/// bring-up code, not by the manager.
pub trait SlotCard {
    /// Human-readable card name.
    fn name(&self) -> &str;

    /// The shared expansion window now belongs to this card.
    fn on_expansion_selected(&mut self) {}

    /// The shared expansion window was taken away or released.
    fn on_expansion_deselected(&mut self) {}
}

/// Shared handle to an installed card.
pub type SlotCardRef = Rc<RefCell<dyn SlotCard>>;

/// Tracks installed cards and the single selected expansion window.
pub struct SlotManager {
    map: SlotAddressMap,
    cards: Vec<Option<SlotCardRef>>,
    selected: Option<u8>,
}

impl std::fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotManager")
            .field("selected", &self.selected)
            .field(
                "occupied",
                &self
                    .cards
                    .iter()
                    .enumerate()
                    .filter_map(|(slot, card)| card.as_ref().map(|_| slot))
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl SlotManager {
    /// Creates a manager with every slot empty and no window selected.
    #[must_use]
    pub fn new(map: SlotAddressMap) -> Self {
        Self {
            map,
            cards: (0..SLOT_COUNT).map(|_| None).collect(),
            selected: None,
        }
    }

    /// The address geometry this manager was built with.
    #[must_use]
    pub const fn address_map(&self) -> &SlotAddressMap {
        &self.map
    }

    /// Installs a card.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::SlotOutOfRange`] or
    /// [`WiringError::SlotOccupied`]; both are wiring bugs.
    pub fn install_card(&mut self, slot: u8, card: SlotCardRef) -> Result<(), WiringError> {
        let index = Self::index(slot)?;
        if self.cards[index].is_some() {
            return Err(WiringError::SlotOccupied(slot));
        }
        self.cards[index] = Some(card);
        Ok(())
    }

    /// The card installed in `slot`, if any.
    #[must_use]
    pub fn card(&self, slot: u8) -> Option<SlotCardRef> {
        let index = usize::from(slot);
        self.cards.get(index)?.as_ref().map(Rc::clone)
    }

    /// Slot whose card currently owns the expansion window.
    #[must_use]
    pub const fn selected_expansion(&self) -> Option<u8> {
        self.selected
    }

    /// Gives the expansion window to `slot`'s card.
    ///
    /// Any previously selected card is deselected (and notified) first, so
    /// the single-active-window invariant holds at every observable point.
    /// Re-selecting the current owner is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::SlotOutOfRange`] or [`WiringError::SlotEmpty`].
    pub fn select_expansion(&mut self, slot: u8) -> Result<(), WiringError> {
        let index = Self::index(slot)?;
        let Some(card) = self.cards[index].as_ref().map(Rc::clone) else {
            return Err(WiringError::SlotEmpty(slot));
        };
        if self.selected == Some(slot) {
            return Ok(());
        }
        self.deselect_expansion();
        self.selected = Some(slot);
        card.borrow_mut().on_expansion_selected();
        Ok(())
    }

    /// Releases the expansion window, notifying the owning card.
    pub fn deselect_expansion(&mut self) {
        if let Some(previous) = self.selected.take() {
            if let Some(card) = self.card(previous) {
                card.borrow_mut().on_expansion_deselected();
            }
        }
    }

    /// Power-on state: window released.
    pub fn reset(&mut self) {
        self.deselect_expansion();
    }

    fn index(slot: u8) -> Result<usize, WiringError> {
        if slot < SLOT_COUNT {
            Ok(usize::from(slot))
        } else {
            Err(WiringError::SlotOutOfRange(slot))
        }
    }
}

/// Bus target for the sentinel address: any guest touch releases the shared
/// expansion window. The snapshot path never deselects.
pub struct ExpansionSentinel {
    slots: Rc<RefCell<SlotManager>>,
}

impl std::fmt::Debug for ExpansionSentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpansionSentinel").finish_non_exhaustive()
    }
}

impl ExpansionSentinel {
    /// Binds the sentinel to its slot manager.
    #[must_use]
    pub const fn new(slots: Rc<RefCell<SlotManager>>) -> Self {
        Self { slots }
    }

    /// Wraps the sentinel in the shared handle used by composite windows.
    #[must_use]
    pub fn into_shared(self) -> crate::bus::target::TargetRef {
        Rc::new(RefCell::new(self))
    }
}

impl BusTarget for ExpansionSentinel {
    fn read(&mut self, _offset: u32, _access: &BusAccess) -> u8 {
        self.slots.borrow_mut().deselect_expansion();
        FLOATING_BUS
    }

    fn write(&mut self, _offset: u32, _value: u8, _access: &BusAccess) {
        self.slots.borrow_mut().deselect_expansion();
    }

    fn peek(&self, _offset: u32) -> Option<u8> {
        Some(FLOATING_BUS)
    }
}
