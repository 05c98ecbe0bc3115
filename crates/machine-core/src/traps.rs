//! ROM-trap registry: native interception of firmware routines.
//!
//! The registry sits on the hot path of every instruction fetch, so the miss
//! path is a single flat-array index: no hashing, no allocation, one
//! predictable branch. The address space is bounded, which makes a
//! per-address table affordable.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::WiringError;
use crate::scheduler::Cycle;
use crate::slots::SlotManager;

/// Operation kinds a trap may intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TrapOperation {
    /// Data read at the trapped address.
    Read,
    /// Data write at the trapped address.
    Write,
    /// Instruction fetch reaching the trapped address.
    Call,
}

impl TrapOperation {
    const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Call => 2,
        }
    }
}

/// Grouping used by tooling to bulk-toggle traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TrapCategory {
    /// Firmware-routine acceleration: native implementations shadowing ROM.
    Firmware,
    /// Diagnostics and instrumentation hooks.
    Diagnostics,
    /// Device-side shims.
    Io,
}

/// Outcome of consulting the registry for one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapResult {
    /// Nothing registered (or enabled) here; dispatch proceeds normally.
    NotHandled,
    /// The handler ran. Read/Write dispatch is consumed; a Call (fetch)
    /// still takes its byte from the underlying target.
    Handled,
    /// The handler ran and supplies the value: a read/fetch returns it, a
    /// write is consumed.
    HandledWithValue(u32),
}

/// The access context a handler fires with.
///
/// Handlers capture their wider dependencies (machine memory, CPU state,
/// scheduler) as shared handles at registration time; the frame carries only
/// the per-access facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    /// Trapped address.
    pub address: u32,
    /// Operation that reached the address.
    pub operation: TrapOperation,
    /// Value in flight for writes; `None` for reads and fetches.
    pub value: Option<u32>,
    /// Cycle the access carried.
    pub cycle: Cycle,
}

/// Handler invoked when a trap fires.
pub type TrapHandler = Box<dyn FnMut(&TrapFrame) -> TrapResult>;

/// Registration record for one trap.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TrapInfo {
    /// Trapped address.
    pub address: u32,
    /// Operation kind intercepted.
    pub operation: TrapOperation,
    /// Human-readable routine name (e.g. the firmware entry point).
    pub name: String,
    /// Tooling category.
    pub category: TrapCategory,
    /// Disabled traps report [`TrapResult::NotHandled`] without firing.
    pub enabled: bool,
    /// When set, the trap fires only while this slot's expansion-ROM window
    /// is selected; re-checked at execution time.
    pub slot_dependency: Option<u8>,
    /// Optional free-form description for tooling.
    pub description: Option<String>,
}

impl TrapInfo {
    /// A new enabled trap with no slot dependency.
    #[must_use]
    pub fn new(address: u32, operation: TrapOperation, name: &str, category: TrapCategory) -> Self {
        Self {
            address,
            operation,
            name: name.to_owned(),
            category,
            enabled: true,
            slot_dependency: None,
            description: None,
        }
    }

    /// Requires `slot`'s expansion window to be selected at fire time.
    #[must_use]
    pub const fn with_slot_dependency(mut self, slot: u8) -> Self {
        self.slot_dependency = Some(slot);
        self
    }

    /// Attaches a tooling description.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }
}

struct Registration {
    info: TrapInfo,
    handler: TrapHandler,
}

const NO_TRAP: u32 = u32::MAX;

/// O(1) address→handler lookup consulted on every fetch/read/write.
pub struct TrapRegistry {
    lookup: Vec<u32>,
    registrations: Vec<Registration>,
    slots: Option<Rc<RefCell<SlotManager>>>,
    address_space_bytes: usize,
}

impl fmt::Debug for TrapRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapRegistry")
            .field("registered", &self.registrations.len())
            .field("address_space_bytes", &self.address_space_bytes)
            .finish_non_exhaustive()
    }
}

impl TrapRegistry {
    /// Creates an empty registry covering `address_space_bytes` addresses.
    #[must_use]
    pub fn new(address_space_bytes: usize) -> Self {
        Self {
            lookup: vec![NO_TRAP; address_space_bytes * TrapOperation::COUNT],
            registrations: Vec::new(),
            slots: None,
            address_space_bytes,
        }
    }

    /// Attaches the slot manager consulted for slot-dependent traps.
    pub fn attach_slot_manager(&mut self, slots: Rc<RefCell<SlotManager>>) {
        self.slots = Some(slots);
    }

    /// Number of registered traps (enabled or not).
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registrations.len()
    }

    /// Iterates registration records for tooling.
    pub fn traps(&self) -> impl Iterator<Item = &TrapInfo> {
        self.registrations.iter().map(|entry| &entry.info)
    }

    /// Registers a handler for `(info.address, info.operation)`.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::TrapAlreadyRegistered`] when that exact pair
    /// already has a handler, or [`WiringError::TrapAddressOutOfRange`] when
    /// the address lies outside the bounded space. Both are wiring bugs.
    pub fn register(&mut self, info: TrapInfo, handler: TrapHandler) -> Result<(), WiringError> {
        let Some(slot) = self.lookup_slot(info.address, info.operation) else {
            return Err(WiringError::TrapAddressOutOfRange {
                address: info.address,
            });
        };
        if self.lookup[slot] != NO_TRAP {
            return Err(WiringError::TrapAlreadyRegistered {
                address: info.address,
                operation: info.operation,
            });
        }
        let index = u32::try_from(self.registrations.len())
            .map_err(|_| WiringError::TrapAddressOutOfRange {
                address: info.address,
            })?;
        self.registrations.push(Registration { info, handler });
        self.lookup[slot] = index;
        Ok(())
    }

    /// Consults the registry for one access.
    ///
    /// The miss path is one index and one compare. Slot-dependent traps
    /// re-check the owning slot's expansion-window selection here, not at
    /// registration time: slot selection is bus state that changes in
    /// between.
    pub fn try_execute(
        &mut self,
        address: u32,
        operation: TrapOperation,
        cycle: Cycle,
        value: Option<u32>,
    ) -> TrapResult {
        let Some(slot) = self.lookup_slot(address, operation) else {
            return TrapResult::NotHandled;
        };
        let index = self.lookup[slot];
        if index == NO_TRAP {
            return TrapResult::NotHandled;
        }
        let registration = &mut self.registrations[index as usize];
        if !registration.info.enabled {
            return TrapResult::NotHandled;
        }
        if let Some(required_slot) = registration.info.slot_dependency {
            let selected = self
                .slots
                .as_ref()
                .is_some_and(|slots| slots.borrow().selected_expansion() == Some(required_slot));
            if !selected {
                return TrapResult::NotHandled;
            }
        }
        let frame = TrapFrame {
            address,
            operation,
            value,
            cycle,
        };
        (registration.handler)(&frame)
    }

    /// Enables or disables one trap. Returns `false` when none is registered
    /// at that pair.
    pub fn set_enabled(&mut self, address: u32, operation: TrapOperation, enabled: bool) -> bool {
        let Some(slot) = self.lookup_slot(address, operation) else {
            return false;
        };
        let index = self.lookup[slot];
        if index == NO_TRAP {
            return false;
        }
        self.registrations[index as usize].info.enabled = enabled;
        true
    }

    /// Enables or disables every trap in `category`; returns how many were
    /// toggled. This is the "authentic ROM" switch: disable the firmware
    /// category and single-step through the real thing.
    pub fn set_category_enabled(&mut self, category: TrapCategory, enabled: bool) -> usize {
        let mut touched = 0;
        for registration in &mut self.registrations {
            if registration.info.category == category {
                registration.info.enabled = enabled;
                touched += 1;
            }
        }
        touched
    }

    fn lookup_slot(&self, address: u32, operation: TrapOperation) -> Option<usize> {
        let address = address as usize;
        (address < self.address_space_bytes)
            .then(|| address * TrapOperation::COUNT + operation.index())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{TrapCategory, TrapInfo, TrapOperation, TrapRegistry, TrapResult};
    use crate::error::WiringError;
    use crate::slots::{SlotAddressMap, SlotCard, SlotManager};

    struct QuietCard;

    impl SlotCard for QuietCard {
        fn name(&self) -> &str {
            "quiet"
        }
    }

    #[test]
    fn registered_trap_fires_with_frame_facts() {
        let mut registry = TrapRegistry::new(0x10000);
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        registry
            .register(
                TrapInfo::new(0xFDED, TrapOperation::Call, "COUT", TrapCategory::Firmware),
                Box::new(move |frame| {
                    *sink.borrow_mut() = Some((frame.address, frame.cycle));
                    TrapResult::Handled
                }),
            )
            .expect("fresh registration");

        let result = registry.try_execute(0xFDED, TrapOperation::Call, 42, None);
        assert_eq!(result, TrapResult::Handled);
        assert_eq!(*seen.borrow(), Some((0xFDED, 42)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = TrapRegistry::new(0x10000);
        let info = TrapInfo::new(0xFDED, TrapOperation::Read, "COUT", TrapCategory::Firmware);
        registry
            .register(info.clone(), Box::new(|_| TrapResult::Handled))
            .expect("fresh registration");

        let err = registry
            .register(info, Box::new(|_| TrapResult::Handled))
            .expect_err("second registration at same pair");
        assert!(matches!(
            err,
            WiringError::TrapAlreadyRegistered {
                address: 0xFDED,
                operation: TrapOperation::Read,
            }
        ));
    }

    #[test]
    fn same_address_different_operation_coexists() {
        let mut registry = TrapRegistry::new(0x10000);
        registry
            .register(
                TrapInfo::new(0xC080, TrapOperation::Read, "bank-probe", TrapCategory::Io),
                Box::new(|_| TrapResult::HandledWithValue(0x80)),
            )
            .expect("read registration");
        registry
            .register(
                TrapInfo::new(0xC080, TrapOperation::Write, "bank-set", TrapCategory::Io),
                Box::new(|_| TrapResult::Handled),
            )
            .expect("write registration at same address");
        assert_eq!(registry.registered_count(), 2);
    }

    #[test]
    fn disabled_trap_reports_not_handled() {
        let mut registry = TrapRegistry::new(0x10000);
        registry
            .register(
                TrapInfo::new(0xFCA8, TrapOperation::Call, "WAIT", TrapCategory::Firmware),
                Box::new(|_| TrapResult::Handled),
            )
            .expect("fresh registration");

        assert!(registry.set_enabled(0xFCA8, TrapOperation::Call, false));
        assert_eq!(
            registry.try_execute(0xFCA8, TrapOperation::Call, 0, None),
            TrapResult::NotHandled
        );

        assert!(registry.set_enabled(0xFCA8, TrapOperation::Call, true));
        assert_eq!(
            registry.try_execute(0xFCA8, TrapOperation::Call, 0, None),
            TrapResult::Handled
        );
    }

    #[test]
    fn category_toggle_reports_touched_count() {
        let mut registry = TrapRegistry::new(0x10000);
        for (address, name) in [(0xFDED, "COUT"), (0xFD0C, "RDKEY")] {
            registry
                .register(
                    TrapInfo::new(address, TrapOperation::Call, name, TrapCategory::Firmware),
                    Box::new(|_| TrapResult::Handled),
                )
                .expect("fresh registration");
        }
        registry
            .register(
                TrapInfo::new(0xC070, TrapOperation::Read, "paddle", TrapCategory::Io),
                Box::new(|_| TrapResult::Handled),
            )
            .expect("fresh registration");

        assert_eq!(
            registry.set_category_enabled(TrapCategory::Firmware, false),
            2
        );
        assert_eq!(
            registry.try_execute(0xFDED, TrapOperation::Call, 0, None),
            TrapResult::NotHandled
        );
        assert_eq!(
            registry.try_execute(0xC070, TrapOperation::Read, 0, None),
            TrapResult::Handled
        );
    }

    #[test]
    fn slot_dependent_trap_rechecks_selection_at_fire_time() {
        let slots = Rc::new(RefCell::new(SlotManager::new(SlotAddressMap::default())));
        slots
            .borrow_mut()
            .install_card(3, Rc::new(RefCell::new(QuietCard)))
            .expect("slot 3 free");

        let mut registry = TrapRegistry::new(0x10000);
        registry.attach_slot_manager(Rc::clone(&slots));
        registry
            .register(
                TrapInfo::new(0xC800, TrapOperation::Call, "card-entry", TrapCategory::Io)
                    .with_slot_dependency(3),
                Box::new(|_| TrapResult::Handled),
            )
            .expect("fresh registration");

        // Not selected yet: the trap must stay quiet.
        assert_eq!(
            registry.try_execute(0xC800, TrapOperation::Call, 0, None),
            TrapResult::NotHandled
        );

        slots.borrow_mut().select_expansion(3).expect("card present");
        assert_eq!(
            registry.try_execute(0xC800, TrapOperation::Call, 0, None),
            TrapResult::Handled
        );

        slots.borrow_mut().deselect_expansion();
        assert_eq!(
            registry.try_execute(0xC800, TrapOperation::Call, 0, None),
            TrapResult::NotHandled
        );
    }

    #[test]
    fn out_of_range_registration_is_a_wiring_error() {
        let mut registry = TrapRegistry::new(0x10000);
        let err = registry
            .register(
                TrapInfo::new(0x2_0000, TrapOperation::Read, "beyond", TrapCategory::Io),
                Box::new(|_| TrapResult::Handled),
            )
            .expect_err("address beyond space");
        assert!(matches!(
            err,
            WiringError::TrapAddressOutOfRange { address: 0x2_0000 }
        ));
    }
}
