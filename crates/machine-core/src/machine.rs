//! Machine facade: bring-up orchestration and whole-machine operations.
//!
//! Assembles the bus, scheduler, signal lines, and slot manager from a
//! provisioning bundle, wires devices with explicit dependencies, and owns
//! the operations that cut across components: overlay switching, reset, and
//! debug-token issuance.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::bus::MemoryBus;
use crate::device::{Device, DeviceContext, DeviceId, DeviceRef};
use crate::error::{BringUpError, WiringError};
use crate::mapping::MappingStack;
use crate::physical::{DebugToken, PoolRef};
use crate::region::{PlacedRegion, ProvisioningBundle, RegionManager};
use crate::scheduler::Scheduler;
use crate::signal::SignalSet;
use crate::slots::{SlotAddressMap, SlotCardRef, SlotManager};

/// An assembled, runnable machine.
///
/// Produced whole by [`Machine::bring_up`] or not at all; there is no
/// partially wired state to observe.
pub struct Machine {
    scheduler: Rc<RefCell<Scheduler>>,
    signals: Rc<RefCell<SignalSet>>,
    slots: Rc<RefCell<SlotManager>>,
    bus: MemoryBus,
    pools: BTreeMap<String, PoolRef>,
    placements: Vec<PlacedRegion>,
    devices: Vec<(DeviceId, DeviceRef)>,
    overlays: Vec<MappingStack>,
    debug_features: bool,
    initialized: bool,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .field("devices", &self.devices.len())
            .field("overlays", &self.overlays.len())
            .field("debug_features", &self.debug_features)
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Brings up a machine with the default slot geometry.
    ///
    /// # Errors
    ///
    /// Any [`BringUpError`] from region assembly; nothing is partially
    /// constructed on failure.
    pub fn bring_up(bundle: &ProvisioningBundle) -> Result<Self, BringUpError> {
        Self::bring_up_with_slots(bundle, SlotAddressMap::default())
    }

    /// Brings up a machine with explicit slot geometry.
    ///
    /// # Errors
    ///
    /// Any [`BringUpError`] from region assembly.
    pub fn bring_up_with_slots(
        bundle: &ProvisioningBundle,
        slot_map: SlotAddressMap,
    ) -> Result<Self, BringUpError> {
        let assembled =
            RegionManager::from_bundle(bundle)?.assemble(bundle.address_space_bytes)?;
        let mut bus = MemoryBus::with_page_table(assembled.page_table);
        let slots = Rc::new(RefCell::new(SlotManager::new(slot_map)));
        bus.traps_mut().attach_slot_manager(Rc::clone(&slots));

        Ok(Self {
            scheduler: Rc::new(RefCell::new(Scheduler::new())),
            signals: Rc::new(RefCell::new(SignalSet::new())),
            slots,
            bus,
            pools: assembled.pools,
            placements: assembled.placements,
            devices: Vec::new(),
            overlays: Vec::new(),
            debug_features: bundle.debug_features,
            initialized: false,
        })
    }

    /// Shared handle to the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> Rc<RefCell<Scheduler>> {
        Rc::clone(&self.scheduler)
    }

    /// Shared handle to the signal lines.
    #[must_use]
    pub fn signals(&self) -> Rc<RefCell<SignalSet>> {
        Rc::clone(&self.signals)
    }

    /// Shared handle to the slot manager.
    #[must_use]
    pub fn slots(&self) -> Rc<RefCell<SlotManager>> {
        Rc::clone(&self.slots)
    }

    /// The bus.
    #[must_use]
    pub const fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    /// Mutable bus access for dispatching and wiring.
    pub const fn bus_mut(&mut self) -> &mut MemoryBus {
        &mut self.bus
    }

    /// Physical pool by region name.
    #[must_use]
    pub fn pool(&self, name: &str) -> Option<PoolRef> {
        self.pools.get(name).map(Rc::clone)
    }

    /// Final region placements, in assembly order.
    #[must_use]
    pub fn placements(&self) -> &[PlacedRegion] {
        &self.placements
    }

    /// Registers a device under an explicit identity.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::DuplicateDeviceId`] when the id is taken.
    pub fn register_device(&mut self, id: DeviceId, device: DeviceRef) -> Result<(), WiringError> {
        if self.devices.iter().any(|(existing, _)| *existing == id) {
            return Err(WiringError::DuplicateDeviceId(id.0));
        }
        self.devices.push((id, device));
        Ok(())
    }

    /// Installs an expansion card.
    ///
    /// # Errors
    ///
    /// Propagates slot-manager wiring errors.
    pub fn install_card(&mut self, slot: u8, card: SlotCardRef) -> Result<(), WiringError> {
        self.slots.borrow_mut().install_card(slot, card)
    }

    /// Runs every device's `initialize` hook exactly once, after all
    /// devices exist and are wired. A second call is a no-op.
    pub fn initialize_devices(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        for (id, device) in &self.devices {
            let ctx = DeviceContext {
                scheduler: Rc::clone(&self.scheduler),
                signals: Rc::clone(&self.signals),
                device_id: *id,
            };
            device.borrow_mut().initialize(&ctx);
        }
    }

    /// Machine reset: power-on state without re-wiring.
    ///
    /// Clears the timeline and signal lines, releases the expansion window,
    /// resets every device, and zeroes bus counters. Memory contents are
    /// preserved, as on real hardware.
    pub fn reset(&mut self) {
        self.scheduler.borrow_mut().reset();
        self.signals.borrow_mut().clear();
        self.slots.borrow_mut().reset();
        for (_, device) in &self.devices {
            device.borrow_mut().reset();
        }
        self.bus.reset_stats();
    }

    /// Registers an overlay stack and applies its current state to the page
    /// table. Returns the overlay id used by the switching operations.
    pub fn add_overlay(&mut self, stack: MappingStack) -> usize {
        let id = self.overlays.len();
        self.overlays.push(stack);
        self.apply_overlay(id);
        id
    }

    /// The overlay stack registered under `id`.
    #[must_use]
    pub fn overlay(&self, id: usize) -> Option<&MappingStack> {
        self.overlays.get(id)
    }

    /// Flips one overlay candidate's active flag and rematerializes the
    /// range (a bank switch).
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::UnknownOverlay`] or
    /// [`WiringError::UnknownOverlayEntry`].
    pub fn set_overlay_active(
        &mut self,
        id: usize,
        region_id: &str,
        active: bool,
    ) -> Result<(), WiringError> {
        self.with_overlay_mut(id, |stack| stack.set_active(region_id, active))?
    }

    /// Mutates an overlay stack through `mutate`, then rematerializes the
    /// range. The closure's result is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::UnknownOverlay`] for an unregistered id.
    pub fn with_overlay_mut<R>(
        &mut self,
        id: usize,
        mutate: impl FnOnce(&mut MappingStack) -> R,
    ) -> Result<R, WiringError> {
        let stack = self
            .overlays
            .get_mut(id)
            .ok_or(WiringError::UnknownOverlay(id))?;
        let result = mutate(stack);
        self.apply_overlay(id);
        Ok(result)
    }

    /// Issues the privileged debug token, available only when the bundle
    /// enabled debug features.
    #[must_use]
    pub const fn debug_token(&self) -> Option<DebugToken> {
        if self.debug_features {
            Some(DebugToken::issue())
        } else {
            None
        }
    }

    /// Privileged physical write into a named pool.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::UnknownPool`] or the pool's range error.
    pub fn write_physical(
        &mut self,
        token: &DebugToken,
        pool: &str,
        offset: usize,
        data: &[u8],
    ) -> Result<(), WiringError> {
        let pool_ref = self
            .pools
            .get(pool)
            .ok_or_else(|| WiringError::UnknownPool(pool.to_owned()))?;
        pool_ref.borrow_mut().write_physical(token, offset, data)
    }

    fn apply_overlay(&mut self, id: usize) {
        let (range, rows): (_, Vec<_>) = {
            let stack = &self.overlays[id];
            let range = stack.range();
            let rows = (0..range.page_count)
                .map(|index| stack.page_entry_for(index))
                .collect();
            (range, rows)
        };
        for (index, row) in rows.into_iter().enumerate() {
            self.bus.install_page(range.first_page + index, row);
        }
    }
}

/// Convenience: register and immediately wrap a concrete device.
pub fn shared_device<D: Device + 'static>(device: D) -> Rc<RefCell<D>> {
    Rc::new(RefCell::new(device))
}

#[cfg(test)]
mod tests {
    use super::{shared_device, Machine};
    use crate::bus::access::{AccessWidth, BusAccess};
    use crate::bus::page::{PageCapabilities, PageEntry, RegionTag};
    use crate::device::{Device, DeviceContext, DeviceId};
    use crate::error::WiringError;
    use crate::mapping::{MappingEntry, MappingStack, PageRange};
    use crate::physical::PhysicalMemory;
    use crate::region::{ProvisioningBundle, RomImage};
    use crate::scheduler::EventKind;

    fn bundle() -> ProvisioningBundle {
        let mut bundle = ProvisioningBundle::with_ram(0x10000);
        bundle.rom_images.push(RomImage {
            name: "boot-rom".to_owned(),
            base: 0xF000,
            bytes: vec![0xEA; 0x1000],
        });
        bundle
    }

    struct NullDevice {
        initializations: u32,
        resets: u32,
    }

    impl Device for NullDevice {
        fn name(&self) -> &str {
            "null"
        }

        fn initialize(&mut self, _ctx: &DeviceContext) {
            self.initializations += 1;
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn bring_up_produces_a_routable_machine() {
        let mut machine = Machine::bring_up(&bundle()).expect("bundle is complete");

        let rom = machine
            .bus_mut()
            .read(&BusAccess::data_read(0xF000, AccessWidth::Byte, 0));
        assert_eq!(rom, 0xEA);

        machine
            .bus_mut()
            .write(&BusAccess::data_write(0x0100, AccessWidth::Byte, 0), 0x42);
        let ram = machine
            .bus_mut()
            .read(&BusAccess::data_read(0x0100, AccessWidth::Byte, 0));
        assert_eq!(ram, 0x42);
    }

    #[test]
    fn initialize_runs_once_and_reset_reaches_every_device() {
        let mut machine = Machine::bring_up(&bundle()).expect("bundle is complete");
        let device = shared_device(NullDevice {
            initializations: 0,
            resets: 0,
        });
        let handle: crate::device::DeviceRef = device.clone();
        machine
            .register_device(DeviceId(1), handle)
            .expect("fresh id");

        machine.initialize_devices();
        machine.initialize_devices();
        assert_eq!(device.borrow().initializations, 1);

        machine.reset();
        assert_eq!(device.borrow().resets, 1);
    }

    #[test]
    fn duplicate_device_id_is_rejected() {
        let mut machine = Machine::bring_up(&bundle()).expect("bundle is complete");
        let first = shared_device(NullDevice {
            initializations: 0,
            resets: 0,
        });
        let second = shared_device(NullDevice {
            initializations: 0,
            resets: 0,
        });
        machine
            .register_device(DeviceId(1), first)
            .expect("fresh id");
        assert!(matches!(
            machine.register_device(DeviceId(1), second),
            Err(WiringError::DuplicateDeviceId(1))
        ));
    }

    #[test]
    fn reset_clears_the_timeline_but_not_memory() {
        let mut machine = Machine::bring_up(&bundle()).expect("bundle is complete");
        machine
            .bus_mut()
            .write(&BusAccess::data_write(0x0200, AccessWidth::Byte, 0), 0x99);
        machine
            .scheduler()
            .borrow_mut()
            .schedule_at(100, EventKind::Timer, 0, None, Box::new(|_, _| {}));
        machine.scheduler().borrow_mut().advance(10);

        machine.reset();

        assert_eq!(machine.scheduler().borrow().now(), 0);
        assert_eq!(machine.scheduler().borrow().pending(), 0);
        let kept = machine
            .bus_mut()
            .read(&BusAccess::data_read(0x0200, AccessWidth::Byte, 0));
        assert_eq!(kept, 0x99);
    }

    #[test]
    fn overlay_switching_rematerializes_the_range() {
        let mut machine = Machine::bring_up(&bundle()).expect("bundle is complete");

        // A one-page overlay at 0xD000 backed by its own bank pool.
        let bank = PhysicalMemory::from_image("bank-d", vec![0x21; 0x1000], false).into_shared();
        let template = PageEntry {
            device: None,
            tag: RegionTag::Ram,
            physical_base: 0,
            caps: PageCapabilities::memory(),
            target: Some(crate::bus::target::RamTarget::new(bank).into_shared()),
        };
        let mut stack = MappingStack::new(PageRange {
            first_page: 0xD,
            page_count: 1,
        });
        stack.push(MappingEntry::new("bank-d", template));
        let overlay = machine.add_overlay(stack);

        // Candidate inactive: the overlay masks the RAM underneath.
        let floating = machine
            .bus_mut()
            .read(&BusAccess::data_read(0xD000, AccessWidth::Byte, 0));
        assert_eq!(floating, 0xFF);

        machine
            .set_overlay_active(overlay, "bank-d", true)
            .expect("known candidate");
        let banked = machine
            .bus_mut()
            .read(&BusAccess::data_read(0xD000, AccessWidth::Byte, 0));
        assert_eq!(banked, 0x21);

        machine
            .set_overlay_active(overlay, "bank-d", false)
            .expect("known candidate");
        let masked = machine
            .bus_mut()
            .read(&BusAccess::data_read(0xD000, AccessWidth::Byte, 0));
        assert_eq!(masked, 0xFF);
    }

    #[test]
    fn debug_token_requires_the_bundle_flag() {
        let machine = Machine::bring_up(&bundle()).expect("bundle is complete");
        assert!(machine.debug_token().is_none());

        let mut debug_bundle = bundle();
        debug_bundle.debug_features = true;
        let mut machine = Machine::bring_up(&debug_bundle).expect("bundle is complete");
        let token = machine.debug_token().expect("debug features enabled");

        machine
            .write_physical(&token, "boot-rom", 0, &[0x4C])
            .expect("pool exists");
        let patched = machine
            .bus_mut()
            .read(&BusAccess::data_read(0xF000, AccessWidth::Byte, 0));
        assert_eq!(patched, 0x4C);

        assert!(matches!(
            machine.write_physical(&token, "nope", 0, &[0]),
            Err(WiringError::UnknownPool(name)) if name == "nope"
        ));
    }
}
