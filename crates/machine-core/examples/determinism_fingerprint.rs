//! Deterministic replay fingerprint generator used by CI cross-host
//! comparison: two runs of the same scripted machine must print the same
//! hash.

use std::cell::RefCell;
use std::rc::Rc;

use machine_core::{
    AccessWidth, BusAccess, DeviceId, DeviceRef, IntervalTimer, Machine, PageCapabilities,
    PageEntry, ProvisioningBundle, RegionTag, RomImage, TargetRef, TraceEvent, TraceSink,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

#[derive(Default)]
struct HashingSink {
    hash: u64,
}

impl HashingSink {
    fn mix(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.hash ^= u64::from(*byte);
            self.hash = self.hash.wrapping_mul(0x100_0000_01B3);
        }
    }
}

impl TraceSink for HashingSink {
    fn on_event(&mut self, event: &TraceEvent) {
        match *event {
            TraceEvent::Access {
                address,
                value,
                cycle,
                ..
            } => {
                self.mix(&[0x01]);
                self.mix(&address.to_le_bytes());
                self.mix(&value.to_le_bytes());
                self.mix(&cycle.to_le_bytes());
            }
            TraceEvent::FloatingRead { address, cycle } => {
                self.mix(&[0x02]);
                self.mix(&address.to_le_bytes());
                self.mix(&cycle.to_le_bytes());
            }
            TraceEvent::TrapFired { address, cycle, .. } => {
                self.mix(&[0x03]);
                self.mix(&address.to_le_bytes());
                self.mix(&cycle.to_le_bytes());
            }
            TraceEvent::EventDispatched {
                priority, due, at, ..
            } => {
                self.mix(&[0x04, priority]);
                self.mix(&due.to_le_bytes());
                self.mix(&at.to_le_bytes());
            }
        }
    }
}

fn scripted_machine() -> Machine {
    let mut bundle = ProvisioningBundle::with_ram(0x10000);
    bundle.rom_images.push(RomImage {
        name: "boot-rom".to_owned(),
        base: 0xF000,
        bytes: (0..0x1000).map(|index| (index & 0xFF) as u8).collect(),
    });
    Machine::bring_up(&bundle).expect("bundle is complete")
}

fn fingerprint() -> String {
    let mut machine = scripted_machine();
    let sink = Rc::new(RefCell::new(HashingSink {
        hash: 0xCBF2_9CE4_8422_2325,
    }));
    machine.bus_mut().set_trace(sink.clone());
    machine.scheduler().borrow_mut().set_trace(sink.clone());

    let timer = IntervalTimer::new();
    let device: DeviceRef = timer.clone();
    machine
        .register_device(DeviceId(7), device)
        .expect("fresh id");
    let target: TargetRef = timer.clone();
    machine.bus_mut().install_page(
        0xC,
        PageEntry {
            device: Some(DeviceId(7)),
            tag: RegionTag::Io,
            physical_base: 0,
            caps: PageCapabilities::device().with_peek(),
            target: Some(target),
        },
    );
    machine.initialize_devices();

    // Program the timer and run a scripted workload against RAM, ROM, and
    // the floating bus while expiries interleave.
    machine
        .bus_mut()
        .write(&BusAccess::data_write(0xC001, AccessWidth::Byte, 0), 0x80);
    machine
        .bus_mut()
        .write(&BusAccess::data_write(0xC002, AccessWidth::Byte, 0), 0x00);
    machine
        .bus_mut()
        .write(&BusAccess::data_write(0xC000, AccessWidth::Byte, 0), 0x03);

    for step in 0..64u32 {
        machine.scheduler().borrow_mut().advance(0x40);
        let cycle = machine.scheduler().borrow().now();
        machine.bus_mut().write(
            &BusAccess::data_write(0x1000 + step * 4, AccessWidth::Dword, cycle),
            0x0101_0101u32.wrapping_mul(step),
        );
        let _ = machine
            .bus_mut()
            .read(&BusAccess::data_read(0xF000 + step, AccessWidth::Byte, cycle));
        let _ = machine
            .bus_mut()
            .read(&BusAccess::data_read(0xC003, AccessWidth::Byte, cycle));
    }

    let hash = sink.borrow().hash;
    format!("{hash:016x}")
}

fn main() {
    println!("{}", fingerprint());
}
