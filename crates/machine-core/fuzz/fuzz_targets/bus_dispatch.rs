#![no_main]

use machine_core::{
    AccessIntent, AccessMode, AccessWidth, BusAccess, Machine, ProvisioningBundle, RomImage,
    SourceId,
};
use libfuzzer_sys::fuzz_target;

fn machine() -> Machine {
    let mut bundle = ProvisioningBundle::with_ram(0x10000);
    bundle.rom_images.push(RomImage {
        name: "boot-rom".to_owned(),
        base: 0xF000,
        bytes: vec![0xEA; 0x1000],
    });
    Machine::bring_up(&bundle).expect("fixed bundle is complete")
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let mut machine = machine();
    let mut cycle = 0u64;

    for chunk in data.chunks_exact(8) {
        // Keep the address inside the routed space; out-of-range addresses
        // are a caller invariant, not a guest input.
        let address = u32::from(u16::from_le_bytes([chunk[0], chunk[1]]));
        let address = address.min(0xFFFC);
        let width = match chunk[2] % 3 {
            0 => AccessWidth::Byte,
            1 => AccessWidth::Word,
            _ => AccessWidth::Dword,
        };
        let mode = if chunk[3] & 1 == 0 {
            AccessMode::Atomic
        } else {
            AccessMode::Decomposed
        };
        let intent = match chunk[4] % 7 {
            0 => AccessIntent::DataRead,
            1 => AccessIntent::DataWrite,
            2 => AccessIntent::InstructionFetch,
            3 => AccessIntent::DebugRead,
            4 => AccessIntent::DebugWrite,
            5 => AccessIntent::DmaRead,
            _ => AccessIntent::DmaWrite,
        };
        let value = u32::from_le_bytes([chunk[5], chunk[6], chunk[7], 0]);

        cycle += 1;
        let access = BusAccess {
            address,
            width,
            mode,
            intent,
            source: SourceId(u16::from(chunk[4])),
            cycle,
            flags: machine_core::AccessFlags {
                no_side_effects: chunk[3] & 2 != 0,
                big_endian: chunk[3] & 4 != 0,
            },
        };
        if intent.is_write() {
            machine.bus_mut().write(&access, value);
        } else {
            let _ = machine.bus_mut().read(&access);
        }
    }
});
