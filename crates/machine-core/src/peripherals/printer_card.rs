//! Printer expansion card.
//!
//! A slot card with a latched data register, a strobe that starts a print,
//! and a busy status bit. The print itself is host work and takes host
//! time, so it is modeled as a scheduled completion event; nothing on the
//! timeline ever blocks. The card also carries a small firmware image for
//! its slot window and counts expansion-window handovers.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::bus::access::BusAccess;
use crate::bus::target::BusTarget;
use crate::bus::FLOATING_BUS;
use crate::device::{Device, DeviceContext};
use crate::scheduler::{Cycle, EventKind};
use crate::slots::SlotCard;

/// Data latch offset in the device-select window.
pub const REG_DATA: u32 = 0x0;
/// Strobe offset; any write starts printing the latched byte.
pub const REG_STROBE: u32 = 0x1;
/// Status offset; bit 0 is the busy flag.
pub const REG_STATUS: u32 = 0x2;

/// Status bit: a print is in flight.
pub const STATUS_BUSY: u8 = 0x01;

/// Dispatch priority for print completions.
const PRINT_PRIORITY: u8 = 3;

/// Cycles one byte takes to print.
const PRINT_CYCLES: Cycle = 12_000;

/// The printer card. Construct with [`PrinterCard::new`].
pub struct PrinterCard {
    weak: Weak<RefCell<Self>>,
    ctx: Option<DeviceContext>,
    latch: u8,
    busy: bool,
    printed: Vec<u8>,
    firmware: Vec<u8>,
    selections: u32,
    deselections: u32,
}

impl std::fmt::Debug for PrinterCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterCard")
            .field("busy", &self.busy)
            .field("printed", &self.printed.len())
            .finish_non_exhaustive()
    }
}

impl PrinterCard {
    /// Creates the card in power-on state with `firmware` in its slot
    /// window.
    #[must_use]
    pub fn new(firmware: Vec<u8>) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|weak| {
            RefCell::new(Self {
                weak: weak.clone(),
                ctx: None,
                latch: 0,
                busy: false,
                printed: Vec::new(),
                firmware,
                selections: 0,
                deselections: 0,
            })
        })
    }

    /// Bytes whose prints have completed, in completion order.
    #[must_use]
    pub fn printed(&self) -> &[u8] {
        &self.printed
    }

    /// Firmware image for the card's slot window.
    #[must_use]
    pub fn firmware_image(&self) -> &[u8] {
        &self.firmware
    }

    /// Times the card was handed the expansion window.
    #[must_use]
    pub const fn selections(&self) -> u32 {
        self.selections
    }

    /// Times the window was taken away or released.
    #[must_use]
    pub const fn deselections(&self) -> u32 {
        self.deselections
    }

    fn strobe(&mut self) {
        if self.busy {
            // A strobe while printing is lost, like the hardware.
            return;
        }
        let Some(ctx) = &self.ctx else {
            return;
        };
        self.busy = true;
        let weak = self.weak.clone();
        let tag = u32::from(ctx.device_id.0);
        ctx.scheduler.borrow_mut().schedule_after(
            PRINT_CYCLES,
            EventKind::Io,
            PRINT_PRIORITY,
            Some(tag),
            Box::new(move |_, _| {
                if let Some(card) = weak.upgrade() {
                    card.borrow_mut().complete_print();
                }
            }),
        );
    }

    fn complete_print(&mut self) {
        self.printed.push(self.latch);
        self.busy = false;
    }

    fn status_bits(&self) -> u8 {
        if self.busy {
            STATUS_BUSY
        } else {
            0
        }
    }
}

impl Device for PrinterCard {
    fn name(&self) -> &str {
        "printer-card"
    }

    fn initialize(&mut self, ctx: &DeviceContext) {
        self.ctx = Some(ctx.clone());
    }

    fn reset(&mut self) {
        self.latch = 0;
        self.busy = false;
        self.printed.clear();
    }
}

impl SlotCard for PrinterCard {
    fn name(&self) -> &str {
        "printer-card"
    }

    fn on_expansion_selected(&mut self) {
        self.selections += 1;
    }

    fn on_expansion_deselected(&mut self) {
        self.deselections += 1;
    }
}

impl BusTarget for PrinterCard {
    fn read(&mut self, offset: u32, _access: &BusAccess) -> u8 {
        match offset {
            REG_DATA => self.latch,
            REG_STATUS => self.status_bits(),
            _ => FLOATING_BUS,
        }
    }

    fn write(&mut self, offset: u32, value: u8, _access: &BusAccess) {
        match offset {
            REG_DATA => self.latch = value,
            REG_STROBE => self.strobe(),
            _ => {}
        }
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        Some(match offset {
            REG_DATA => self.latch,
            REG_STATUS => self.status_bits(),
            _ => FLOATING_BUS,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{PrinterCard, REG_DATA, REG_STATUS, REG_STROBE, STATUS_BUSY};
    use crate::bus::access::{AccessWidth, BusAccess};
    use crate::bus::target::BusTarget;
    use crate::device::{Device, DeviceContext, DeviceId};
    use crate::scheduler::Scheduler;
    use crate::signal::SignalSet;
    use crate::slots::SlotCard;

    fn context() -> DeviceContext {
        DeviceContext {
            scheduler: Rc::new(RefCell::new(Scheduler::new())),
            signals: Rc::new(RefCell::new(SignalSet::new())),
            device_id: DeviceId(5),
        }
    }

    fn write(card: &Rc<RefCell<PrinterCard>>, offset: u32, value: u8) {
        let access = BusAccess::data_write(0, AccessWidth::Byte, 0);
        card.borrow_mut().write(offset, value, &access);
    }

    fn read(card: &Rc<RefCell<PrinterCard>>, offset: u32) -> u8 {
        let access = BusAccess::data_read(0, AccessWidth::Byte, 0);
        card.borrow_mut().read(offset, &access)
    }

    #[test]
    fn print_completes_on_the_timeline_not_inline() {
        let ctx = context();
        let card = PrinterCard::new(vec![0x60; 0x100]);
        card.borrow_mut().initialize(&ctx);

        write(&card, REG_DATA, b'H');
        write(&card, REG_STROBE, 1);
        assert_eq!(read(&card, REG_STATUS), STATUS_BUSY);
        assert!(card.borrow().printed().is_empty());

        ctx.scheduler.borrow_mut().advance(12_000);
        assert_eq!(read(&card, REG_STATUS), 0);
        assert_eq!(card.borrow().printed(), b"H");
    }

    #[test]
    fn strobe_while_busy_is_lost() {
        let ctx = context();
        let card = PrinterCard::new(Vec::new());
        card.borrow_mut().initialize(&ctx);

        write(&card, REG_DATA, b'A');
        write(&card, REG_STROBE, 1);
        write(&card, REG_DATA, b'B');
        write(&card, REG_STROBE, 1);

        ctx.scheduler.borrow_mut().advance(50_000);
        // Only one completion, and it prints the latch as of completion.
        assert_eq!(card.borrow().printed(), b"B");
    }

    #[test]
    fn handover_callbacks_are_counted() {
        let card = PrinterCard::new(Vec::new());
        card.borrow_mut().on_expansion_selected();
        card.borrow_mut().on_expansion_deselected();
        assert_eq!(card.borrow().selections(), 1);
        assert_eq!(card.borrow().deselections(), 1);
    }

    #[test]
    fn reset_restores_power_on_state_without_rewiring() {
        let ctx = context();
        let card = PrinterCard::new(vec![0xA9; 0x100]);
        card.borrow_mut().initialize(&ctx);

        write(&card, REG_DATA, b'X');
        write(&card, REG_STROBE, 1);
        ctx.scheduler.borrow_mut().advance(12_000);

        card.borrow_mut().reset();
        assert!(card.borrow().printed().is_empty());
        assert_eq!(read(&card, REG_STATUS), 0);
        assert_eq!(card.borrow().firmware_image()[0], 0xA9);
    }
}
