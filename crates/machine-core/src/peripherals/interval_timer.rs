//! Interval timer peripheral.
//!
//! A four-register device: control, 16-bit period, and a status register
//! whose fired bit is a read-to-clear strobe. While enabled it schedules its
//! own expiry events instead of being polled, and asserts the IRQ line when
//! interrupts are enabled. Reading status through the snapshot path leaves
//! the strobe (and the line) untouched.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::bus::access::BusAccess;
use crate::bus::target::BusTarget;
use crate::bus::FLOATING_BUS;
use crate::device::{Device, DeviceContext};
use crate::scheduler::{Cycle, EventHandle, EventKind, Scheduler};
use crate::signal::SignalLine;

/// Control register offset.
pub const REG_CONTROL: u32 = 0x0;
/// Period low-byte register offset.
pub const REG_PERIOD_LO: u32 = 0x1;
/// Period high-byte register offset.
pub const REG_PERIOD_HI: u32 = 0x2;
/// Status register offset; reading clears the fired strobe.
pub const REG_STATUS: u32 = 0x3;

/// Control bit: timer running.
pub const CONTROL_ENABLE: u8 = 0x01;
/// Control bit: assert IRQ on expiry.
pub const CONTROL_IRQ_ENABLE: u8 = 0x02;

/// Status bit: expired since status was last read.
pub const STATUS_FIRED: u8 = 0x01;

/// Dispatch priority for timer expiries.
const TIMER_PRIORITY: u8 = 2;

/// Power-on period in cycles.
const DEFAULT_PERIOD: u16 = 0x4000;

/// The timer device. Construct with [`IntervalTimer::new`]; the shared
/// handle doubles as the page target.
pub struct IntervalTimer {
    weak: Weak<RefCell<Self>>,
    ctx: Option<DeviceContext>,
    control: u8,
    period: u16,
    fired: bool,
    expirations: u64,
    pending: Option<EventHandle>,
}

impl std::fmt::Debug for IntervalTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalTimer")
            .field("control", &self.control)
            .field("period", &self.period)
            .field("fired", &self.fired)
            .field("expirations", &self.expirations)
            .finish_non_exhaustive()
    }
}

impl IntervalTimer {
    /// Creates the timer in power-on state.
    #[must_use]
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|weak| {
            RefCell::new(Self {
                weak: weak.clone(),
                ctx: None,
                control: 0,
                period: DEFAULT_PERIOD,
                fired: false,
                expirations: 0,
                pending: None,
            })
        })
    }

    /// Total expirations since power-on; test and tooling surface.
    #[must_use]
    pub const fn expirations(&self) -> u64 {
        self.expirations
    }

    /// Returns `true` while the running bit is set.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.control & CONTROL_ENABLE != 0
    }

    fn status_bits(&self) -> u8 {
        if self.fired {
            STATUS_FIRED
        } else {
            0
        }
    }

    /// Schedules the next expiry on `scheduler`, replacing any pending one.
    fn arm(&mut self, scheduler: &mut Scheduler) {
        if let Some(handle) = self.pending.take() {
            let _ = scheduler.cancel(handle);
        }
        let weak = self.weak.clone();
        let tag = self.ctx.as_ref().map(|ctx| u32::from(ctx.device_id.0));
        self.pending = Some(scheduler.schedule_after(
            Cycle::from(self.period.max(1)),
            EventKind::Timer,
            TIMER_PRIORITY,
            tag,
            Box::new(move |scheduler, _now| {
                if let Some(timer) = weak.upgrade() {
                    timer.borrow_mut().on_expire(scheduler);
                }
            }),
        ));
    }

    /// Expiry callback: latch the strobe, raise the line, rearm.
    fn on_expire(&mut self, scheduler: &mut Scheduler) {
        self.pending = None;
        self.fired = true;
        self.expirations += 1;
        if self.control & CONTROL_IRQ_ENABLE != 0 {
            if let Some(ctx) = &self.ctx {
                ctx.signals
                    .borrow_mut()
                    .assert_line(SignalLine::Irq, ctx.device_id.0);
            }
        }
        if self.is_enabled() {
            self.arm(scheduler);
        }
    }

    fn write_control(&mut self, value: u8) {
        let was_enabled = self.is_enabled();
        self.control = value;
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        if self.is_enabled() && !was_enabled {
            // Arm from outside dispatch: the scheduler is free to borrow.
            self.arm(&mut ctx.scheduler.borrow_mut());
        } else if !self.is_enabled() {
            if let Some(handle) = self.pending.take() {
                let _ = ctx.scheduler.borrow_mut().cancel(handle);
            }
        }
    }

    fn read_status(&mut self) -> u8 {
        let bits = self.status_bits();
        // Read-to-clear strobe: drop the latch and release the line.
        self.fired = false;
        if let Some(ctx) = &self.ctx {
            ctx.signals
                .borrow_mut()
                .release_line(SignalLine::Irq, ctx.device_id.0);
        }
        bits
    }
}

impl Device for IntervalTimer {
    fn name(&self) -> &str {
        "interval-timer"
    }

    fn initialize(&mut self, ctx: &DeviceContext) {
        self.ctx = Some(ctx.clone());
    }

    fn reset(&mut self) {
        // Pending events are the machine's to clear; reset only restores
        // register state.
        self.control = 0;
        self.period = DEFAULT_PERIOD;
        self.fired = false;
        self.expirations = 0;
        self.pending = None;
        if let Some(ctx) = &self.ctx {
            ctx.signals
                .borrow_mut()
                .release_line(SignalLine::Irq, ctx.device_id.0);
        }
    }
}

impl BusTarget for IntervalTimer {
    fn read(&mut self, offset: u32, _access: &BusAccess) -> u8 {
        match offset {
            REG_CONTROL => self.control,
            REG_PERIOD_LO => (self.period & 0xFF) as u8,
            REG_PERIOD_HI => (self.period >> 8) as u8,
            REG_STATUS => self.read_status(),
            _ => FLOATING_BUS,
        }
    }

    fn write(&mut self, offset: u32, value: u8, _access: &BusAccess) {
        match offset {
            REG_CONTROL => self.write_control(value),
            REG_PERIOD_LO => self.period = (self.period & 0xFF00) | u16::from(value),
            REG_PERIOD_HI => self.period = (self.period & 0x00FF) | (u16::from(value) << 8),
            _ => {}
        }
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        Some(match offset {
            REG_CONTROL => self.control,
            REG_PERIOD_LO => (self.period & 0xFF) as u8,
            REG_PERIOD_HI => (self.period >> 8) as u8,
            REG_STATUS => self.status_bits(),
            _ => FLOATING_BUS,
        })
    }
}
