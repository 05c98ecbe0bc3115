//! Reference peripherals.
//!
//! These exist to exercise the device, slot, and scheduler contracts from
//! the outside: an interval timer (scheduler-driven IRQ source with a
//! read-to-clear strobe) and a printer card (slot card modeling host I/O as
//! scheduled completion events). Real machines bring their own peripherals;
//! these are the contract's working examples.

/// Scheduler-driven interval timer with an IRQ line and strobe status.
pub mod interval_timer;
/// Expansion-slot printer card with latched data and modeled print latency.
pub mod printer_card;

pub use interval_timer::IntervalTimer;
pub use printer_card::PrinterCard;
