//! Shared signal lines between devices and the CPU.
//!
//! Lines are level-sensitive and shared: a line reads asserted while any
//! source holds it, and releases only when every source has released it.
//! Sources are identified by the device id that asserted the line, so a
//! device releasing its own assertion can never drop another device's.

use std::collections::BTreeSet;

/// The signal lines a device may drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SignalLine {
    /// Maskable interrupt request line.
    Irq,
    /// Non-maskable interrupt line.
    Nmi,
    /// Machine reset line.
    Reset,
}

/// Level-sensitive signal-line state keyed by asserting source.
///
/// Source sets are ordered so observers iterate deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalSet {
    irq: BTreeSet<u16>,
    nmi: BTreeSet<u16>,
    reset: BTreeSet<u16>,
}

impl SignalSet {
    /// Creates a set with every line released.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asserts `line` on behalf of `source`.
    ///
    /// Re-asserting an already-held line is a no-op; lines have no edge
    /// memory.
    pub fn assert_line(&mut self, line: SignalLine, source: u16) {
        self.sources_mut(line).insert(source);
    }

    /// Releases `source`'s assertion of `line`.
    ///
    /// Returns `true` when the source actually held the line.
    pub fn release_line(&mut self, line: SignalLine, source: u16) -> bool {
        self.sources_mut(line).remove(&source)
    }

    /// Returns `true` while any source holds `line`.
    #[must_use]
    pub fn is_asserted(&self, line: SignalLine) -> bool {
        !self.sources(line).is_empty()
    }

    /// Returns the ordered sources currently holding `line`.
    #[must_use]
    pub fn holders(&self, line: SignalLine) -> Vec<u16> {
        self.sources(line).iter().copied().collect()
    }

    /// Releases every assertion on every line.
    pub fn clear(&mut self) {
        self.irq.clear();
        self.nmi.clear();
        self.reset.clear();
    }

    const fn sources(&self, line: SignalLine) -> &BTreeSet<u16> {
        match line {
            SignalLine::Irq => &self.irq,
            SignalLine::Nmi => &self.nmi,
            SignalLine::Reset => &self.reset,
        }
    }

    const fn sources_mut(&mut self, line: SignalLine) -> &mut BTreeSet<u16> {
        match line {
            SignalLine::Irq => &mut self.irq,
            SignalLine::Nmi => &mut self.nmi,
            SignalLine::Reset => &mut self.reset,
        }
    }
}
