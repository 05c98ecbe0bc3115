//! Mapping stacks: bank-switch overlays at page granularity.
//!
//! A stack holds the candidate mappings for one page-aligned address range;
//! the topmost entry whose active flag is set is the one the page table
//! shows. This models ROM/RAM overlay switching (language cards, bank-
//! selected expansion ROM) without splitting pages below their fixed size.

use crate::bus::page::{PageEntry, PAGE_SIZE};
use crate::error::WiringError;

/// A page-aligned span of the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PageRange {
    /// First page index covered.
    pub first_page: usize,
    /// Number of pages covered.
    pub page_count: usize,
}

impl PageRange {
    /// Base address of the range.
    #[must_use]
    pub const fn base_address(&self) -> u32 {
        (self.first_page * PAGE_SIZE) as u32
    }

    /// Size of the range in bytes.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.page_count * PAGE_SIZE
    }
}

/// One candidate mapping in a stack.
#[derive(Debug, Clone)]
pub struct MappingEntry {
    /// Region identity this candidate maps in.
    pub region_id: String,
    /// Whether the candidate is eligible to be live.
    pub active: bool,
    template: PageEntry,
}

impl MappingEntry {
    /// Creates an inactive candidate. `template` describes the range's
    /// first page; later pages advance `physical_base` page by page.
    #[must_use]
    pub fn new(region_id: &str, template: PageEntry) -> Self {
        Self {
            region_id: region_id.to_owned(),
            active: false,
            template,
        }
    }

    /// Creates an already-active candidate.
    #[must_use]
    pub fn new_active(region_id: &str, template: PageEntry) -> Self {
        Self {
            active: true,
            ..Self::new(region_id, template)
        }
    }

    /// Materializes the page-table row for page `index` of the range.
    #[must_use]
    pub fn to_page_entry(&self, index: usize) -> PageEntry {
        let mut entry = self.template.clone();
        entry.physical_base += (index * PAGE_SIZE) as u32;
        entry
    }
}

/// Ordered candidates for one address range.
///
/// Zero or one entry is live at any time: the topmost (most recently
/// pushed) entry with the active flag set.
#[derive(Debug, Clone)]
pub struct MappingStack {
    range: PageRange,
    entries: Vec<MappingEntry>,
}

impl MappingStack {
    /// Creates an empty stack for `range`; until something is pushed and
    /// activated, the range reads as unmapped.
    #[must_use]
    pub const fn new(range: PageRange) -> Self {
        Self {
            range,
            entries: Vec::new(),
        }
    }

    /// The range this stack overlays.
    #[must_use]
    pub const fn range(&self) -> PageRange {
        self.range
    }

    /// Pushes a candidate onto the top of the stack.
    pub fn push(&mut self, entry: MappingEntry) {
        self.entries.push(entry);
    }

    /// Removes and returns the topmost candidate.
    pub fn pop(&mut self) -> Option<MappingEntry> {
        self.entries.pop()
    }

    /// Sets the active flag of the candidate named `region_id`.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::UnknownOverlayEntry`] when no candidate has
    /// that id; a wiring bug.
    pub fn set_active(&mut self, region_id: &str, active: bool) -> Result<(), WiringError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.region_id == region_id)
            .ok_or_else(|| WiringError::UnknownOverlayEntry(region_id.to_owned()))?;
        entry.active = active;
        Ok(())
    }

    /// Replaces the candidate named `region_id` in place, keeping its stack
    /// position and active flag.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::UnknownOverlayEntry`] when no candidate has
    /// that id.
    pub fn replace(&mut self, region_id: &str, mut entry: MappingEntry) -> Result<(), WiringError> {
        let slot = self
            .entries
            .iter_mut()
            .find(|candidate| candidate.region_id == region_id)
            .ok_or_else(|| WiringError::UnknownOverlayEntry(region_id.to_owned()))?;
        entry.active = slot.active;
        *slot = entry;
        Ok(())
    }

    /// The live candidate: topmost with the active flag set.
    #[must_use]
    pub fn active(&self) -> Option<&MappingEntry> {
        self.entries.iter().rev().find(|entry| entry.active)
    }

    /// Candidates from bottom to top.
    pub fn entries(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.iter()
    }

    /// Page-table row for page `index` of the range: the live candidate's
    /// row, or the unmapped row when nothing is live.
    #[must_use]
    pub fn page_entry_for(&self, index: usize) -> PageEntry {
        self.active()
            .map_or_else(PageEntry::unmapped, |entry| entry.to_page_entry(index))
    }
}

#[cfg(test)]
mod tests {
    use super::{MappingEntry, MappingStack, PageRange};
    use crate::bus::page::{PageCapabilities, PageEntry, RegionTag, PAGE_SIZE};
    use crate::device::DeviceId;
    use crate::error::WiringError;

    fn template(tag: RegionTag, device: u16) -> PageEntry {
        PageEntry {
            device: Some(DeviceId(device)),
            tag,
            physical_base: 0,
            caps: PageCapabilities::memory(),
            target: None,
        }
    }

    fn stack() -> MappingStack {
        MappingStack::new(PageRange {
            first_page: 0xD,
            page_count: 3,
        })
    }

    #[test]
    fn empty_stack_materializes_unmapped_rows() {
        let stack = stack();
        assert!(stack.active().is_none());
        assert!(!stack.page_entry_for(0).is_mapped());
        assert_eq!(stack.page_entry_for(1).tag, RegionTag::Unmapped);
    }

    #[test]
    fn topmost_active_entry_wins() {
        let mut stack = stack();
        stack.push(MappingEntry::new_active("rom", template(RegionTag::Rom, 1)));
        stack.push(MappingEntry::new_active("ram-bank", template(RegionTag::Ram, 2)));

        let live = stack.active().expect("two active candidates");
        assert_eq!(live.region_id, "ram-bank");
    }

    #[test]
    fn deactivating_the_top_reveals_the_one_below() {
        let mut stack = stack();
        stack.push(MappingEntry::new_active("rom", template(RegionTag::Rom, 1)));
        stack.push(MappingEntry::new_active("ram-bank", template(RegionTag::Ram, 2)));

        stack.set_active("ram-bank", false).expect("known entry");
        assert_eq!(stack.active().expect("rom still active").region_id, "rom");

        stack.set_active("rom", false).expect("known entry");
        assert!(stack.active().is_none());
    }

    #[test]
    fn pop_restores_the_previous_candidate() {
        let mut stack = stack();
        stack.push(MappingEntry::new_active("rom", template(RegionTag::Rom, 1)));
        stack.push(MappingEntry::new_active("ram-bank", template(RegionTag::Ram, 2)));

        let popped = stack.pop().expect("non-empty stack");
        assert_eq!(popped.region_id, "ram-bank");
        assert_eq!(stack.active().expect("rom remains").region_id, "rom");
    }

    #[test]
    fn unknown_entry_is_a_wiring_error() {
        let mut stack = stack();
        assert!(matches!(
            stack.set_active("nothing", true),
            Err(WiringError::UnknownOverlayEntry(name)) if name == "nothing"
        ));
    }

    #[test]
    fn replace_keeps_position_and_flag() {
        let mut stack = stack();
        stack.push(MappingEntry::new_active("bank", template(RegionTag::Ram, 1)));
        stack.push(MappingEntry::new("rom", template(RegionTag::Rom, 2)));

        stack
            .replace("bank", MappingEntry::new("bank", template(RegionTag::Ram, 9)))
            .expect("known entry");

        let live = stack.active().expect("replacement inherits active flag");
        assert_eq!(live.region_id, "bank");
        assert_eq!(live.to_page_entry(0).device, Some(DeviceId(9)));
    }

    #[test]
    fn materialized_rows_advance_physical_base_per_page() {
        let mut stack = stack();
        let mut base = template(RegionTag::Ram, 1);
        base.physical_base = 0x2000;
        stack.push(MappingEntry::new_active("bank", base));

        assert_eq!(stack.page_entry_for(0).physical_base, 0x2000);
        assert_eq!(
            stack.page_entry_for(2).physical_base,
            0x2000 + 2 * PAGE_SIZE as u32
        );
    }
}
