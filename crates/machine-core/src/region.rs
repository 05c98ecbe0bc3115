//! Region manager: machine bring-up from a provisioning bundle.
//!
//! Bring-up turns a bundle (RAM size, ROM images, device list, overrides)
//! into named physical pools and a fully populated page table. Overlaps
//! resolve deterministically: regions claim pages in (priority, insertion)
//! order, a relocatable loser moves to the next free window, and a
//! non-relocatable loser yields the contested pages. Anything that would
//! leave a mandatory region unplaced refuses to produce a machine at all.

use std::collections::BTreeMap;

use crate::bus::page::{page_index_of, PageCapabilities, PageEntry, PageTable, RegionTag, PAGE_SIZE};
use crate::bus::target::{RamTarget, RomTarget, TargetRef};
use crate::error::BringUpError;
use crate::physical::{PhysicalMemory, PoolRef};

/// Guest-path access rights for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegionPermissions {
    /// Reads return pool bytes.
    pub readable: bool,
    /// Guest writes land in the pool; read-only regions discard them.
    pub writable: bool,
}

impl RegionPermissions {
    /// Ordinary RAM rights.
    pub const READ_WRITE: Self = Self {
        readable: true,
        writable: true,
    };

    /// ROM rights: writes fall off the bus.
    pub const READ_ONLY: Self = Self {
        readable: true,
        writable: false,
    };
}

/// A named memory region requested by bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryRegion {
    /// Region and pool name; unique within a bundle.
    pub name: String,
    /// Page-aligned base the region wants.
    pub preferred_base: u32,
    /// Page-aligned size in bytes.
    pub size: u32,
    /// Routing classification stamped into page rows.
    pub tag: RegionTag,
    /// Placement priority; lower claims pages first.
    pub priority: u8,
    /// Whether the region may move when its preferred window is taken.
    pub relocatable: bool,
    /// Guest access rights.
    pub permissions: RegionPermissions,
}

/// Initial contents of a region's pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionContents {
    /// Zero-filled read/write storage.
    Zeroed,
    /// An image, typically firmware; padded with zeros to the region size.
    Image(Vec<u8>),
}

/// A ROM image carried by the provisioning bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomImage {
    /// Region/pool name for the image.
    pub name: String,
    /// Page-aligned base the image wants.
    pub base: u32,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

/// External-loader description of a device to wire at bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceConfig {
    /// Device kind name understood by the wiring code.
    pub name: String,
    /// Expansion slot the device occupies, when it is a card.
    pub slot: Option<u8>,
}

/// The only configuration shape the core accepts; produced by an external
/// loader.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProvisioningBundle {
    /// Total routed address space in bytes.
    pub address_space_bytes: usize,
    /// Main RAM size in bytes.
    pub ram_bytes: u32,
    /// Firmware images; the first is the boot ROM and is mandatory.
    pub rom_images: Vec<RomImage>,
    /// Devices to wire after memory assembly.
    pub devices: Vec<DeviceConfig>,
    /// Region-name to base-address overrides.
    pub address_overrides: BTreeMap<String, u32>,
    /// Enables the privileged debug surface (token issuance).
    pub debug_features: bool,
}

impl ProvisioningBundle {
    /// A bundle for a 64 KiB machine with `ram_bytes` of RAM and no devices.
    #[must_use]
    pub fn with_ram(ram_bytes: u32) -> Self {
        Self {
            address_space_bytes: 0x10000,
            ram_bytes,
            rom_images: Vec::new(),
            devices: Vec::new(),
            address_overrides: BTreeMap::new(),
            debug_features: false,
        }
    }
}

/// Name of the pool holding main RAM.
pub const MAIN_RAM_POOL: &str = "main-ram";

/// Placement priority assigned to ROM regions from the bundle.
pub const ROM_PRIORITY: u8 = 0;

/// Placement priority assigned to main RAM; RAM yields pages to firmware.
pub const RAM_PRIORITY: u8 = 1;

/// Where one region actually landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedRegion {
    /// The request this placement satisfied.
    pub region: MemoryRegion,
    /// Base address granted (differs from preferred only for relocated
    /// regions).
    pub base: u32,
    /// Page indices the region actually claimed; shadowed pages are absent.
    pub pages: Vec<usize>,
}

/// Output of bring-up assembly.
#[derive(Debug)]
pub struct AssembledMemory {
    /// Fully populated page table.
    pub page_table: PageTable,
    /// Physical pools keyed by region name.
    pub pools: BTreeMap<String, PoolRef>,
    /// Final placements in assembly order.
    pub placements: Vec<PlacedRegion>,
}

/// Assembles named regions into the initial page table.
#[derive(Debug, Default)]
pub struct RegionManager {
    regions: Vec<(MemoryRegion, RegionContents)>,
}

impl RegionManager {
    /// An empty manager; add regions, then assemble.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a region with its initial contents.
    pub fn add_region(&mut self, region: MemoryRegion, contents: RegionContents) {
        self.regions.push((region, contents));
    }

    /// Builds the standard region set from a bundle: main RAM at the bottom
    /// of the space (priority [`RAM_PRIORITY`]) plus one read-only region
    /// per ROM image (priority [`ROM_PRIORITY`]), with address overrides
    /// applied by region name.
    ///
    /// # Errors
    ///
    /// Returns [`BringUpError::MissingRam`] or
    /// [`BringUpError::MissingBootRom`] when a mandatory region is absent
    /// from the bundle.
    pub fn from_bundle(bundle: &ProvisioningBundle) -> Result<Self, BringUpError> {
        if bundle.ram_bytes == 0 {
            return Err(BringUpError::MissingRam);
        }
        if bundle.rom_images.is_empty() {
            return Err(BringUpError::MissingBootRom);
        }

        let mut manager = Self::new();
        let override_for = |name: &str, preferred: u32| {
            bundle
                .address_overrides
                .get(name)
                .copied()
                .unwrap_or(preferred)
        };

        for image in &bundle.rom_images {
            manager.add_region(
                MemoryRegion {
                    name: image.name.clone(),
                    preferred_base: override_for(&image.name, image.base),
                    size: page_aligned_len(image.bytes.len()),
                    tag: RegionTag::Rom,
                    priority: ROM_PRIORITY,
                    relocatable: false,
                    permissions: RegionPermissions::READ_ONLY,
                },
                RegionContents::Image(image.bytes.clone()),
            );
        }

        manager.add_region(
            MemoryRegion {
                name: MAIN_RAM_POOL.to_owned(),
                preferred_base: override_for(MAIN_RAM_POOL, 0),
                size: bundle.ram_bytes,
                tag: RegionTag::Ram,
                priority: RAM_PRIORITY,
                relocatable: false,
                permissions: RegionPermissions::READ_WRITE,
            },
            RegionContents::Zeroed,
        );

        Ok(manager)
    }

    /// Resolves placements and materializes pools plus the page table.
    ///
    /// # Errors
    ///
    /// Any [`BringUpError`]: misaligned or out-of-range regions, duplicate
    /// names, oversized images, unplaceable relocatable regions, or a
    /// non-relocatable region losing every page.
    pub fn assemble(self, address_space_bytes: usize) -> Result<AssembledMemory, BringUpError> {
        let mut page_table = PageTable::new(address_space_bytes)?;
        let total_pages = page_table.page_count();
        let mut claimed = vec![false; total_pages];
        let mut pools: BTreeMap<String, PoolRef> = BTreeMap::new();
        let mut placements = Vec::new();

        let mut ordered = self.regions;
        // Stable sort: equal priorities keep insertion order.
        ordered.sort_by_key(|(region, _)| region.priority);

        for (region, contents) in ordered {
            validate_region(&region, address_space_bytes)?;
            if pools.contains_key(&region.name) {
                return Err(BringUpError::DuplicateRegionName {
                    name: region.name.clone(),
                });
            }

            let want_pages = (region.size as usize) / PAGE_SIZE;
            let preferred_page = page_index_of(region.preferred_base);
            let window_free = |start: usize| {
                (start..start + want_pages).all(|page| !claimed[page])
            };

            let base_page = if window_free(preferred_page) {
                preferred_page
            } else if region.relocatable {
                (0..=total_pages - want_pages)
                    .find(|&start| window_free(start))
                    .ok_or_else(|| BringUpError::PlacementConflict {
                        name: region.name.clone(),
                        size: region.size,
                    })?
            } else {
                preferred_page
            };

            let granted: Vec<usize> = (base_page..base_page + want_pages)
                .filter(|&page| !claimed[page])
                .collect();
            if granted.is_empty() {
                return Err(BringUpError::RegionShadowed {
                    name: region.name.clone(),
                });
            }

            let pool = build_pool(&region, contents)?;
            let target = build_target(&region, &pool);
            let base = (base_page * PAGE_SIZE) as u32;

            for &page in &granted {
                claimed[page] = true;
                page_table.install(
                    page,
                    PageEntry {
                        device: None,
                        tag: region.tag,
                        physical_base: ((page - base_page) * PAGE_SIZE) as u32,
                        caps: PageCapabilities::memory(),
                        target: Some(target.clone()),
                    },
                );
            }

            pools.insert(region.name.clone(), pool);
            placements.push(PlacedRegion {
                region,
                base,
                pages: granted,
            });
        }

        Ok(AssembledMemory {
            page_table,
            pools,
            placements,
        })
    }
}

/// Rounds a byte length up to a whole number of pages.
#[must_use]
pub const fn page_aligned_len(len: usize) -> u32 {
    (len.div_ceil(PAGE_SIZE) * PAGE_SIZE) as u32
}

fn validate_region(region: &MemoryRegion, address_space_bytes: usize) -> Result<(), BringUpError> {
    let page = PAGE_SIZE as u32;
    if region.size == 0 || region.size % page != 0 || region.preferred_base % page != 0 {
        return Err(BringUpError::MisalignedRegion {
            name: region.name.clone(),
            base: region.preferred_base,
            size: region.size,
        });
    }
    let end = u64::from(region.preferred_base) + u64::from(region.size);
    if end > address_space_bytes as u64 {
        return Err(BringUpError::RegionOutOfRange {
            name: region.name.clone(),
            base: region.preferred_base,
            size: region.size,
        });
    }
    Ok(())
}

fn build_pool(region: &MemoryRegion, contents: RegionContents) -> Result<PoolRef, BringUpError> {
    let pool = match contents {
        RegionContents::Zeroed => PhysicalMemory::new_ram(&region.name, region.size as usize),
        RegionContents::Image(mut bytes) => {
            if bytes.len() > region.size as usize {
                return Err(BringUpError::ImageLargerThanRegion {
                    name: region.name.clone(),
                    image_len: bytes.len(),
                    size: region.size,
                });
            }
            bytes.resize(region.size as usize, 0);
            PhysicalMemory::from_image(&region.name, bytes, !region.permissions.writable)
        }
    };
    Ok(pool.into_shared())
}

fn build_target(region: &MemoryRegion, pool: &PoolRef) -> TargetRef {
    if region.permissions.writable {
        RamTarget::new(pool.clone()).into_shared()
    } else {
        RomTarget::new(pool.clone()).into_shared()
    }
}
