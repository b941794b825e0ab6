// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Build-time platform configuration.

use crate::range::MemoryRange;
use crate::range::MIB;
use platform_pei_defs::handoff::MemoryType;
use platform_pei_defs::handoff::MemoryTypeInformation;
use platform_pei_defs::handoff::MEMORY_TYPE_INFO_COUNT;

/// Platform constants and the defaults used in place of invalid
/// configuration channel values.
///
/// These are fixed when the firmware image is built. Nothing here comes from
/// the hypervisor.
#[derive(Debug, Clone)]
pub struct PeiConfig {
    /// Address width used when the override is out of range.
    pub default_address_width: u8,
    /// The smallest acceptable address width.
    pub min_address_width: u8,
    /// The largest acceptable address width, further limited by the CPU.
    pub max_address_width: u8,
    /// Size and alignment of the 64-bit PCI window placed above RAM when
    /// deriving the address width.
    pub pci64_window_size: u64,
    /// CPU bound used when the channel value is out of range or absent.
    pub default_max_cpus: u32,
    /// The largest supported CPU count.
    pub max_cpus_limit: u32,
    /// Reserved region size, in MiB, when the channel does not select one.
    pub default_reserved_mbytes: u32,
    /// The smallest MMIO window below 4GiB.
    pub min_mmio_size: u64,
    /// The smallest amount of RAM below 4GiB the firmware can run with.
    pub min_low_memory: u64,
    /// Permanent PEI memory, not counting the boot page tables.
    pub pei_memory_size: u64,
    /// Location of the PEI firmware volume.
    pub pei_fv: MemoryRange,
    /// Location of the DXE firmware volume.
    pub dxe_fv: MemoryRange,
    /// Guest-hypervisor communication block area, shared under SEV-ES and
    /// SEV-SNP.
    pub ghcb: MemoryRange,
    /// Pages to preallocate per memory type.
    pub memory_type_info: [MemoryTypeInformation; MEMORY_TYPE_INFO_COUNT],
}

/// Legal reserved region sizes, in MiB.
pub const RESERVED_REGION_MBYTES: [u32; 6] = [1, 2, 8, 16, 32, 64];

impl Default for PeiConfig {
    fn default() -> Self {
        let info = |memory_type: MemoryType, pages| MemoryTypeInformation {
            memory_type: memory_type.as_raw(),
            pages,
        };

        Self {
            default_address_width: 36,
            min_address_width: 36,
            max_address_width: 52,
            pci64_window_size: 32 << 30,
            default_max_cpus: 64,
            max_cpus_limit: 1024,
            default_reserved_mbytes: 8,
            min_mmio_size: 256 * MIB,
            min_low_memory: 32 * MIB,
            pei_memory_size: 64 * MIB,
            pei_fv: MemoryRange::new(0x82_0000..0x90_0000),
            dxe_fv: MemoryRange::new(0x90_0000..0x160_0000),
            ghcb: MemoryRange::new(0x80_8000..0x80_a000),
            memory_type_info: [
                info(MemoryType::AcpiNvs, 0x004),
                info(MemoryType::AcpiReclaim, 0x008),
                info(MemoryType::Reserved, 0x004),
                info(MemoryType::RuntimeServicesData, 0x024),
                info(MemoryType::RuntimeServicesCode, 0x030),
            ],
        }
    }
}
