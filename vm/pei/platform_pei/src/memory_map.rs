// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Publication of the memory region list.

use crate::config::PeiConfig;
use crate::error::PeiError;
use crate::platform_info::MemoryRegion;
use crate::platform_info::Phase;
use crate::platform_info::MAX_REGIONS;
use crate::platform_info::PlatformInfo;
use crate::range::align_down;
use crate::range::is_sorted_disjoint;
use crate::range::pow2_floor;
use crate::range::split_around;
use crate::range::MemoryRange;
use crate::range::FOUR_GIB;
use crate::range::MIB;
use crate::range::PAGE_SIZE;
use arrayvec::ArrayVec;
use platform_pei_defs::handoff::DiagnosticCode;
use platform_pei_defs::handoff::Encryption;
use platform_pei_defs::handoff::RegionKind;

/// Returns the MMIO window below 4GiB for `low` bytes of RAM.
///
/// The window is the largest power of two that fits between the top of RAM
/// and 4GiB. If that is smaller than `min_size`, the window is grown to
/// `min_size` and RAM gives way: the second value is the reduced RAM size.
pub fn mmio_window(low: u64, min_size: u64) -> (MemoryRange, u64) {
    let size = pow2_floor(FOUR_GIB.saturating_sub(low)).max(min_size);
    let base = FOUR_GIB - size;
    (MemoryRange::new(base..FOUR_GIB), low.min(base))
}

/// Bytes of permanent PEI memory: `budget` plus the boot page tables, which
/// map `address_width` bits with 1GiB pages.
pub fn pei_memory_size(address_width: u8, budget: u64) -> u64 {
    let pml4_entries = 1u64 << u32::from(address_width).saturating_sub(39);
    // A PDPT page per PML4 entry, and the PML4.
    (pml4_entries + 1) * PAGE_SIZE + budget
}

/// Places the permanent PEI memory at the top of the highest private system
/// memory region below 4GiB, no lower than `floor`. The range shrinks to fit
/// the region.
fn place_pei_memory(
    regions: &[MemoryRegion],
    size: u64,
    floor: u64,
) -> Result<MemoryRange, PeiError> {
    regions
        .iter()
        .rev()
        .find(|r| {
            r.kind == RegionKind::SystemMemory
                && r.encryption != Encryption::Shared
                && r.range.end() <= FOUR_GIB
        })
        .and_then(|region| {
            let end = region.range.end();
            let base = align_down(end.saturating_sub(size), MIB)
                .max(region.range.start())
                .max(floor);
            MemoryRange::try_new(base..end).filter(|range| !range.is_empty())
        })
        .ok_or(PeiError::PeiMemoryDoesNotFit { floor })
}

/// A range carved out of system memory.
#[derive(Copy, Clone)]
struct Carve {
    kind: RegionKind,
    shared: bool,
}

/// Converts the final sizing into the published region list and places the
/// permanent PEI memory.
///
/// Requires [`Phase::ConfidentialResolved`]. Leaves sizing frozen. The PEI
/// memory sits above the DXE firmware volume, and a resume with trusted
/// geometry places it at the same range as the boot that suspended.
pub fn publish_memory(info: &mut PlatformInfo, config: &PeiConfig) -> Result<(), PeiError> {
    info.expect_phase(Phase::ConfidentialResolved)?;

    let sizing = *info.sizing();
    let (mmio, low) = mmio_window(sizing.low_memory, config.min_mmio_size);
    if low < sizing.low_memory {
        info.diagnose(
            DiagnosticCode::LowMemoryTrimmedForMmio,
            sizing.low_memory - low,
        );
    }

    // Carved ranges, sorted by address.
    let mut holes = ArrayVec::<(MemoryRange, Carve), 8>::new();
    let reserved = Carve {
        kind: RegionKind::Reserved,
        shared: false,
    };
    let shared = Carve {
        kind: RegionKind::SystemMemory,
        shared: true,
    };
    for range in sizing.reserved.iter().chain(&sizing.smbase) {
        holes.push((*range, reserved));
    }
    for range in info.shared_ranges() {
        holes
            .try_push((*range, shared))
            .map_err(|_| PeiError::TooManyRegions)?;
    }
    holes.sort_unstable_by_key(|(range, _)| *range);
    if !is_sorted_disjoint(&holes, |(range, _)| range) {
        return Err(PeiError::OverlappingRegions);
    }
    if let Some((range, _)) = holes.iter().find(|(range, _)| range.end() > low) {
        return Err(PeiError::CollidesWithMmio(*range));
    }

    let ranges: ArrayVec<MemoryRange, 8> = holes.iter().map(|(range, _)| *range).collect();
    let mut regions = ArrayVec::<MemoryRegion, MAX_REGIONS>::new();
    let mut push = |range: MemoryRange, kind: RegionKind, shared: bool| {
        regions
            .try_push(MemoryRegion {
                range,
                kind,
                encryption: info.encryption(shared),
            })
            .map_err(|_| PeiError::TooManyRegions)
    };

    for (range, hole) in split_around(MemoryRange::new(0..low), &ranges) {
        let carve = hole.map_or(
            Carve {
                kind: RegionKind::SystemMemory,
                shared: false,
            },
            |i| holes[i].1,
        );
        push(range, carve.kind, carve.shared)?;
    }
    push(mmio, RegionKind::Mmio, true)?;
    if sizing.high_memory != 0 {
        push(
            MemoryRange::new(FOUR_GIB..FOUR_GIB + sizing.high_memory),
            RegionKind::SystemMemory,
            false,
        )?;
    }

    if !is_sorted_disjoint(&regions, |r| &r.range) {
        return Err(PeiError::OverlappingRegions);
    }
    let pei_memory = place_pei_memory(
        &regions,
        pei_memory_size(sizing.address_width, config.pei_memory_size),
        config.dxe_fv.end(),
    )?;

    info.regions = regions;
    let published = info.system_memory_bytes();
    if published > sizing.total_memory {
        info.regions.clear();
        return Err(PeiError::SystemMemoryExceedsDiscovered {
            published,
            discovered: sizing.total_memory,
        });
    }

    tracing::info!(
        regions = info.regions.len(),
        %mmio,
        %pei_memory,
        system_memory = format_args!("{published:#x}"),
        "published memory map"
    );
    for region in &info.regions {
        tracing::debug!(range = %region.range, kind = ?region.kind, encryption = ?region.encryption, "region");
    }

    info.sizing_mut()?.low_memory = low;
    info.mmio = Some(mmio);
    info.pei_memory = Some(pei_memory);
    info.memory_type_info = config.memory_type_info;
    info.set_phase(Phase::MemoryPublished);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::advance_to;
    use crate::test_helpers::TestPlatform;
    use crate::test_helpers::GIB;
    use crate::test_helpers::MIB;
    use platform_pei_defs::config::ConfigItem;
    use platform_pei_defs::handoff::ConfidentialKind;

    fn publish(tp: &mut TestPlatform, config: &PeiConfig) -> Result<PlatformInfo, PeiError> {
        advance_to(tp, config, Phase::MemoryPublished)
    }

    fn region(range: core::ops::Range<u64>, kind: RegionKind) -> MemoryRegion {
        MemoryRegion {
            range: MemoryRange::new(range),
            kind,
            encryption: Encryption::NotApplicable,
        }
    }

    #[test]
    fn window_sizing() {
        struct TestCase {
            low: u64,
            min: u64,
            window: core::ops::Range<u64>,
            low_after: u64,
        }

        let cases = [
            TestCase {
                low: 2 * GIB,
                min: 256 * MIB,
                window: 2 * GIB..FOUR_GIB,
                low_after: 2 * GIB,
            },
            TestCase {
                low: 0xb000_0000,
                min: 256 * MIB,
                window: 3 * GIB..FOUR_GIB,
                low_after: 0xb000_0000,
            },
            TestCase {
                low: 0xe000_0000,
                min: 256 * MIB,
                window: 0xe000_0000..FOUR_GIB,
                low_after: 0xe000_0000,
            },
            // The minimum window wins over RAM below 4GiB.
            TestCase {
                low: 0xf800_0000,
                min: 256 * MIB,
                window: 0xf000_0000..FOUR_GIB,
                low_after: 0xf000_0000,
            },
            TestCase {
                low: 3 * GIB,
                min: 2 * GIB,
                window: 2 * GIB..FOUR_GIB,
                low_after: 2 * GIB,
            },
        ];

        for case in cases {
            let (window, low) = mmio_window(case.low, case.min);
            assert_eq!(window, MemoryRange::new(case.window), "{:#x}", case.low);
            assert_eq!(low, case.low_after, "{:#x}", case.low);
        }
    }

    #[test]
    fn reserved_region_split_out_of_low_memory() {
        // 2048MiB of RAM with a 16MiB reserved region at a fixed base.
        let mut tp = TestPlatform::q35(2 * GIB)
            .with(ConfigItem::ReservedRegionMbytes, 16)
            .with(ConfigItem::ReservedRegionBase, 0x7000_0000);
        let info = publish(&mut tp, &PeiConfig::default()).unwrap();

        assert_eq!(
            info.regions(),
            &[
                region(0..0x7000_0000, RegionKind::SystemMemory),
                region(0x7000_0000..0x7100_0000, RegionKind::Reserved),
                region(0x7100_0000..2 * GIB, RegionKind::SystemMemory),
                region(2 * GIB..FOUR_GIB, RegionKind::Mmio),
            ]
        );
        assert_eq!(info.system_memory_bytes(), 2048 * MIB - 16 * MIB);
        assert_eq!(info.mmio_window(), Some(MemoryRange::new(2 * GIB..FOUR_GIB)));
        assert_eq!(info.phase(), Phase::MemoryPublished);
    }

    #[test]
    fn smbase_and_high_memory() {
        let mut tp = TestPlatform::q35(0xb000_0000).with(ConfigItem::HighMemorySize, 2 * GIB);
        tp.host_bridge.smbase_in_ram = true;
        let info = publish(&mut tp, &PeiConfig::default()).unwrap();

        assert_eq!(
            info.regions(),
            &[
                region(0..0x3_0000, RegionKind::SystemMemory),
                region(0x3_0000..0x5_0000, RegionKind::Reserved),
                region(0x5_0000..0xaf80_0000, RegionKind::SystemMemory),
                region(0xaf80_0000..0xb000_0000, RegionKind::Reserved),
                region(0xc000_0000..FOUR_GIB, RegionKind::Mmio),
                region(FOUR_GIB..FOUR_GIB + 2 * GIB, RegionKind::SystemMemory),
            ]
        );
        let total = info.sizing().total_memory;
        assert_eq!(total, 0xb000_0000 + 2 * GIB);
        assert_eq!(info.system_memory_bytes(), total - 8 * MIB - 0x2_0000);
    }

    #[test]
    fn regions_disjoint_and_bounded() {
        for (low, high, mbytes) in [
            (32 * MIB, 0, 1),
            (512 * MIB, 0, 2),
            (GIB, 3 * GIB, 8),
            (3 * GIB, 0, 32),
            (4 * GIB, 64 * GIB, 64),
        ] {
            let mut tp = TestPlatform::q35(low)
                .with(ConfigItem::HighMemorySize, high)
                .with(ConfigItem::ReservedRegionMbytes, mbytes);
            let info = publish(&mut tp, &PeiConfig::default()).unwrap();
            assert!(is_sorted_disjoint(info.regions(), |r| &r.range));
            assert!(info.system_memory_bytes() <= info.sizing().total_memory);
            assert_eq!(
                info.system_memory_bytes(),
                info.sizing().total_memory - u64::from(mbytes) * MIB
            );
        }
    }

    #[test]
    fn trimmed_low_memory_keeps_default_reserved_region() {
        let config = PeiConfig {
            min_mmio_size: 1536 * MIB,
            ..PeiConfig::default()
        };
        let mut tp = TestPlatform::q35(0xb000_0000);
        let info = tp.run(&config).unwrap();

        assert_eq!(info.sizing().low_memory, 0xa000_0000);
        assert_eq!(
            info.mmio_window(),
            Some(MemoryRange::new(0xa000_0000..FOUR_GIB))
        );
        assert_eq!(
            info.sizing().reserved,
            Some(MemoryRange::new(0x9f80_0000..0xa000_0000))
        );
        assert_eq!(
            &info.regions()[1..],
            &[
                region(0x9f80_0000..0xa000_0000, RegionKind::Reserved),
                region(0xa000_0000..FOUR_GIB, RegionKind::Mmio),
            ]
        );
        assert_eq!(
            info.diagnostics(),
            &[crate::platform_info::Diagnostic {
                code: DiagnosticCode::LowMemoryTrimmedForMmio,
                value: 256 * MIB,
            }]
        );
    }

    #[test]
    fn shared_range_in_trimmed_memory_is_fatal() {
        let config = PeiConfig {
            min_mmio_size: 2 * GIB,
            ..PeiConfig::default()
        };
        let dma = MemoryRange::new(0x9000_0000..0x9010_0000);
        let mut tp = TestPlatform::q35(0xa000_0000).with_dma(dma);
        tp.cpu = tp.cpu.with_sev(ConfidentialKind::Sev, 47);
        assert_eq!(
            publish(&mut tp, &config).unwrap_err(),
            PeiError::CollidesWithMmio(dma)
        );
    }

    #[test]
    fn trimmed_low_memory_is_diagnosed() {
        let config = PeiConfig {
            min_mmio_size: 2 * GIB,
            ..PeiConfig::default()
        };
        let mut tp = TestPlatform::q35(0xa000_0000)
            .with(ConfigItem::ReservedRegionMbytes, 8)
            .with(ConfigItem::ReservedRegionBase, 0x4000_0000);
        let info = publish(&mut tp, &config).unwrap();
        assert_eq!(info.sizing().low_memory, 2 * GIB);
        assert_eq!(
            info.diagnostics().last().unwrap().code,
            DiagnosticCode::LowMemoryTrimmedForMmio
        );
        assert_eq!(info.diagnostics().last().unwrap().value, 512 * MIB);
        assert_eq!(
            info.regions().last().unwrap().range,
            MemoryRange::new(2 * GIB..FOUR_GIB)
        );
    }

    #[test]
    fn pei_memory_at_top_of_private_memory() {
        struct TestCase {
            low: u64,
            reserved_base: Option<u64>,
            expected: core::ops::Range<u64>,
        }

        let cases = [
            // Directly below the reserved region at the top of low memory.
            TestCase {
                low: 2 * GIB,
                reserved_base: None,
                expected: 2 * GIB - 8 * MIB - 65 * MIB..2 * GIB - 8 * MIB,
            },
            // Above a reserved region placed lower down.
            TestCase {
                low: 2 * GIB,
                reserved_base: Some(0x7000_0000),
                expected: 2 * GIB - 65 * MIB..2 * GIB,
            },
            // Clipped by the end of the DXE volume.
            TestCase {
                low: 64 * MIB,
                reserved_base: None,
                expected: 0x160_0000..56 * MIB,
            },
        ];

        for case in cases {
            let mut tp = TestPlatform::q35(case.low);
            if let Some(base) = case.reserved_base {
                tp = tp.with(ConfigItem::ReservedRegionBase, base);
            }
            let info = publish(&mut tp, &PeiConfig::default()).unwrap();
            let pei_memory = info.pei_memory().unwrap();
            assert_eq!(pei_memory, MemoryRange::new(case.expected), "{:#x}", case.low);
            assert!(info.regions().iter().any(|r| {
                r.kind == RegionKind::SystemMemory && r.range.contains(&pei_memory)
            }));
        }
    }

    #[test]
    fn pei_memory_includes_page_tables() {
        assert_eq!(pei_memory_size(36, 64 * MIB), 64 * MIB + 2 * PAGE_SIZE);
        assert_eq!(pei_memory_size(39, 64 * MIB), 64 * MIB + 2 * PAGE_SIZE);
        assert_eq!(pei_memory_size(48, 64 * MIB), 64 * MIB + 513 * PAGE_SIZE);
    }

    #[test]
    fn no_room_for_pei_memory_is_fatal() {
        let config = PeiConfig {
            min_low_memory: 16 * MIB,
            ..PeiConfig::default()
        };
        let mut tp = TestPlatform::q35(32 * MIB).with(ConfigItem::ReservedRegionMbytes, 16);
        assert_eq!(
            publish(&mut tp, &config).unwrap_err(),
            PeiError::PeiMemoryDoesNotFit { floor: 0x160_0000 }
        );
    }

    #[test]
    fn sizing_frozen_after_publication() {
        let mut tp = TestPlatform::q35(2 * GIB);
        let mut info = publish(&mut tp, &PeiConfig::default()).unwrap();
        assert_eq!(info.sizing_mut().unwrap_err(), PeiError::SizingFrozen);
        assert!(matches!(
            publish_memory(&mut info, &PeiConfig::default()),
            Err(PeiError::OutOfOrder { .. })
        ));
    }
}
