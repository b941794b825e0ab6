// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Placement and programming of the chipset-reserved (TSEG) region.

use crate::channel::ConfigChannel;
use crate::config::PeiConfig;
use crate::config::RESERVED_REGION_MBYTES;
use crate::error::PeiError;
use crate::hw::HostBridge;
use crate::memory_map::mmio_window;
use crate::platform_info::Phase;
use crate::platform_info::PlatformInfo;
use crate::range::align_down;
use crate::range::MemoryRange;
use crate::range::MIB;
use platform_pei_defs::chipset::q35;
use platform_pei_defs::chipset::HostBridgeKind;
use platform_pei_defs::chipset::DEFAULT_SMBASE_RANGE;
use platform_pei_defs::config::ConfigItem;
use platform_pei_defs::handoff::BootMode;
use platform_pei_defs::handoff::DiagnosticCode;

/// Places the reserved region, programs it into the memory controller and
/// probes for SMRAM at the default SMBASE.
///
/// Requires [`Phase::TopologyDiscovered`]. On a resume with trusted geometry
/// the size and base come from the geometry and are validated the same way.
/// A recovery boot ignores the base override.
pub fn configure_chipset(
    info: &mut PlatformInfo,
    channel: &mut dyn ConfigChannel,
    host_bridge: &mut dyn HostBridge,
    config: &PeiConfig,
) -> Result<(), PeiError> {
    info.expect_phase(Phase::TopologyDiscovered)?;

    let (reserved, mbytes, smbase) = match info.host_bridge()? {
        HostBridgeKind::I440Fx => {
            // No TSEG on this chipset.
            if let Some(mbytes) = channel.read_scalar(ConfigItem::ReservedRegionMbytes) {
                info.diagnose(DiagnosticCode::ReservedRegionUnsupported, mbytes);
            }
            (None, 0, None)
        }
        HostBridgeKind::Q35 => {
            let (mbytes, base) = match info.resume_geometry() {
                Some(geometry) => (
                    geometry.reserved_mbytes.into(),
                    Some(geometry.reserved_base),
                ),
                None => (
                    channel
                        .read_scalar(ConfigItem::ReservedRegionMbytes)
                        .unwrap_or(config.default_reserved_mbytes.into()),
                    (info.boot_mode() != BootMode::Recovery)
                        .then(|| channel.read_scalar(ConfigItem::ReservedRegionBase))
                        .flatten(),
                ),
            };
            let mbytes = legal_mbytes(mbytes)?;
            // The region has to stay below the MMIO window.
            let (_, low) = mmio_window(info.sizing().low_memory, config.min_mmio_size);
            let reserved = place_reserved_region(info, mbytes, base, low)?;
            program_tseg(host_bridge, reserved, mbytes);
            let smbase = probe_smbase(host_bridge);
            (Some(reserved), mbytes, smbase)
        }
    };

    if let Some(reserved) = reserved {
        tracing::info!(%reserved, mbytes, smbase = smbase.is_some(), "reserved region");
    }

    let sizing = info.sizing_mut()?;
    sizing.reserved = reserved;
    sizing.reserved_mbytes = mbytes;
    sizing.smbase = smbase;
    info.set_phase(Phase::ChipsetConfigured);
    Ok(())
}

fn legal_mbytes(mbytes: u64) -> Result<u32, PeiError> {
    RESERVED_REGION_MBYTES
        .iter()
        .copied()
        .find(|&legal| u64::from(legal) == mbytes)
        .ok_or(PeiError::IllegalReservedRegionSize(mbytes))
}

/// Returns the reserved region range. An override is used when it is MiB
/// aligned and the region fits below `low`; otherwise the region is placed
/// at the top of `low`.
fn place_reserved_region(
    info: &mut PlatformInfo,
    mbytes: u32,
    base: Option<u64>,
    low: u64,
) -> Result<MemoryRange, PeiError> {
    let size = u64::from(mbytes) * MIB;
    if size > low {
        return Err(PeiError::ReservedRegionDoesNotFit { size, low });
    }
    let default_base = align_down(low - size, MIB);

    let base = match base {
        Some(base) if base % MIB == 0 && base.checked_add(size).is_some_and(|end| end <= low) => {
            base
        }
        Some(base) => {
            info.diagnose(DiagnosticCode::InvalidReservedRegionBase, base);
            default_base
        }
        None => default_base,
    };

    MemoryRange::from_base_len(base, size).ok_or(PeiError::ReservedRegionDoesNotFit { size, low })
}

fn program_tseg(host_bridge: &mut dyn HostBridge, reserved: MemoryRange, mbytes: u32) {
    let tseg_sz = match mbytes {
        1 => q35::TSEG_SZ_1MB,
        2 => q35::TSEG_SZ_2MB,
        8 => q35::TSEG_SZ_8MB,
        _ => {
            host_bridge.write16(q35::MCH_EXT_TSEG_MBYTES, mbytes as u16);
            q35::TSEG_SZ_EXTENDED
        }
    };

    // The base fits: the region lies below the chipset ceiling.
    host_bridge.write32(q35::MCH_TSEGMB, reserved.start() as u32);
    let esmramc = q35::Esmramc::new().with_t_en(true).with_tseg_sz(tseg_sz);
    host_bridge.write8(q35::MCH_ESMRAMC, esmramc.into_bits());
}

fn probe_smbase(host_bridge: &mut dyn HostBridge) -> Option<MemoryRange> {
    host_bridge.write8(q35::MCH_DEFAULT_SMBASE_CTL, q35::MCH_DEFAULT_SMBASE_QUERY);
    if host_bridge.read8(q35::MCH_DEFAULT_SMBASE_CTL) != q35::MCH_DEFAULT_SMBASE_IN_RAM {
        return None;
    }
    Some(MemoryRange::new(DEFAULT_SMBASE_RANGE))
}
