// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware volume discovery at the platform's fixed locations.

use crate::config::PeiConfig;
use crate::error::PeiError;
use crate::hw::FlashAccess;
use crate::platform_info::FirmwareVolume;
use crate::platform_info::Phase;
use crate::platform_info::PlatformInfo;
use crate::range::MemoryRange;
use platform_pei_defs::fv::FirmwareVolumeHeader;
use platform_pei_defs::fv::FV_MAX_HEADER_LENGTH;
use platform_pei_defs::fv::FV_REVISION;
use platform_pei_defs::fv::FV_SIGNATURE;
use platform_pei_defs::handoff::BootMode;
use platform_pei_defs::handoff::DiagnosticCode;
use platform_pei_defs::handoff::FvRole;
use platform_pei_defs::handoff::RegionKind;
use thiserror::Error;
use zerocopy::FromBytes;

#[derive(Debug, Error, PartialEq, Eq)]
enum InvalidVolume {
    #[error("header could not be read")]
    Unreadable,
    #[error("bad signature {0:#x}")]
    Signature(u32),
    #[error("unsupported revision {0}")]
    Revision(u8),
    #[error("bad header length {0:#x}")]
    HeaderLength(u16),
    #[error("header checksum mismatch")]
    Checksum,
    #[error("volume length {0:#x} does not fit")]
    Length(u64),
    #[error("volume is not inside published memory")]
    OutsideMemory,
}

fn validate(
    info: &PlatformInfo,
    flash: &mut dyn FlashAccess,
    range: MemoryRange,
) -> Result<(), InvalidVolume> {
    let mut buf = [0u8; FV_MAX_HEADER_LENGTH];
    let fixed = size_of::<FirmwareVolumeHeader>();
    if !flash.read(range.start(), &mut buf[..fixed]) {
        return Err(InvalidVolume::Unreadable);
    }
    let (header, _) =
        FirmwareVolumeHeader::read_from_prefix(&buf).map_err(|_| InvalidVolume::Unreadable)?;

    if header.signature != FV_SIGNATURE {
        return Err(InvalidVolume::Signature(header.signature));
    }
    if header.revision != FV_REVISION {
        return Err(InvalidVolume::Revision(header.revision));
    }
    let header_length = usize::from(header.header_length);
    if header_length % 2 != 0 || !(fixed..=FV_MAX_HEADER_LENGTH).contains(&header_length) {
        return Err(InvalidVolume::HeaderLength(header.header_length));
    }
    if !flash.read(range.start(), &mut buf[..header_length]) {
        return Err(InvalidVolume::Unreadable);
    }
    let checksum = buf[..header_length]
        .chunks_exact(2)
        .fold(0u16, |sum, word| {
            sum.wrapping_add(u16::from_le_bytes([word[0], word[1]]))
        });
    if checksum != 0 {
        return Err(InvalidVolume::Checksum);
    }
    if header.fv_length == 0 || header.fv_length > range.len() {
        return Err(InvalidVolume::Length(header.fv_length));
    }

    let inside = info.regions().iter().any(|region| {
        matches!(region.kind, RegionKind::SystemMemory | RegionKind::Mmio)
            && region.range.contains(&range)
    });
    if !inside {
        return Err(InvalidVolume::OutsideMemory);
    }
    Ok(())
}

/// Validates and publishes the firmware volumes.
///
/// Requires [`Phase::MemoryPublished`]. The DXE volume is skipped on an S3
/// resume, and on a recovery boot, where the PEI volume is the only boot
/// target.
pub fn publish_firmware_volumes(
    info: &mut PlatformInfo,
    flash: &mut dyn FlashAccess,
    config: &PeiConfig,
) -> Result<(), PeiError> {
    info.expect_phase(Phase::MemoryPublished)?;

    let dxe = info.boot_mode() == BootMode::Full;
    let candidates = [
        Some((config.pei_fv, FvRole::Pei)),
        dxe.then_some((config.dxe_fv, FvRole::Dxe)),
    ];

    for (range, role) in candidates.into_iter().flatten() {
        match validate(info, flash, range) {
            Ok(()) => {
                tracing::info!(%range, ?role, "firmware volume");
                info.volumes
                    .try_push(FirmwareVolume { range, role })
                    .map_err(|_| PeiError::TooManyRegions)?;
            }
            Err(err) => {
                tracing::warn!(%range, ?role, error = %err, "invalid firmware volume");
                info.diagnose(DiagnosticCode::InvalidFirmwareVolume, range.start());
            }
        }
    }

    if info.volumes.is_empty() {
        return Err(PeiError::NoFirmwareVolume);
    }

    info.set_phase(Phase::FirmwareVolumesPublished);
    Ok(())
}
