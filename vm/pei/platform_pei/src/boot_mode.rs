// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Boot mode resolution from the persisted boot-state record.

use crate::channel::ConfigChannel;
use crate::error::PeiError;
use crate::platform_info::Phase;
use crate::platform_info::PlatformInfo;
use platform_pei_defs::boot_state::BootStateRaw;
use platform_pei_defs::boot_state::LastState;
use platform_pei_defs::boot_state::BOOT_STATE_SIGNATURE;
use platform_pei_defs::boot_state::BOOT_STATE_VERSION;
use platform_pei_defs::config::ConfigItem;
use platform_pei_defs::handoff::BootMode;
use platform_pei_defs::handoff::DiagnosticCode;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

/// Storage that survives reboots, such as a CMOS bank or a variable store.
pub trait BootStateStore {
    /// Reads the persisted record into `buf`. Returns the stored length, or
    /// `None` if nothing is stored.
    fn read(&mut self, buf: &mut [u8]) -> Option<usize>;
}

/// Memory geometry from the previous boot, trusted on resume.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Physical address width in bits.
    pub address_width: u8,
    /// Bytes of RAM below 4GiB.
    pub low_memory: u64,
    /// Bytes of RAM above 4GiB.
    pub high_memory: u64,
    /// Reserved region base.
    pub reserved_base: u64,
    /// Reserved region size in MiB. Zero when there is none.
    pub reserved_mbytes: u32,
}

impl Geometry {
    fn from_record(raw: &BootStateRaw) -> Option<Self> {
        if crc32fast::hash(raw.protected_bytes()) != raw.crc32 || raw.flags != 0 {
            return None;
        }
        Some(Self {
            address_width: raw.address_width.try_into().ok()?,
            low_memory: raw.low_memory,
            high_memory: raw.high_memory,
            reserved_base: raw.reserved_base,
            reserved_mbytes: raw.reserved_mbytes,
        })
    }
}

/// Determines whether this is a full boot, an S3 resume or a recovery boot.
///
/// Requires [`Phase::Created`]. Only `S3Supported` is read from the channel.
///
/// A recovery boot runs the full pipeline, but the later steps ignore the
/// host's placement overrides (`AddressWidth`, `ReservedRegionBase`) and
/// publish only the PEI firmware volume.
pub fn resolve_boot_mode(
    info: &mut PlatformInfo,
    store: &mut dyn BootStateStore,
    channel: &mut dyn ConfigChannel,
) -> Result<(), PeiError> {
    info.expect_phase(Phase::Created)?;

    let (mode, geometry) = match read_record(info, store) {
        None => (BootMode::Full, None),
        Some(raw) => match LastState::from_raw(raw.last_state) {
            Some(LastState::Off) => (BootMode::Full, None),
            Some(LastState::Suspended) => {
                let s3 = channel
                    .read_scalar(ConfigItem::S3Supported)
                    .is_some_and(|v| v != 0);
                if s3 {
                    let geometry = Geometry::from_record(&raw);
                    if geometry.is_none() {
                        info.diagnose(DiagnosticCode::GeometryIntegrityFailed, raw.crc32.into());
                    }
                    (BootMode::S3Resume, geometry)
                } else {
                    info.diagnose(DiagnosticCode::S3Unsupported, 0);
                    (BootMode::Full, None)
                }
            }
            Some(LastState::RecoveryRequested) => (BootMode::Recovery, None),
            None => {
                info.diagnose(DiagnosticCode::UnrecognizedBootState, raw.last_state.into());
                (BootMode::Full, None)
            }
        },
    };

    tracing::info!(?mode, trusted_geometry = geometry.is_some(), "boot mode");
    info.set_boot_mode(mode, geometry);
    info.set_phase(Phase::BootModeResolved);
    Ok(())
}

fn read_record(info: &mut PlatformInfo, store: &mut dyn BootStateStore) -> Option<BootStateRaw> {
    let mut raw = BootStateRaw::new_zeroed();
    let len = store.read(raw.as_mut_bytes())?;
    if len != size_of::<BootStateRaw>()
        || raw.signature != BOOT_STATE_SIGNATURE
        || raw.version != BOOT_STATE_VERSION
    {
        info.diagnose(DiagnosticCode::MalformedBootState, len as u64);
        return None;
    }
    Some(raw)
}

/// Returns the record a later stage persists before entering S3, so that
/// the resume boot can skip rediscovery.
pub fn capture_boot_state(info: &PlatformInfo) -> BootStateRaw {
    let sizing = info.sizing();
    let mut raw = BootStateRaw {
        signature: BOOT_STATE_SIGNATURE,
        version: BOOT_STATE_VERSION,
        last_state: LastState::Suspended.as_raw(),
        flags: 0,
        address_width: sizing.address_width.into(),
        reserved_mbytes: sizing.reserved_mbytes,
        low_memory: sizing.low_memory,
        high_memory: sizing.high_memory,
        reserved_base: sizing.reserved.map_or(0, |r| r.start()),
        crc32: 0,
        _reserved: 0,
    };
    raw.crc32 = crc32fast::hash(raw.protected_bytes());
    raw
}
