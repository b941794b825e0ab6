// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fatal errors.

use crate::platform_info::Phase;
use crate::range::MemoryRange;
use platform_pei_defs::handoff::ConfidentialKind;
use thiserror::Error;

/// A condition that stops the boot attempt.
///
/// Recoverable conditions never surface here; they are replaced by defaults
/// and recorded as diagnostics on the platform info record.
#[derive(Debug, Error, PartialEq, Eq)]
#[expect(missing_docs)] // error enum with self-describing variants
pub enum PeiError {
    #[error("host bridge device id {0:#06x} is not supported")]
    UnknownHostBridge(u16),
    #[error("the configuration channel did not report the memory size")]
    MissingMemorySize,
    #[error("{low:#x} bytes of memory below 4GiB, at least {min:#x} required")]
    InsufficientMemory { low: u64, min: u64 },
    #[error("reserved region size of {0} MiB is not supported")]
    IllegalReservedRegionSize(u64),
    #[error("reserved region of {size:#x} bytes does not fit in {low:#x} bytes of memory")]
    ReservedRegionDoesNotFit { size: u64, low: u64 },
    #[error("unknown encrypted mode status {0:#x}")]
    UnknownEncryptedModeStatus(u64),
    #[error("hypervisor asserted {asserted:?} but the processor reports {detected:?}")]
    ConfidentialMismatch {
        asserted: ConfidentialKind,
        detected: ConfidentialKind,
    },
    #[error("encryption bit {0} is outside the supported range")]
    InvalidEncryptionBit(u8),
    #[error("the confidential mode is already set")]
    ConfidentialModeAlreadySet,
    #[error("shared range {0} is not usable memory below 4GiB")]
    SharedRangeOutsideMemory(MemoryRange),
    #[error("range {0} collides with the MMIO window")]
    CollidesWithMmio(MemoryRange),
    #[error("overlapping memory ranges")]
    OverlappingRegions,
    #[error("too many memory regions")]
    TooManyRegions,
    #[error("published {published:#x} bytes of system memory, only {discovered:#x} discovered")]
    SystemMemoryExceedsDiscovered { published: u64, discovered: u64 },
    #[error("no room for permanent PEI memory above {floor:#x}")]
    PeiMemoryDoesNotFit { floor: u64 },
    #[error("no valid firmware volume")]
    NoFirmwareVolume,
    #[error("step requires phase {expected:?}, record is at {found:?}")]
    OutOfOrder { expected: Phase, found: Phase },
    #[error("memory sizing is frozen once regions are published")]
    SizingFrozen,
    #[error("hand-off buffer too small, at least {0:#x} bytes needed")]
    HandoffBufferTooSmall(usize),
}
