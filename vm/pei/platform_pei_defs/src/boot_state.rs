// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The boot-state record persisted across reboots.
//!
//! The record is written by a later boot stage before the platform enters a
//! sleep state (or when it wants the next boot to run in recovery mode), and
//! read back by the PEI stage on the next boot. The memory geometry it carries
//! is protected by a CRC-32 over every byte preceding [`BootStateRaw::crc32`].

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// `PBST`
pub const BOOT_STATE_SIGNATURE: u32 = u32::from_le_bytes(*b"PBST");
/// Current record version.
pub const BOOT_STATE_VERSION: u16 = 1;

wire_enum! {
    /// How the previous boot ended.
    pub enum LastState: u8 {
        /// Powered off, reset, or nothing to report.
        Off = 0,
        /// Entered S3; the next boot should resume.
        Suspended = 1,
        /// The previous boot asked for the next boot to run in recovery mode.
        RecoveryRequested = 2,
    }
}

/// The persisted record.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct BootStateRaw {
    /// [`BOOT_STATE_SIGNATURE`].
    pub signature: u32,
    /// [`BOOT_STATE_VERSION`].
    pub version: u16,
    /// A [`LastState`] value.
    pub last_state: u8,
    /// Must be zero.
    pub flags: u8,
    /// Physical address width used by the previous boot.
    pub address_width: u32,
    /// Chipset-reserved region size, in MiB.
    pub reserved_mbytes: u32,
    /// Bytes of RAM below 4GiB.
    pub low_memory: u64,
    /// Bytes of RAM above 4GiB.
    pub high_memory: u64,
    /// Chipset-reserved region base.
    pub reserved_base: u64,
    /// CRC-32 of all preceding bytes.
    pub crc32: u32,
    /// Must be zero.
    pub _reserved: u32,
}

const _: () = assert!(size_of::<BootStateRaw>() == 48);

impl BootStateRaw {
    /// The bytes covered by [`Self::crc32`].
    pub fn protected_bytes(&self) -> &[u8] {
        &self.as_bytes()[..core::mem::offset_of!(BootStateRaw, crc32)]
    }
}
