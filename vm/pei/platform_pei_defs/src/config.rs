// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Items published by the hypervisor configuration channel.
//!
//! Every value read through the channel is host-controlled and must be range
//! checked before use.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

wire_enum! {
    /// Identifiers for the items the configuration channel can provide.
    pub enum ConfigItem: u16 {
        /// Physical address width override, in bits.
        AddressWidth = 0x01,
        /// Bytes of RAM below 4GiB, used when no e820 map is present.
        LowMemorySize = 0x02,
        /// Bytes of RAM above 4GiB, used when no e820 map is present.
        HighMemorySize = 0x03,
        /// Upper bound on the number of CPUs, including hotpluggable ones.
        MaxCpuCount = 0x04,
        /// Number of CPUs present at boot.
        BootCpuCount = 0x05,
        /// Size selector for the chipset-reserved (TSEG) region, in MiB.
        ReservedRegionMbytes = 0x06,
        /// Base address override for the chipset-reserved region.
        ReservedRegionBase = 0x07,
        /// Encrypted-memory mode asserted by the hypervisor. See
        /// [`EncryptedModeStatus`].
        EncryptedModeStatus = 0x08,
        /// Value to program into `IA32_FEATURE_CONTROL` on every CPU.
        FeatureControl = 0x09,
        /// Non-zero if the virtual platform supports the S3 sleep state.
        S3Supported = 0x0a,
        /// Raw e820 map, as a packed array of [`E820Entry`].
        E820 = 0x20,
    }
}

wire_enum! {
    /// Values of [`ConfigItem::EncryptedModeStatus`].
    pub enum EncryptedModeStatus: u64 {
        /// The hypervisor does not run the guest with encrypted memory.
        Disabled = 0,
        /// AMD SEV.
        Sev = 1,
        /// AMD SEV with encrypted state.
        SevEs = 2,
        /// AMD SEV with secure nested paging.
        SevSnp = 3,
    }
}

/// Usable RAM.
pub const E820_RAM: u32 = 1;
/// Reserved, not usable by the OS.
pub const E820_RESERVED: u32 = 2;

/// The maximum number of e820 entries accepted from the channel.
pub const MAX_E820_ENTRIES: usize = 128;

/// One entry of the e820 map published through [`ConfigItem::E820`].
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct E820Entry {
    /// Base physical address.
    pub base: u64,
    /// Length of the range in bytes.
    pub length: u64,
    /// Range type, such as [`E820_RAM`].
    pub typ: u32,
}

const _: () = assert!(size_of::<E820Entry>() == 20);
