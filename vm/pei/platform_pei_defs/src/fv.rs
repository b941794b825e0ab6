// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware volume header layout.

#![expect(missing_docs)] // field names follow the vendor definitions

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// `_FVH`
pub const FV_SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");
/// The only supported header revision.
pub const FV_REVISION: u8 = 2;
/// The largest header (including the block map) that will be read.
pub const FV_MAX_HEADER_LENGTH: usize = 256;

/// The fixed portion of a firmware volume header. The block map follows it,
/// and `header_length` covers both.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct FirmwareVolumeHeader {
    pub zero_vector: [u8; 16],
    pub file_system_guid: [u8; 16],
    /// Length of the whole volume in bytes.
    pub fv_length: u64,
    pub signature: u32,
    pub attributes: u32,
    pub header_length: u16,
    /// Makes the 16-bit sum of the header words zero.
    pub checksum: u16,
    pub ext_header_offset: u16,
    pub reserved: u8,
    pub revision: u8,
}

const _: () = assert!(size_of::<FirmwareVolumeHeader>() == 56);

/// One block map entry. A zeroed entry terminates the map.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct FvBlockMapEntry {
    pub num_blocks: u32,
    pub length: u32,
}
