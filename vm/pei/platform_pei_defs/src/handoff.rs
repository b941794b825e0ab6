// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The hand-off record format.
//!
//! The record is a flat list of entries. Each entry starts with an
//! [`EntryHeader`] whose length covers the header and the payload, padded to
//! 8 bytes. The first entry is always a [`VersionEntry`]. Consumers find
//! entries by tag, so the order of the remaining entries carries no meaning
//! and unknown tags are skipped.

use crate::boot_state::BootStateRaw;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// `PEIH`
pub const HANDOFF_SIGNATURE: u32 = u32::from_le_bytes(*b"PEIH");
/// Current format version.
pub const HANDOFF_VERSION: u32 = 1;
/// Entry alignment and padding granularity.
pub const HANDOFF_ALIGNMENT: usize = 8;

wire_enum! {
    /// Entry tags. Values are stable across versions.
    pub enum HandoffTag: u32 {
        /// [`VersionEntry`].
        Version = 0,
        /// [`PlatformSummaryEntry`].
        PlatformSummary = 1,
        /// [`MemoryRegionEntry`], one per region.
        MemoryRegion = 2,
        /// [`FirmwareVolumeEntry`], one per volume.
        FirmwareVolume = 3,
        /// [`ReservedRegionEntry`].
        ReservedRegion = 4,
        /// [`CpuInfoEntry`].
        CpuInfo = 5,
        /// [`MemoryTypeInfoEntry`].
        MemoryTypeInfo = 6,
        /// [`DeferredCallbackEntry`], one per callback.
        DeferredCallback = 7,
        /// [`DiagnosticEntry`], one per recorded diagnostic.
        Diagnostic = 8,
        /// [`BootStateSnapshotEntry`].
        BootStateSnapshot = 9,
        /// [`PeiMemoryEntry`].
        PeiMemory = 10,
    }
}

wire_enum! {
    /// Classification of the current boot. Values match the UEFI PI boot
    /// mode encoding.
    pub enum BootMode: u8 {
        /// A fresh boot with full configuration.
        Full = 0x00,
        /// Resume from S3.
        S3Resume = 0x11,
        /// Recovery boot.
        Recovery = 0x20,
    }
}

wire_enum! {
    /// Encrypted-memory execution mode.
    pub enum ConfidentialKind: u8 {
        /// Checked, and not running with encrypted memory.
        Disabled = 0,
        /// AMD SEV.
        Sev = 1,
        /// AMD SEV-ES.
        SevEs = 2,
        /// AMD SEV-SNP.
        SevSnp = 3,
    }
}

wire_enum! {
    /// Memory region kinds.
    pub enum RegionKind: u32 {
        /// RAM available to later stages.
        SystemMemory = 1,
        /// RAM or address space that must not be used.
        Reserved = 2,
        /// Uncached memory-mapped I/O.
        Mmio = 3,
        /// A firmware volume.
        FirmwareVolume = 4,
    }
}

wire_enum! {
    /// How a region must be accessed under an encrypted-memory mode.
    pub enum Encryption: u32 {
        /// Encrypted memory is not in use.
        NotApplicable = 0,
        /// Encrypted; not accessible to the host.
        Private = 1,
        /// Unencrypted; shared with the host.
        Shared = 2,
    }
}

wire_enum! {
    /// Purpose of a firmware volume.
    pub enum FvRole: u32 {
        /// Volume holding the remaining PEI modules.
        Pei = 1,
        /// Volume holding the DXE core and drivers.
        Dxe = 2,
    }
}

wire_enum! {
    /// Per-CPU actions deferred until CPUs can be enumerated.
    pub enum CallbackKind: u32 {
        /// Program and lock `IA32_FEATURE_CONTROL`.
        FeatureControl = 1,
        /// Write back and invalidate caches.
        ClearCache = 2,
    }
}

wire_enum! {
    /// Recoverable conditions that were replaced by defaults.
    pub enum DiagnosticCode: u32 {
        /// The e820 map was malformed and ignored. Value: blob length.
        MalformedE820 = 1,
        /// RAM below 4GiB exceeded the chipset ceiling. Value: original size.
        LowMemoryClamped = 2,
        /// The address width override was out of range. Value: override.
        InvalidAddressWidth = 3,
        /// RAM above 4GiB did not fit the address width. Value: original size.
        HighMemoryClamped = 4,
        /// The maximum CPU count was out of range. Value: reported count.
        InvalidMaxCpuCount = 5,
        /// The boot CPU count was out of range. Value: reported count.
        InvalidBootCpuCount = 6,
        /// The reserved region base override was unusable. Value: override.
        InvalidReservedRegionBase = 7,
        /// The chipset has no reserved region. Value: requested MiB.
        ReservedRegionUnsupported = 8,
        /// The address width was reduced below the encryption bit. Value:
        /// original width.
        AddressWidthReducedForEncryption = 9,
        /// RAM below 4GiB was trimmed for the MMIO window. Value: bytes lost.
        LowMemoryTrimmedForMmio = 10,
        /// The persisted boot state named an unknown last state. Value: raw
        /// state.
        UnrecognizedBootState = 11,
        /// Resume was requested without S3 support. Value: zero.
        S3Unsupported = 12,
        /// Persisted geometry failed its integrity check. Value: stored CRC.
        GeometryIntegrityFailed = 13,
        /// A firmware volume failed validation. Value: volume base.
        InvalidFirmwareVolume = 14,
        /// The CPU reported unusable address bits. Value: reported bits.
        InvalidCpuAddressBits = 15,
        /// The e820 map did not fit the read buffer; only the leading entries
        /// were used. Value: reported blob length.
        TruncatedE820 = 16,
        /// The persisted boot-state record had the wrong length, signature or
        /// version. Value: stored length.
        MalformedBootState = 17,
    }
}

wire_enum! {
    /// UEFI memory types referenced by [`MemoryTypeInfoEntry`].
    pub enum MemoryType: u32 {
        /// `EfiReservedMemoryType`
        Reserved = 0,
        /// `EfiRuntimeServicesCode`
        RuntimeServicesCode = 5,
        /// `EfiRuntimeServicesData`
        RuntimeServicesData = 6,
        /// `EfiACPIReclaimMemory`
        AcpiReclaim = 9,
        /// `EfiACPIMemoryNVS`
        AcpiNvs = 10,
    }
}

/// Common entry header.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct EntryHeader {
    /// A [`HandoffTag`] value.
    pub tag: u32,
    /// Length of the header plus the padded payload.
    pub length: u32,
}

/// Always the first entry.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VersionEntry {
    /// [`HANDOFF_SIGNATURE`].
    pub signature: u32,
    /// [`HANDOFF_VERSION`].
    pub version: u32,
    /// Number of entries, including this one.
    pub entry_count: u32,
    /// Total length of the record in bytes.
    pub total_size: u32,
}

/// The scalar platform facts.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PlatformSummaryEntry {
    /// Physical address width in bits.
    pub address_width: u8,
    /// A [`BootMode`] value.
    pub boot_mode: u8,
    /// A [`ConfidentialKind`] value.
    pub confidential_kind: u8,
    /// Encryption bit position, or zero.
    pub c_bit: u8,
    /// Upper bound on the CPU count.
    pub max_cpus: u32,
    /// CPUs present at boot.
    pub boot_cpus: u32,
    /// Host bridge device ID.
    pub host_bridge: u16,
    /// Zero.
    pub _reserved: u16,
    /// Bytes of RAM below 4GiB.
    pub low_memory: u64,
    /// Bytes of RAM above 4GiB.
    pub high_memory: u64,
    /// Base of the MMIO window below 4GiB.
    pub mmio_base: u64,
}

/// One published memory region.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct MemoryRegionEntry {
    /// Base address.
    pub base: u64,
    /// Length in bytes.
    pub length: u64,
    /// A [`RegionKind`] value.
    pub kind: u32,
    /// An [`Encryption`] value.
    pub encryption: u32,
}

/// One firmware volume.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct FirmwareVolumeEntry {
    /// Base address.
    pub base: u64,
    /// Length in bytes.
    pub length: u64,
    /// A [`FvRole`] value.
    pub role: u32,
    /// Zero.
    pub _reserved: u32,
}

/// The chipset-reserved region and the optional SMBASE reservation. Lengths
/// are zero when absent.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReservedRegionEntry {
    /// Reserved region base.
    pub base: u64,
    /// Reserved region length.
    pub length: u64,
    /// SMBASE reservation base.
    pub smbase_base: u64,
    /// SMBASE reservation length.
    pub smbase_length: u64,
}

/// CPU facts for the DXE CPU driver.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CpuInfoEntry {
    /// Physical memory address bits.
    pub memory_space_bits: u8,
    /// I/O port address bits.
    pub io_space_bits: u8,
    /// Zero.
    pub _reserved: [u8; 6],
}

/// Number of [`MemoryTypeInformation`] records in a [`MemoryTypeInfoEntry`].
pub const MEMORY_TYPE_INFO_COUNT: usize = 5;

/// Page count preallocated for one memory type.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct MemoryTypeInformation {
    /// A [`MemoryType`] value.
    pub memory_type: u32,
    /// Number of 4KiB pages.
    pub pages: u32,
}

/// Default allocation sizes per memory type, which keep the UEFI memory map
/// stable across boots.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct MemoryTypeInfoEntry {
    /// The records.
    pub entries: [MemoryTypeInformation; MEMORY_TYPE_INFO_COUNT],
}

/// The permanent memory the PEI core switches to once this stage returns.
/// Lies inside a system memory region below 4GiB.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PeiMemoryEntry {
    /// Base address.
    pub base: u64,
    /// Length in bytes.
    pub length: u64,
}

/// One registered per-CPU callback.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct DeferredCallbackEntry {
    /// A [`CallbackKind`] value.
    pub kind: u32,
    /// Zero.
    pub _reserved: u32,
    /// Action parameter, such as the feature control value.
    pub value: u64,
}

/// One recoverable diagnostic.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct DiagnosticEntry {
    /// A [`DiagnosticCode`] value.
    pub code: u32,
    /// Number of diagnostics dropped because the log was full. Only set on
    /// the last entry.
    pub dropped: u32,
    /// Code-specific value.
    pub value: u64,
}

/// The boot-state record later stages should persist before suspending.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct BootStateSnapshotEntry {
    /// The record, with its CRC already computed.
    pub record: BootStateRaw,
}

/// A hand-off entry payload type.
pub trait HandoffEntry: IntoBytes + FromBytes + Immutable + KnownLayout {
    /// The tag this payload is stored under.
    const TAG: HandoffTag;
}

macro_rules! handoff_entries {
    {
        $($name:ident => $tag:ident,)*
    } => {
        $(
            impl HandoffEntry for $name {
                const TAG: HandoffTag = HandoffTag::$tag;
            }
        )*
    }
}

handoff_entries! {
    VersionEntry => Version,
    PlatformSummaryEntry => PlatformSummary,
    MemoryRegionEntry => MemoryRegion,
    FirmwareVolumeEntry => FirmwareVolume,
    ReservedRegionEntry => ReservedRegion,
    CpuInfoEntry => CpuInfo,
    MemoryTypeInfoEntry => MemoryTypeInfo,
    DeferredCallbackEntry => DeferredCallback,
    DiagnosticEntry => Diagnostic,
    BootStateSnapshotEntry => BootStateSnapshot,
    PeiMemoryEntry => PeiMemory,
}

/// Returns the padded length of an entry with a payload of `payload_len`
/// bytes, including its header.
pub const fn entry_length(payload_len: usize) -> usize {
    (size_of::<EntryHeader>() + payload_len).next_multiple_of(HANDOFF_ALIGNMENT)
}

/// Errors from [`HandoffReader`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandoffParseError {
    /// The buffer ends before the version entry.
    #[error("hand-off record is truncated")]
    Truncated,
    /// The first entry is not a version entry.
    #[error("hand-off record does not start with a version entry")]
    MissingVersion,
    /// Wrong signature.
    #[error("bad hand-off signature {0:#x}")]
    BadSignature(u32),
    /// Unknown version.
    #[error("unsupported hand-off version {0}")]
    UnsupportedVersion(u32),
    /// The recorded size does not fit the buffer.
    #[error("hand-off size {total} exceeds the buffer length {len}")]
    BadTotalSize {
        /// Recorded size.
        total: u32,
        /// Buffer length.
        len: usize,
    },
    /// An entry header is malformed.
    #[error("malformed hand-off entry at offset {0:#x}")]
    MalformedEntry(usize),
}

/// Read access to a hand-off record.
#[derive(Debug, Clone, Copy)]
pub struct HandoffReader<'a> {
    data: &'a [u8],
    entry_count: u32,
}

impl<'a> HandoffReader<'a> {
    /// Validates the version entry and returns a reader over the record.
    pub fn new(data: &'a [u8]) -> Result<Self, HandoffParseError> {
        let (header, rest) =
            EntryHeader::read_from_prefix(data).map_err(|_| HandoffParseError::Truncated)?;
        if header.tag != HandoffTag::Version.as_raw() {
            return Err(HandoffParseError::MissingVersion);
        }
        let (version, _) =
            VersionEntry::read_from_prefix(rest).map_err(|_| HandoffParseError::Truncated)?;
        if version.signature != HANDOFF_SIGNATURE {
            return Err(HandoffParseError::BadSignature(version.signature));
        }
        if version.version != HANDOFF_VERSION {
            return Err(HandoffParseError::UnsupportedVersion(version.version));
        }
        let total = version.total_size as usize;
        if total > data.len() || total < entry_length(size_of::<VersionEntry>()) {
            return Err(HandoffParseError::BadTotalSize {
                total: version.total_size,
                len: data.len(),
            });
        }
        Ok(Self {
            data: &data[..total],
            entry_count: version.entry_count,
        })
    }

    /// The number of entries recorded in the version entry.
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Iterates over `(tag, payload)` pairs, including the version entry.
    /// Iteration stops after the first malformed entry.
    pub fn entries(&self) -> Entries<'a> {
        Entries {
            data: self.data,
            offset: 0,
        }
    }

    /// Returns the first entry of type `T`.
    pub fn find<T: HandoffEntry>(&self) -> Option<T> {
        self.iter::<T>().next()
    }

    /// Returns every entry of type `T`, in record order.
    pub fn iter<T: HandoffEntry>(&self) -> impl Iterator<Item = T> + 'a {
        self.entries().filter_map(|entry| {
            let (tag, payload) = entry.ok()?;
            if tag != T::TAG.as_raw() {
                return None;
            }
            T::read_from_prefix(payload).ok().map(|(value, _)| value)
        })
    }
}

/// Iterator returned by [`HandoffReader::entries`].
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<(u32, &'a [u8]), HandoffParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let offset = self.offset;
        let entry = self.data[offset..]
            .get(..size_of::<EntryHeader>())
            .and_then(|bytes| EntryHeader::read_from_bytes(bytes).ok())
            .filter(|header| {
                let length = header.length as usize;
                length >= size_of::<EntryHeader>()
                    && length % HANDOFF_ALIGNMENT == 0
                    && length <= self.data.len() - offset
            });

        let Some(header) = entry else {
            // Stop after reporting the first bad entry.
            self.offset = self.data.len();
            return Some(Err(HandoffParseError::MalformedEntry(offset)));
        };

        self.offset = offset + header.length as usize;
        Some(Ok((
            header.tag,
            &self.data[offset + size_of::<EntryHeader>()..self.offset],
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push<T: HandoffEntry>(buf: &mut [u8], offset: &mut usize, value: &T) {
        let len = entry_length(size_of::<T>());
        let header = EntryHeader {
            tag: T::TAG.as_raw(),
            length: len as u32,
        };
        buf[*offset..*offset + 8].copy_from_slice(header.as_bytes());
        buf[*offset + 8..*offset + 8 + size_of::<T>()].copy_from_slice(value.as_bytes());
        *offset += len;
    }

    fn record(buf: &mut [u8], total: Option<u32>) -> usize {
        let mut offset = 0;
        push(
            buf,
            &mut offset,
            &VersionEntry {
                signature: HANDOFF_SIGNATURE,
                version: HANDOFF_VERSION,
                entry_count: 3,
                total_size: 0,
            },
        );
        push(
            buf,
            &mut offset,
            &CpuInfoEntry {
                memory_space_bits: 40,
                io_space_bits: 16,
                _reserved: [0; 6],
            },
        );
        push(
            buf,
            &mut offset,
            &DeferredCallbackEntry {
                kind: CallbackKind::ClearCache.as_raw(),
                _reserved: 0,
                value: 0,
            },
        );
        let total = total.unwrap_or(offset as u32);
        buf[8 + 12..8 + 16].copy_from_slice(&total.to_le_bytes());
        offset
    }

    #[test]
    fn find_by_tag() {
        let mut buf = [0u8; 256];
        let len = record(&mut buf, None);
        let reader = HandoffReader::new(&buf[..len]).unwrap();
        assert_eq!(reader.entry_count(), 3);
        assert_eq!(reader.find::<CpuInfoEntry>().unwrap().memory_space_bits, 40);
        assert_eq!(
            reader.find::<DeferredCallbackEntry>().unwrap().kind,
            CallbackKind::ClearCache.as_raw()
        );
        assert!(reader.find::<PlatformSummaryEntry>().is_none());
        assert_eq!(reader.entries().count(), 3);
    }

    #[test]
    fn rejects_bad_headers() {
        let mut buf = [0u8; 256];
        let len = record(&mut buf, None);

        assert_eq!(
            HandoffReader::new(&buf[..4]).unwrap_err(),
            HandoffParseError::Truncated
        );

        let mut bad = buf;
        bad[8] ^= 1;
        assert!(matches!(
            HandoffReader::new(&bad[..len]),
            Err(HandoffParseError::BadSignature(_))
        ));

        let mut bad = buf;
        bad[0] = HandoffTag::CpuInfo.as_raw() as u8;
        assert_eq!(
            HandoffReader::new(&bad[..len]).unwrap_err(),
            HandoffParseError::MissingVersion
        );

        let mut bad = buf;
        record(&mut bad, Some(4096));
        assert!(matches!(
            HandoffReader::new(&bad[..len]),
            Err(HandoffParseError::BadTotalSize { total: 4096, .. })
        ));
    }

    #[test]
    fn stops_at_malformed_entry() {
        let mut buf = [0u8; 256];
        let len = record(&mut buf, None);
        // Corrupt the length of the second entry so it is not 8-byte padded.
        let second = entry_length(size_of::<VersionEntry>());
        buf[second + 4..second + 8].copy_from_slice(&13u32.to_le_bytes());

        let reader = HandoffReader::new(&buf[..len]).unwrap();
        let entries: [_; 2] = {
            let mut it = reader.entries();
            [it.next().unwrap(), it.next().unwrap()]
        };
        assert!(entries[0].is_ok());
        assert_eq!(entries[1], Err(HandoffParseError::MalformedEntry(second)));
        assert!(reader.find::<DeferredCallbackEntry>().is_none());
    }
}
