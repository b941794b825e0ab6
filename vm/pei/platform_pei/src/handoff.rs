// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serialization of the platform info record for the next boot stage.
//!
//! The format is defined in [`platform_pei_defs::handoff`], which also
//! provides the reader.

use crate::boot_mode::capture_boot_state;
use crate::error::PeiError;
use crate::platform_info::ConfidentialMode;
use crate::platform_info::Phase;
use crate::platform_info::PlatformInfo;
use platform_pei_defs::handoff::entry_length;
use platform_pei_defs::handoff::BootStateSnapshotEntry;
use platform_pei_defs::handoff::CpuInfoEntry;
use platform_pei_defs::handoff::DeferredCallbackEntry;
use platform_pei_defs::handoff::DiagnosticEntry;
use platform_pei_defs::handoff::EntryHeader;
use platform_pei_defs::handoff::FirmwareVolumeEntry;
use platform_pei_defs::handoff::HandoffEntry;
use platform_pei_defs::handoff::MemoryRegionEntry;
use platform_pei_defs::handoff::MemoryTypeInfoEntry;
use platform_pei_defs::handoff::PeiMemoryEntry;
use platform_pei_defs::handoff::PlatformSummaryEntry;
use platform_pei_defs::handoff::ReservedRegionEntry;
use platform_pei_defs::handoff::VersionEntry;
use platform_pei_defs::handoff::HANDOFF_SIGNATURE;
use platform_pei_defs::handoff::HANDOFF_VERSION;
use zerocopy::IntoBytes;

/// I/O port address bits reported to the DXE CPU driver.
const IO_SPACE_BITS: u8 = 16;

/// Appends entries to a caller-provided buffer. Keeps counting past the end
/// of the buffer so that the required size can be reported.
struct EntryWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    count: u32,
}

impl<'a> EntryWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            count: 0,
        }
    }

    fn push<T: HandoffEntry>(&mut self, payload: &T) {
        let length = entry_length(size_of::<T>());
        let start = self.len;
        self.len += length;
        self.count += 1;

        let Some(entry) = self.buf.get_mut(start..start + length) else {
            return;
        };
        entry.fill(0);
        let header = EntryHeader {
            tag: T::TAG.as_raw(),
            length: length as u32,
        };
        let (header_bytes, rest) = entry.split_at_mut(size_of::<EntryHeader>());
        header_bytes.copy_from_slice(header.as_bytes());
        rest[..size_of::<T>()].copy_from_slice(payload.as_bytes());
    }

    fn version(&self) -> VersionEntry {
        VersionEntry {
            signature: HANDOFF_SIGNATURE,
            version: HANDOFF_VERSION,
            entry_count: self.count,
            total_size: self.len as u32,
        }
    }
}

/// Writes the hand-off record for `info` into `buf`. Returns the number of
/// bytes written.
///
/// Requires [`Phase::CallbacksRegistered`].
pub fn write_handoff(info: &PlatformInfo, buf: &mut [u8]) -> Result<usize, PeiError> {
    info.expect_phase(Phase::CallbacksRegistered)?;

    let mut writer = EntryWriter::new(buf);
    // Patched once the totals are known.
    let version = writer.version();
    writer.push(&version);

    let sizing = info.sizing();
    let confidential = info
        .confidential_mode()
        .unwrap_or(ConfidentialMode::DISABLED);
    writer.push(&PlatformSummaryEntry {
        address_width: sizing.address_width,
        boot_mode: info.boot_mode().as_raw(),
        confidential_kind: confidential.kind.as_raw(),
        c_bit: confidential.c_bit,
        max_cpus: sizing.max_cpus,
        boot_cpus: sizing.boot_cpus,
        host_bridge: sizing.host_bridge.map_or(0, |kind| kind.as_raw()),
        _reserved: 0,
        low_memory: sizing.low_memory,
        high_memory: sizing.high_memory,
        mmio_base: info.mmio_window().map_or(0, |mmio| mmio.start()),
    });

    for region in info.regions() {
        writer.push(&MemoryRegionEntry {
            base: region.range.start(),
            length: region.range.len(),
            kind: region.kind.as_raw(),
            encryption: region.encryption.as_raw(),
        });
    }

    for volume in info.firmware_volumes() {
        writer.push(&FirmwareVolumeEntry {
            base: volume.range.start(),
            length: volume.range.len(),
            role: volume.role.as_raw(),
            _reserved: 0,
        });
    }

    writer.push(&ReservedRegionEntry {
        base: sizing.reserved.map_or(0, |r| r.start()),
        length: sizing.reserved.map_or(0, |r| r.len()),
        smbase_base: sizing.smbase.map_or(0, |r| r.start()),
        smbase_length: sizing.smbase.map_or(0, |r| r.len()),
    });

    if let Some(pei_memory) = info.pei_memory() {
        writer.push(&PeiMemoryEntry {
            base: pei_memory.start(),
            length: pei_memory.len(),
        });
    }

    writer.push(&CpuInfoEntry {
        memory_space_bits: sizing.address_width,
        io_space_bits: IO_SPACE_BITS,
        _reserved: [0; 6],
    });

    writer.push(&MemoryTypeInfoEntry {
        entries: info.memory_type_info,
    });

    for callback in info.callbacks().entries() {
        let action = callback.action();
        writer.push(&DeferredCallbackEntry {
            kind: action.kind().as_raw(),
            _reserved: 0,
            value: action.value(),
        });
    }

    let diagnostics = info.diagnostics();
    for (i, diagnostic) in diagnostics.iter().enumerate() {
        let last = i + 1 == diagnostics.len();
        writer.push(&DiagnosticEntry {
            code: diagnostic.code.as_raw(),
            dropped: if last { info.dropped_diagnostics() } else { 0 },
            value: diagnostic.value,
        });
    }

    writer.push(&BootStateSnapshotEntry {
        record: capture_boot_state(info),
    });

    let len = writer.len;
    if len > writer.buf.len() {
        return Err(PeiError::HandoffBufferTooSmall(len));
    }
    let version = writer.version();
    let start = size_of::<EntryHeader>();
    writer.buf[start..start + size_of::<VersionEntry>()].copy_from_slice(version.as_bytes());

    tracing::info!(
        entries = version.entry_count,
        size = len,
        "wrote hand-off record"
    );
    Ok(len)
}
