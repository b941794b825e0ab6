// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The platform info record shared by every step of the pipeline.

use crate::boot_mode::Geometry;
use crate::callbacks::CallbackRegistry;
use crate::error::PeiError;
use crate::range::MemoryRange;
use arrayvec::ArrayVec;
use core::cell::OnceCell;
use platform_pei_defs::chipset::HostBridgeKind;
use platform_pei_defs::handoff::BootMode;
use platform_pei_defs::handoff::ConfidentialKind;
use platform_pei_defs::handoff::DiagnosticCode;
use platform_pei_defs::handoff::Encryption;
use platform_pei_defs::handoff::FvRole;
use platform_pei_defs::handoff::MemoryTypeInformation;
use platform_pei_defs::handoff::RegionKind;
use platform_pei_defs::handoff::MEMORY_TYPE_INFO_COUNT;

/// The maximum number of published memory regions.
pub const MAX_REGIONS: usize = 32;
/// The maximum number of firmware volumes.
pub const MAX_FIRMWARE_VOLUMES: usize = 4;
/// The maximum number of shared ranges.
pub const MAX_SHARED_RANGES: usize = 4;
/// The maximum number of diagnostics kept. Later ones are only counted.
pub const MAX_DIAGNOSTICS: usize = 16;

/// Progress of the pipeline. Each step requires one phase on entry and
/// leaves the record in the next.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Nothing has run.
    Created,
    /// The boot mode is known.
    BootModeResolved,
    /// Host bridge, memory sizes, address width and CPU counts are known.
    TopologyDiscovered,
    /// The reserved region is placed and programmed.
    ChipsetConfigured,
    /// The confidential mode and shared ranges are known.
    ConfidentialResolved,
    /// Memory regions and the permanent PEI memory are published. Sizing is
    /// frozen.
    MemoryPublished,
    /// Firmware volumes are published.
    FirmwareVolumesPublished,
    /// Per-CPU callbacks are registered. The record is complete.
    CallbacksRegistered,
}

/// Memory and CPU sizing. Frozen once [`Phase::MemoryPublished`] is reached.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Sizing {
    /// The host bridge.
    pub host_bridge: Option<HostBridgeKind>,
    /// Physical address width in bits.
    pub address_width: u8,
    /// Bytes of RAM below 4GiB.
    pub low_memory: u64,
    /// Bytes of RAM above 4GiB.
    pub high_memory: u64,
    /// Total RAM as discovered, before it was carved up.
    pub total_memory: u64,
    /// Upper bound on the CPU count.
    pub max_cpus: u32,
    /// CPUs present at boot.
    pub boot_cpus: u32,
    /// The chipset-reserved (TSEG) region.
    pub reserved: Option<MemoryRange>,
    /// The reserved region size selector, in MiB.
    pub reserved_mbytes: u32,
    /// SMRAM at the default SMBASE.
    pub smbase: Option<MemoryRange>,
}

/// The encrypted-memory mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConfidentialMode {
    /// The kind.
    pub kind: ConfidentialKind,
    /// Position of the encryption bit. Zero when inactive.
    pub c_bit: u8,
}

impl ConfidentialMode {
    /// Checked and inactive.
    pub const DISABLED: Self = Self {
        kind: ConfidentialKind::Disabled,
        c_bit: 0,
    };

    /// Returns true if memory is encrypted.
    pub fn is_active(&self) -> bool {
        self.kind != ConfidentialKind::Disabled
    }
}

/// A published memory region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// The range.
    pub range: MemoryRange,
    /// The kind.
    pub kind: RegionKind,
    /// How the range must be accessed.
    pub encryption: Encryption,
}

/// A validated firmware volume, of kind [`RegionKind::FirmwareVolume`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareVolume {
    /// The range.
    pub range: MemoryRange,
    /// The purpose.
    pub role: FvRole,
}

/// A recoverable condition that was replaced by a default.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// What happened.
    pub code: DiagnosticCode,
    /// Code-specific value, usually the rejected input.
    pub value: u64,
}

/// Everything the stage learns about the platform.
///
/// Created empty, filled in by each pipeline step in order, then returned by
/// value to the caller that serializes the hand-off.
#[derive(Debug)]
pub struct PlatformInfo {
    phase: Phase,
    sizing: Sizing,
    boot_mode: BootMode,
    resume_geometry: Option<Geometry>,
    confidential: OnceCell<ConfidentialMode>,
    pub(crate) shared: ArrayVec<MemoryRange, MAX_SHARED_RANGES>,
    pub(crate) mmio: Option<MemoryRange>,
    pub(crate) pei_memory: Option<MemoryRange>,
    pub(crate) regions: ArrayVec<MemoryRegion, MAX_REGIONS>,
    pub(crate) volumes: ArrayVec<FirmwareVolume, MAX_FIRMWARE_VOLUMES>,
    pub(crate) memory_type_info: [MemoryTypeInformation; MEMORY_TYPE_INFO_COUNT],
    pub(crate) callbacks: CallbackRegistry,
    diagnostics: ArrayVec<Diagnostic, MAX_DIAGNOSTICS>,
    dropped_diagnostics: u32,
}

impl PlatformInfo {
    /// Returns an empty record.
    pub fn new() -> Self {
        Self {
            phase: Phase::Created,
            sizing: Sizing::default(),
            boot_mode: BootMode::Full,
            resume_geometry: None,
            confidential: OnceCell::new(),
            shared: ArrayVec::new(),
            mmio: None,
            pei_memory: None,
            regions: ArrayVec::new(),
            volumes: ArrayVec::new(),
            memory_type_info: [MemoryTypeInformation {
                memory_type: 0,
                pages: 0,
            }; MEMORY_TYPE_INFO_COUNT],
            callbacks: CallbackRegistry::new(),
            diagnostics: ArrayVec::new(),
            dropped_diagnostics: 0,
        }
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn expect_phase(&self, expected: Phase) -> Result<(), PeiError> {
        if self.phase != expected {
            return Err(PeiError::OutOfOrder {
                expected,
                found: self.phase,
            });
        }
        Ok(())
    }

    pub(crate) fn set_phase(&mut self, next: Phase) {
        tracing::debug!(from = ?self.phase, to = ?next, "platform info phase");
        self.phase = next;
    }

    /// Memory and CPU sizing.
    pub fn sizing(&self) -> &Sizing {
        &self.sizing
    }

    /// Mutable access to sizing, refused once memory is published.
    pub(crate) fn sizing_mut(&mut self) -> Result<&mut Sizing, PeiError> {
        if self.phase >= Phase::MemoryPublished {
            return Err(PeiError::SizingFrozen);
        }
        Ok(&mut self.sizing)
    }

    /// The host bridge, once topology discovery has run.
    pub(crate) fn host_bridge(&self) -> Result<HostBridgeKind, PeiError> {
        self.sizing.host_bridge.ok_or(PeiError::OutOfOrder {
            expected: Phase::TopologyDiscovered,
            found: self.phase,
        })
    }

    /// The boot mode.
    pub fn boot_mode(&self) -> BootMode {
        self.boot_mode
    }

    /// Geometry from the previous boot, when it passed its integrity check.
    pub fn resume_geometry(&self) -> Option<&Geometry> {
        self.resume_geometry.as_ref()
    }

    pub(crate) fn set_boot_mode(&mut self, mode: BootMode, geometry: Option<Geometry>) {
        self.boot_mode = mode;
        self.resume_geometry = geometry;
    }

    /// The confidential mode, once resolved.
    pub fn confidential_mode(&self) -> Option<ConfidentialMode> {
        self.confidential.get().copied()
    }

    /// Sets the confidential mode. Fails if it was already set.
    pub(crate) fn set_confidential_mode(&mut self, mode: ConfidentialMode) -> Result<(), PeiError> {
        self.confidential
            .set(mode)
            .map_err(|_| PeiError::ConfidentialModeAlreadySet)
    }

    /// The access attribute for a range, given whether it is shared with the
    /// host.
    pub(crate) fn encryption(&self, shared: bool) -> Encryption {
        match self.confidential_mode() {
            Some(mode) if mode.is_active() => {
                if shared {
                    Encryption::Shared
                } else {
                    Encryption::Private
                }
            }
            _ => Encryption::NotApplicable,
        }
    }

    /// Ranges that must stay unencrypted, sorted by address.
    pub fn shared_ranges(&self) -> &[MemoryRange] {
        &self.shared
    }

    /// The MMIO window below 4GiB.
    pub fn mmio_window(&self) -> Option<MemoryRange> {
        self.mmio
    }

    /// The permanent PEI memory, inside a system memory region.
    pub fn pei_memory(&self) -> Option<MemoryRange> {
        self.pei_memory
    }

    /// Published memory regions, sorted by address.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Published firmware volumes.
    pub fn firmware_volumes(&self) -> &[FirmwareVolume] {
        &self.volumes
    }

    /// Default page counts per memory type.
    pub fn memory_type_info(&self) -> &[MemoryTypeInformation] {
        &self.memory_type_info
    }

    /// Registered per-CPU callbacks.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Registered per-CPU callbacks, for the stage that enumerates CPUs.
    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    /// Bytes published as system memory, shared or not.
    pub fn system_memory_bytes(&self) -> u64 {
        self.regions
            .iter()
            .filter(|r| r.kind == RegionKind::SystemMemory)
            .map(|r| r.range.len())
            .sum()
    }

    /// Recorded diagnostics, in the order they occurred.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Diagnostics that did not fit in the log.
    pub fn dropped_diagnostics(&self) -> u32 {
        self.dropped_diagnostics
    }

    /// Records a recoverable condition.
    pub(crate) fn diagnose(&mut self, code: DiagnosticCode, value: u64) {
        tracing::warn!(?code, value = format_args!("{value:#x}"), "using default");
        if self.diagnostics.try_push(Diagnostic { code, value }).is_err() {
            self.dropped_diagnostics += 1;
        }
    }
}
