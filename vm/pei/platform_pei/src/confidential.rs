// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Encrypted-memory (SEV) detection and shared range bookkeeping.
//!
//! The processor and the hypervisor must agree on the mode. A disagreement
//! either way is fatal, since running on with the wrong mode would silently
//! change how later stages access memory.

use crate::channel::ConfigChannel;
use crate::config::PeiConfig;
use crate::error::PeiError;
use crate::hw::Cpu;
use crate::platform_info::ConfidentialMode;
use crate::platform_info::Phase;
use crate::platform_info::PlatformInfo;
use crate::range::is_sorted_disjoint;
use crate::range::MemoryRange;
use crate::range::FOUR_GIB;
use platform_pei_defs::config::ConfigItem;
use platform_pei_defs::config::EncryptedModeStatus;
use platform_pei_defs::handoff::ConfidentialKind;
use platform_pei_defs::handoff::DiagnosticCode;
use platform_pei_defs::x86::SevFeaturesEax;
use platform_pei_defs::x86::SevFeaturesEbx;
use platform_pei_defs::x86::SevStatusMsr;
use platform_pei_defs::x86::CPUID_EXTENDED_MAX_LEAF;
use platform_pei_defs::x86::CPUID_SEV_FEATURES;
use platform_pei_defs::x86::MSR_SEV_STATUS;

/// Legal encryption bit positions.
const C_BIT_RANGE: core::ops::RangeInclusive<u8> = 32..=63;

/// What the processor reports.
struct Detected {
    kind: ConfidentialKind,
    c_bit: u8,
}

fn detect(cpu: &mut dyn Cpu) -> Detected {
    let disabled = Detected {
        kind: ConfidentialKind::Disabled,
        c_bit: 0,
    };

    if cpu.cpuid(CPUID_EXTENDED_MAX_LEAF, 0).eax < CPUID_SEV_FEATURES {
        return disabled;
    }
    let leaf = cpu.cpuid(CPUID_SEV_FEATURES, 0);
    if !SevFeaturesEax::from(leaf.eax).sev() {
        return disabled;
    }

    let status = SevStatusMsr::from(cpu.read_msr(MSR_SEV_STATUS));
    let kind = if status.snp_enabled() {
        ConfidentialKind::SevSnp
    } else if status.es_enabled() {
        ConfidentialKind::SevEs
    } else if status.sev_enabled() {
        ConfidentialKind::Sev
    } else {
        return disabled;
    };

    Detected {
        kind,
        c_bit: SevFeaturesEbx::from(leaf.ebx).cbit_position(),
    }
}

fn asserted_kind(status: EncryptedModeStatus) -> ConfidentialKind {
    match status {
        EncryptedModeStatus::Disabled => ConfidentialKind::Disabled,
        EncryptedModeStatus::Sev => ConfidentialKind::Sev,
        EncryptedModeStatus::SevEs => ConfidentialKind::SevEs,
        EncryptedModeStatus::SevSnp => ConfidentialKind::SevSnp,
    }
}

/// Resolves the confidential mode and the ranges that must stay shared with
/// the host.
///
/// Requires [`Phase::ChipsetConfigured`]. The mode is always recorded, as
/// [`ConfidentialKind::Disabled`] when no encryption is active.
pub fn init_confidential(
    info: &mut PlatformInfo,
    channel: &mut dyn ConfigChannel,
    cpu: &mut dyn Cpu,
    config: &PeiConfig,
) -> Result<(), PeiError> {
    info.expect_phase(Phase::ChipsetConfigured)?;

    let detected = detect(cpu);
    if let Some(raw) = channel.read_scalar(ConfigItem::EncryptedModeStatus) {
        let asserted = EncryptedModeStatus::from_raw(raw)
            .map(asserted_kind)
            .ok_or(PeiError::UnknownEncryptedModeStatus(raw))?;
        if asserted != detected.kind {
            return Err(PeiError::ConfidentialMismatch {
                asserted,
                detected: detected.kind,
            });
        }
    }

    if detected.kind == ConfidentialKind::Disabled {
        tracing::info!("memory encryption not active");
        info.set_confidential_mode(ConfidentialMode::DISABLED)?;
        info.set_phase(Phase::ConfidentialResolved);
        return Ok(());
    }

    let c_bit = detected.c_bit;
    if !C_BIT_RANGE.contains(&c_bit) {
        return Err(PeiError::InvalidEncryptionBit(c_bit));
    }

    // Addresses at or above the encryption bit are not usable.
    let sizing = *info.sizing();
    if sizing.address_width > c_bit {
        info.diagnose(
            DiagnosticCode::AddressWidthReducedForEncryption,
            sizing.address_width.into(),
        );
        let high_limit = (1u64 << c_bit) - FOUR_GIB;
        if sizing.high_memory > high_limit {
            info.diagnose(DiagnosticCode::HighMemoryClamped, sizing.high_memory);
        }
        let sizing = info.sizing_mut()?;
        sizing.address_width = c_bit;
        sizing.high_memory = sizing.high_memory.min(high_limit);
    }

    let mut shared = arrayvec::ArrayVec::<MemoryRange, 2>::new();
    if let Some(dma) = channel.dma_buffer() {
        shared.push(dma);
    }
    if detected.kind >= ConfidentialKind::SevEs {
        shared.push(config.ghcb);
    }
    shared.sort_unstable();

    let low = MemoryRange::new(0..sizing.low_memory);
    for range in &shared {
        let usable = !range.is_empty()
            && low.contains(range)
            && [sizing.reserved, sizing.smbase]
                .iter()
                .flatten()
                .all(|excluded| !excluded.overlaps(range));
        if !usable {
            return Err(PeiError::SharedRangeOutsideMemory(*range));
        }
    }
    if !is_sorted_disjoint(&shared, |r| r) {
        return Err(PeiError::OverlappingRegions);
    }

    let mode = ConfidentialMode {
        kind: detected.kind,
        c_bit,
    };
    tracing::info!(kind = ?mode.kind, c_bit, shared = shared.len(), "memory encryption active");
    info.set_confidential_mode(mode)?;
    info.shared.clear();
    info.shared
        .try_extend_from_slice(&shared)
        .map_err(|_| PeiError::TooManyRegions)?;
    info.set_phase(Phase::ConfidentialResolved);
    Ok(())
}
