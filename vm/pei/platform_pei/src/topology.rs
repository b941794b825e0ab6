// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Host bridge, memory size, address width and CPU count discovery.

use crate::channel::ConfigChannel;
use crate::config::PeiConfig;
use crate::error::PeiError;
use crate::hw::Cpu;
use crate::hw::HostBridge;
use crate::platform_info::Phase;
use crate::platform_info::PlatformInfo;
use crate::range::align_down;
use crate::range::FOUR_GIB;
use crate::range::PAGE_SIZE;
use platform_pei_defs::chipset::HostBridgeKind;
use platform_pei_defs::config::ConfigItem;
use platform_pei_defs::config::E820Entry;
use platform_pei_defs::config::E820_RAM;
use platform_pei_defs::config::MAX_E820_ENTRIES;
use platform_pei_defs::handoff::BootMode;
use platform_pei_defs::handoff::DiagnosticCode;
use platform_pei_defs::x86::AddressSizesEax;
use platform_pei_defs::x86::CPUID_ADDRESS_SIZES;
use platform_pei_defs::x86::CPUID_EXTENDED_MAX_LEAF;
use zerocopy::FromBytes;

/// Physical address bits assumed when the CPU does not report them.
const FALLBACK_PHYSICAL_BITS: u8 = 36;

/// RAM sizes derived from an e820 map.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct E820Sizes {
    low: u64,
    high: u64,
}

/// Discovers the host bridge, memory sizes, address width and CPU counts.
///
/// Requires [`Phase::BootModeResolved`]. On a resume with trusted geometry,
/// the width and memory sizes come from the geometry and the channel is not
/// asked for them. A recovery boot ignores the address width override.
pub fn discover_topology(
    info: &mut PlatformInfo,
    channel: &mut dyn ConfigChannel,
    host_bridge: &mut dyn HostBridge,
    cpu: &mut dyn Cpu,
    config: &PeiConfig,
) -> Result<(), PeiError> {
    info.expect_phase(Phase::BootModeResolved)?;

    let device_id = host_bridge.device_id();
    let kind = HostBridgeKind::from_raw(device_id).ok_or(PeiError::UnknownHostBridge(device_id))?;

    let geometry = info.resume_geometry().copied();
    let (mut low, mut high) = match &geometry {
        Some(geometry) => (geometry.low_memory, geometry.high_memory),
        None => memory_sizes(info, channel)?,
    };
    low = align_down(low, PAGE_SIZE);
    high = align_down(high, PAGE_SIZE);

    if low == 0 || low < config.min_low_memory {
        return Err(PeiError::InsufficientMemory {
            low,
            min: config.min_low_memory,
        });
    }

    let ceiling = kind.low_memory_ceiling();
    if low > ceiling {
        info.diagnose(DiagnosticCode::LowMemoryClamped, low);
        low = ceiling;
    }

    let max_width = max_address_width(info, cpu, config);
    let requested = match &geometry {
        Some(geometry) => Some(geometry.address_width.into()),
        None if info.boot_mode() == BootMode::Recovery => None,
        None => channel.read_scalar(ConfigItem::AddressWidth),
    };
    let address_width = match requested {
        Some(width)
            if (u64::from(config.min_address_width)..=u64::from(max_width)).contains(&width) =>
        {
            width as u8
        }
        Some(width) => {
            info.diagnose(DiagnosticCode::InvalidAddressWidth, width);
            config.default_address_width.min(max_width)
        }
        None => derived_address_width(high, config, max_width),
    };

    let high_limit = (1u64 << address_width) - FOUR_GIB;
    if high > high_limit {
        info.diagnose(DiagnosticCode::HighMemoryClamped, high);
        high = high_limit;
    }

    let (max_cpus, boot_cpus) = cpu_counts(info, channel, config);

    tracing::info!(
        host_bridge = ?kind,
        low_memory = format_args!("{low:#x}"),
        high_memory = format_args!("{high:#x}"),
        address_width,
        max_cpus,
        boot_cpus,
        "platform topology"
    );

    let sizing = info.sizing_mut()?;
    sizing.host_bridge = Some(kind);
    sizing.low_memory = low;
    sizing.high_memory = high;
    sizing.total_memory = low + high;
    sizing.address_width = address_width;
    sizing.max_cpus = max_cpus;
    sizing.boot_cpus = boot_cpus;
    info.set_phase(Phase::TopologyDiscovered);
    Ok(())
}

/// Reads the memory sizes, preferring the e820 map over the scalar items.
///
/// A map longer than the read buffer is sized from the entries that fit.
fn memory_sizes(
    info: &mut PlatformInfo,
    channel: &mut dyn ConfigChannel,
) -> Result<(u64, u64), PeiError> {
    let mut buf = [0u8; MAX_E820_ENTRIES * size_of::<E820Entry>()];
    if let Some(len) = channel.read_blob(ConfigItem::E820, &mut buf) {
        let data = match buf.get(..len) {
            Some(data) => data,
            None => {
                info.diagnose(DiagnosticCode::TruncatedE820, len as u64);
                &buf[..]
            }
        };
        match parse_e820(data) {
            Some(sizes) => return Ok((sizes.low, sizes.high)),
            None => info.diagnose(DiagnosticCode::MalformedE820, len as u64),
        }
    }

    let low = channel
        .read_scalar(ConfigItem::LowMemorySize)
        .ok_or(PeiError::MissingMemorySize)?;
    let high = channel
        .read_scalar(ConfigItem::HighMemorySize)
        .unwrap_or(0);
    Ok((low, high))
}

/// Returns the RAM below and above 4GiB described by an e820 map, or `None`
/// if the map ends mid-entry, is empty or has an entry that wraps.
fn parse_e820(data: &[u8]) -> Option<E820Sizes> {
    let entries = <[E820Entry]>::ref_from_bytes(data).ok()?;
    if entries.is_empty() {
        return None;
    }

    let mut sizes = E820Sizes { low: 0, high: 0 };
    for entry in entries {
        let (base, length, typ) = (entry.base, entry.length, entry.typ);
        let end = base.checked_add(length)?;
        if typ != E820_RAM || length == 0 {
            continue;
        }
        if base < FOUR_GIB {
            sizes.low = sizes.low.max(end.min(FOUR_GIB));
        }
        if end > FOUR_GIB {
            sizes.high = sizes.high.max(end - FOUR_GIB);
        }
    }
    Some(sizes)
}

/// The widest address the configuration allows on this CPU.
fn max_address_width(info: &mut PlatformInfo, cpu: &mut dyn Cpu, config: &PeiConfig) -> u8 {
    let mut bits = FALLBACK_PHYSICAL_BITS;
    if cpu.cpuid(CPUID_EXTENDED_MAX_LEAF, 0).eax >= CPUID_ADDRESS_SIZES {
        let eax = AddressSizesEax::from(cpu.cpuid(CPUID_ADDRESS_SIZES, 0).eax);
        bits = eax.physical_address_bits();
    }
    if !(config.min_address_width..=64).contains(&bits) {
        info.diagnose(DiagnosticCode::InvalidCpuAddressBits, bits.into());
        bits = config.min_address_width;
    }
    config.max_address_width.min(bits)
}

/// Sizes the address space to cover RAM plus an aligned 64-bit PCI window.
fn derived_address_width(high: u64, config: &PeiConfig, max_width: u8) -> u8 {
    let window = config.pci64_window_size;
    let top = FOUR_GIB
        .saturating_add(high)
        .div_ceil(window)
        .saturating_mul(window)
        .saturating_add(window);
    let width = (u64::BITS - (top - 1).leading_zeros()) as u8;
    width.clamp(config.min_address_width, max_width)
}

fn cpu_counts(
    info: &mut PlatformInfo,
    channel: &mut dyn ConfigChannel,
    config: &PeiConfig,
) -> (u32, u32) {
    let max_cpus = match channel.read_scalar(ConfigItem::MaxCpuCount) {
        Some(count) if (1..=u64::from(config.max_cpus_limit)).contains(&count) => count as u32,
        Some(count) => {
            info.diagnose(DiagnosticCode::InvalidMaxCpuCount, count);
            config.default_max_cpus
        }
        None => config.default_max_cpus,
    };

    let boot_cpus = match channel.read_scalar(ConfigItem::BootCpuCount) {
        Some(count) if (1..=u64::from(max_cpus)).contains(&count) => count as u32,
        Some(count) => {
            info.diagnose(DiagnosticCode::InvalidBootCpuCount, count);
            1
        }
        None => 1,
    };

    (max_cpus, boot_cpus)
}
