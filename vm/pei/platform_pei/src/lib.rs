// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The platform PEI stage of the VM firmware.
//!
//! Runs once on the boot CPU, before memory is initialized for later stages.
//! It reconciles the hypervisor configuration channel, the chipset, the CPU
//! and the persisted boot state into a [`PlatformInfo`] record, then
//! serializes the record with [`handoff::write_handoff`] for the next stage.
//!
//! Each step of [`platform_init`] is also exported on its own. The record
//! tracks which steps have run, and a step called out of order fails with
//! [`PeiError::OutOfOrder`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![no_std]

pub mod boot_mode;
pub mod callbacks;
pub mod channel;
pub mod chipset;
pub mod config;
pub mod confidential;
pub mod error;
pub mod firmware_volume;
pub mod handoff;
pub mod hw;
pub mod memory_map;
pub mod platform_info;
pub mod range;
pub mod topology;

#[cfg(test)]
mod test_helpers;

pub use config::PeiConfig;
pub use error::PeiError;
pub use platform_info::PlatformInfo;

use boot_mode::BootStateStore;
use channel::ConfigChannel;
use hw::Cpu;
use hw::FlashAccess;
use hw::HostBridge;
use platform_info::Phase;

/// The hardware and firmware services the stage runs against.
pub struct Platform<'a> {
    /// The hypervisor configuration channel.
    pub channel: &'a mut dyn ConfigChannel,
    /// The boot CPU.
    pub cpu: &'a mut dyn Cpu,
    /// The host bridge.
    pub host_bridge: &'a mut dyn HostBridge,
    /// The firmware image.
    pub flash: &'a mut dyn FlashAccess,
    /// The persisted boot state.
    pub boot_state: &'a mut dyn BootStateStore,
}

/// Runs the step that follows the record's current phase.
fn advance(
    info: &mut PlatformInfo,
    platform: &mut Platform<'_>,
    config: &PeiConfig,
) -> Result<(), PeiError> {
    match info.phase() {
        Phase::Created => boot_mode::resolve_boot_mode(info, platform.boot_state, platform.channel),
        Phase::BootModeResolved => topology::discover_topology(
            info,
            platform.channel,
            platform.host_bridge,
            platform.cpu,
            config,
        ),
        Phase::TopologyDiscovered => {
            chipset::configure_chipset(info, platform.channel, platform.host_bridge, config)
        }
        Phase::ChipsetConfigured => {
            confidential::init_confidential(info, platform.channel, platform.cpu, config)
        }
        Phase::ConfidentialResolved => memory_map::publish_memory(info, config),
        Phase::MemoryPublished => {
            firmware_volume::publish_firmware_volumes(info, platform.flash, config)
        }
        Phase::FirmwareVolumesPublished => callbacks::register_callbacks(info, platform.channel),
        Phase::CallbacksRegistered => Ok(()),
    }
}

/// Runs the steps of `info` until it reaches `target`.
pub(crate) fn advance_to(
    info: &mut PlatformInfo,
    platform: &mut Platform<'_>,
    config: &PeiConfig,
    target: Phase,
) -> Result<(), PeiError> {
    while info.phase() < target {
        advance(info, platform, config)?;
    }
    Ok(())
}

/// Runs every step of the stage in order and returns the completed record.
///
/// Stops at the first fatal error. Nothing is published past the step that
/// failed.
pub fn platform_init(
    platform: &mut Platform<'_>,
    config: &PeiConfig,
) -> Result<PlatformInfo, PeiError> {
    let mut info = PlatformInfo::new();
    advance_to(&mut info, platform, config, Phase::CallbacksRegistered).inspect_err(|err| {
        tracing::error!(phase = ?info.phase(), error = %err, "platform init failed");
    })?;

    let sizing = info.sizing();
    tracing::info!(
        boot_mode = ?info.boot_mode(),
        confidential = ?info.confidential_mode().map(|mode| mode.kind),
        address_width = sizing.address_width,
        system_memory = format_args!("{:#x}", info.system_memory_bytes()),
        regions = info.regions().len(),
        firmware_volumes = info.firmware_volumes().len(),
        diagnostics = info.diagnostics().len(),
        "platform init complete"
    );
    Ok(info)
}
