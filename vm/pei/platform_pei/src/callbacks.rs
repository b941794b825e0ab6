// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-CPU actions deferred until the CPUs can be enumerated.
//!
//! This stage runs on the boot CPU only. It records what every CPU must do;
//! the stage that brings the other CPUs up calls
//! [`CallbackRegistry::run_on_cpu`] on each of them.

use crate::channel::ConfigChannel;
use crate::error::PeiError;
use crate::platform_info::Phase;
use crate::platform_info::PlatformInfo;
use arrayvec::ArrayVec;
use platform_pei_defs::config::ConfigItem;
use platform_pei_defs::handoff::CallbackKind;
use platform_pei_defs::x86::FeatureControlMsr;
use platform_pei_defs::x86::MSR_IA32_FEATURE_CONTROL;

/// The largest CPU index a callback can track.
pub const MAX_CPUS: usize = 1024;
/// The maximum number of registered callbacks.
pub const MAX_CALLBACKS: usize = 4;

/// Operations on the CPU a callback is running on.
pub trait CpuOps {
    /// The index of this CPU, starting at zero.
    fn index(&self) -> u32;
    /// Reads an MSR.
    fn read_msr(&mut self, msr: u32) -> u64;
    /// Writes an MSR.
    fn write_msr(&mut self, msr: u32, value: u64);
    /// Writes back and invalidates all caches (`WBINVD`).
    fn write_back_invalidate(&mut self);
}

/// What a callback does on each CPU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Writes `value` to `IA32_FEATURE_CONTROL`, unless the MSR is already
    /// locked.
    WriteFeatureControl {
        /// The value to write.
        value: u64,
    },
    /// Writes back and invalidates caches.
    WriteBackInvalidate,
}

impl CallbackAction {
    /// The hand-off kind of this action.
    pub fn kind(&self) -> CallbackKind {
        match self {
            CallbackAction::WriteFeatureControl { .. } => CallbackKind::FeatureControl,
            CallbackAction::WriteBackInvalidate => CallbackKind::ClearCache,
        }
    }

    /// The action parameter reported in the hand-off.
    pub fn value(&self) -> u64 {
        match *self {
            CallbackAction::WriteFeatureControl { value } => value,
            CallbackAction::WriteBackInvalidate => 0,
        }
    }

    fn run(&self, cpu: &mut dyn CpuOps) {
        match *self {
            CallbackAction::WriteFeatureControl { value } => {
                let current = FeatureControlMsr::from(cpu.read_msr(MSR_IA32_FEATURE_CONTROL));
                if current.lock() {
                    tracing::debug!(cpu = cpu.index(), "feature control already locked");
                    return;
                }
                cpu.write_msr(MSR_IA32_FEATURE_CONTROL, value);
            }
            CallbackAction::WriteBackInvalidate => cpu.write_back_invalidate(),
        }
    }
}

/// Whether a callback has run everywhere it needs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CallbackState {
    /// At least one CPU has not run it.
    Pending,
    /// Every CPU has run it.
    Executed,
}

/// A registered callback and the CPUs that have run it.
#[derive(Debug, Clone)]
pub struct DeferredCallback {
    action: CallbackAction,
    completed: [u64; MAX_CPUS / 64],
}

impl DeferredCallback {
    fn new(action: CallbackAction) -> Self {
        Self {
            action,
            completed: [0; MAX_CPUS / 64],
        }
    }

    /// The action.
    pub fn action(&self) -> CallbackAction {
        self.action
    }

    /// Returns true if CPU `index` has run this callback.
    pub fn has_run(&self, index: u32) -> bool {
        let index = index as usize;
        index < MAX_CPUS && self.completed[index / 64] & (1 << (index % 64)) != 0
    }

    fn mark(&mut self, index: u32) {
        let index = index as usize;
        self.completed[index / 64] |= 1 << (index % 64);
    }
}

/// The set of registered callbacks.
#[derive(Debug, Clone)]
pub struct CallbackRegistry {
    entries: ArrayVec<DeferredCallback, MAX_CALLBACKS>,
    cpu_count: u32,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: ArrayVec::new(),
            cpu_count: 0,
        }
    }

    fn register(&mut self, action: CallbackAction) -> Result<(), PeiError> {
        tracing::debug!(?action, "registered per-cpu callback");
        self.entries
            .try_push(DeferredCallback::new(action))
            .map_err(|_| PeiError::TooManyRegions)
    }

    /// The registered callbacks, in registration order.
    pub fn entries(&self) -> &[DeferredCallback] {
        &self.entries
    }

    /// Returns whether the callback at `index` has run on every CPU.
    pub fn state(&self, index: usize) -> Option<CallbackState> {
        let entry = self.entries.get(index)?;
        let done = (0..self.cpu_count).all(|cpu| entry.has_run(cpu));
        Some(if done {
            CallbackState::Executed
        } else {
            CallbackState::Pending
        })
    }

    /// Runs every callback that has not yet run on `cpu`. Returns the number
    /// of callbacks run.
    ///
    /// CPUs outside the platform's CPU count are ignored.
    pub fn run_on_cpu(&mut self, cpu: &mut dyn CpuOps) -> usize {
        let index = cpu.index();
        if index >= self.cpu_count {
            tracing::warn!(cpu = index, cpu_count = self.cpu_count, "cpu index out of range");
            return 0;
        }

        let mut ran = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.has_run(index)) {
            entry.action.run(cpu);
            entry.mark(index);
            ran += 1;
        }
        ran
    }
}

/// Registers the per-CPU feature control and cache flush actions. Nothing
/// runs here.
///
/// Requires [`Phase::FirmwareVolumesPublished`].
pub fn register_callbacks(
    info: &mut PlatformInfo,
    channel: &mut dyn ConfigChannel,
) -> Result<(), PeiError> {
    info.expect_phase(Phase::FirmwareVolumesPublished)?;

    let max_cpus = info.sizing().max_cpus.min(MAX_CPUS as u32);
    let registry = &mut info.callbacks;
    registry.cpu_count = max_cpus;
    if let Some(value) = channel.read_scalar(ConfigItem::FeatureControl) {
        registry.register(CallbackAction::WriteFeatureControl { value })?;
    }
    registry.register(CallbackAction::WriteBackInvalidate)?;

    info.set_phase(Phase::CallbacksRegistered);
    Ok(())
}
