// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The hypervisor configuration channel.

use crate::range::MemoryRange;
use platform_pei_defs::config::ConfigItem;

/// Read access to the items the hypervisor publishes for the firmware.
///
/// Every value is host controlled. Callers range check everything they read.
pub trait ConfigChannel {
    /// Reads a scalar item. Returns `None` if the hypervisor does not provide
    /// it.
    fn read_scalar(&mut self, item: ConfigItem) -> Option<u64>;

    /// Reads a blob item into `buf`. Returns the full length of the blob,
    /// which may exceed `buf.len()` if the blob was truncated, or `None` if
    /// the hypervisor does not provide it.
    fn read_blob(&mut self, item: ConfigItem, buf: &mut [u8]) -> Option<usize>;

    /// The buffer the transport uses for DMA, if any. The hypervisor reads
    /// and writes it directly, so it must stay accessible in plaintext.
    fn dma_buffer(&self) -> Option<MemoryRange>;
}
