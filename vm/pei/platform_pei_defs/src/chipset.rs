// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Host bridge identification and memory controller registers.

use core::ops::Range;

wire_enum! {
    /// Supported host bridges, keyed by their PCI device ID.
    pub enum HostBridgeKind: u16 {
        /// Intel 440FX (the `pc` machine).
        I440Fx = 0x1237,
        /// Intel Q35 MCH (the `q35` machine).
        Q35 = 0x29c0,
    }
}

impl HostBridgeKind {
    /// The highest address RAM below 4GiB may reach on this chipset.
    pub const fn low_memory_ceiling(self) -> u64 {
        match self {
            HostBridgeKind::I440Fx => i440fx::LOW_MEMORY_CEILING,
            HostBridgeKind::Q35 => q35::PCIEXBAR_BASE,
        }
    }
}

/// The 128KiB of SMRAM at the default SMBASE, when the chipset supports it.
pub const DEFAULT_SMBASE_RANGE: Range<u64> = 0x3_0000..0x5_0000;

/// Intel 440FX definitions.
pub mod i440fx {
    /// RAM below 4GiB is capped at 3.5GiB.
    pub const LOW_MEMORY_CEILING: u64 = 0xe000_0000;
}

/// Q35 MCH definitions.
pub mod q35 {
    use bitfield_struct::bitfield;

    /// Base of the PCIe ECAM window. RAM below 4GiB ends at or before it.
    pub const PCIEXBAR_BASE: u64 = 0xb000_0000;

    /// Extended TSEG size register (16 bits, MiB).
    pub const MCH_EXT_TSEG_MBYTES: u16 = 0x50;
    /// Default SMBASE control register (8 bits).
    pub const MCH_DEFAULT_SMBASE_CTL: u16 = 0x9c;
    /// Value written to [`MCH_DEFAULT_SMBASE_CTL`] to query support.
    pub const MCH_DEFAULT_SMBASE_QUERY: u8 = 0xff;
    /// Value read back from [`MCH_DEFAULT_SMBASE_CTL`] when SMRAM at the
    /// default SMBASE is available.
    pub const MCH_DEFAULT_SMBASE_IN_RAM: u8 = 0x01;
    /// Extended SMRAM control register (8 bits). See [`Esmramc`].
    pub const MCH_ESMRAMC: u16 = 0x9e;
    /// TSEG memory base register (32 bits). Bits 31:20 hold the base.
    pub const MCH_TSEGMB: u16 = 0xac;

    /// Encodings of [`Esmramc::tseg_sz`].
    pub const TSEG_SZ_1MB: u8 = 0;
    /// 2MiB TSEG.
    pub const TSEG_SZ_2MB: u8 = 1;
    /// 8MiB TSEG.
    pub const TSEG_SZ_8MB: u8 = 2;
    /// Size taken from [`MCH_EXT_TSEG_MBYTES`].
    pub const TSEG_SZ_EXTENDED: u8 = 3;

    /// Extended SMRAM control.
    #[bitfield(u8)]
    pub struct Esmramc {
        /// TSEG enable.
        pub t_en: bool,
        /// TSEG size encoding.
        #[bits(2)]
        pub tseg_sz: u8,
        /// SMRAM L2 cache enable.
        pub sm_l2: bool,
        /// SMRAM L1 cache enable.
        pub sm_l1: bool,
        /// SMRAM cacheable.
        pub sm_cache: bool,
        /// Invalid SMRAM access.
        pub e_smerr: bool,
        /// High SMRAM enable.
        pub h_smrame: bool,
    }
}
