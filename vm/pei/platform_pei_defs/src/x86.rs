// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CPUID leaves and MSRs consulted during platform initialization.

#![expect(missing_docs)] // field names follow the vendor definitions

use bitfield_struct::bitfield;

/// Highest supported extended CPUID leaf, in EAX.
pub const CPUID_EXTENDED_MAX_LEAF: u32 = 0x8000_0000;
/// Address sizes. See [`AddressSizesEax`].
pub const CPUID_ADDRESS_SIZES: u32 = 0x8000_0008;
/// AMD encrypted memory capabilities. See [`SevFeaturesEax`] and
/// [`SevFeaturesEbx`].
pub const CPUID_SEV_FEATURES: u32 = 0x8000_001f;

/// AMD SEV status. See [`SevStatusMsr`].
pub const MSR_SEV_STATUS: u32 = 0xc001_0131;
/// Feature control. See [`FeatureControlMsr`].
pub const MSR_IA32_FEATURE_CONTROL: u32 = 0x3a;

#[bitfield(u32)]
pub struct AddressSizesEax {
    pub physical_address_bits: u8,
    pub virtual_address_bits: u8,
    pub guest_physical_address_bits: u8,
    _reserved: u8,
}

#[bitfield(u32)]
pub struct SevFeaturesEax {
    pub sme: bool,
    pub sev: bool,
    pub page_flush_msr: bool,
    pub sev_es: bool,
    pub sev_snp: bool,
    #[bits(27)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct SevFeaturesEbx {
    /// Position of the encryption bit in page table entries.
    #[bits(6)]
    pub cbit_position: u8,
    /// Reduction in physical address bits when encryption is enabled.
    #[bits(6)]
    pub physical_bits_reduction: u8,
    #[bits(4)]
    pub number_of_vmpls: u8,
    _reserved: u16,
}

#[bitfield(u64)]
pub struct SevStatusMsr {
    pub sev_enabled: bool,
    pub es_enabled: bool,
    pub snp_enabled: bool,
    #[bits(61)]
    _reserved: u64,
}

#[bitfield(u64)]
pub struct FeatureControlMsr {
    /// Once set, the MSR cannot be written until reset.
    pub lock: bool,
    pub vmx_inside_smx: bool,
    pub vmx_outside_smx: bool,
    #[bits(61)]
    _reserved: u64,
}
