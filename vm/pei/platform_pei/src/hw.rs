// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Access to the boot CPU, the host bridge and flash.

/// Offset of the device ID in PCI configuration space.
const PCI_DEVICE_ID: u16 = 0x02;

/// Output registers of a CPUID instruction.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CpuidResult {
    /// EAX
    pub eax: u32,
    /// EBX
    pub ebx: u32,
    /// ECX
    pub ecx: u32,
    /// EDX
    pub edx: u32,
}

/// The boot CPU.
pub trait Cpu {
    /// Executes CPUID.
    fn cpuid(&mut self, leaf: u32, subleaf: u32) -> CpuidResult;

    /// Reads an MSR.
    fn read_msr(&mut self, msr: u32) -> u64;
}

/// Configuration space of the host bridge at 00:00.0.
pub trait HostBridge {
    /// Reads an 8-bit register.
    fn read8(&mut self, offset: u16) -> u8;
    /// Writes an 8-bit register.
    fn write8(&mut self, offset: u16, value: u8);
    /// Reads a 16-bit register.
    fn read16(&mut self, offset: u16) -> u16;
    /// Writes a 16-bit register.
    fn write16(&mut self, offset: u16, value: u16);
    /// Writes a 32-bit register.
    fn write32(&mut self, offset: u16, value: u32);

    /// Reads the PCI device ID.
    fn device_id(&mut self) -> u16 {
        self.read16(PCI_DEVICE_ID)
    }
}

/// Read access to the memory-mapped firmware image.
pub trait FlashAccess {
    /// Fills `buf` from physical address `address`. Returns false if any
    /// part of the range is not backed by the image.
    fn read(&mut self, address: u64, buf: &mut [u8]) -> bool;
}
