// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock collaborators for the pipeline tests.

extern crate alloc;
extern crate std;

use crate::boot_mode::BootStateStore;
use crate::callbacks::CpuOps;
use crate::channel::ConfigChannel;
use crate::config::PeiConfig;
use crate::error::PeiError;
use crate::hw::Cpu;
use crate::hw::CpuidResult;
use crate::hw::FlashAccess;
use crate::hw::HostBridge;
use crate::platform_info::Phase;
use crate::platform_info::PlatformInfo;
use crate::range::MemoryRange;
use crate::Platform;
use alloc::vec::Vec;
use platform_pei_defs::boot_state::BootStateRaw;
use platform_pei_defs::chipset::q35;
use platform_pei_defs::chipset::HostBridgeKind;
use platform_pei_defs::config::ConfigItem;
use platform_pei_defs::config::E820Entry;
use platform_pei_defs::fv::FirmwareVolumeHeader;
use platform_pei_defs::fv::FvBlockMapEntry;
use platform_pei_defs::fv::FV_REVISION;
use platform_pei_defs::fv::FV_SIGNATURE;
use platform_pei_defs::handoff::ConfidentialKind;
use platform_pei_defs::x86::AddressSizesEax;
use platform_pei_defs::x86::SevFeaturesEax;
use platform_pei_defs::x86::SevFeaturesEbx;
use platform_pei_defs::x86::SevStatusMsr;
use platform_pei_defs::x86::CPUID_ADDRESS_SIZES;
use platform_pei_defs::x86::CPUID_EXTENDED_MAX_LEAF;
use platform_pei_defs::x86::CPUID_SEV_FEATURES;
use platform_pei_defs::x86::MSR_IA32_FEATURE_CONTROL;
use platform_pei_defs::x86::MSR_SEV_STATUS;
use tracing::metadata::LevelFilter;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

pub const MIB: u64 = crate::range::MIB;
pub const GIB: u64 = 1 << 30;

/// Routes tracing output to the test harness.
pub fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(LevelFilter::TRACE)
            .try_init();
    });
}

#[derive(Default)]
pub struct MockChannel {
    scalars: Vec<(ConfigItem, u64)>,
    blobs: Vec<(ConfigItem, Vec<u8>)>,
    dma: Option<MemoryRange>,
    pub queries: Vec<ConfigItem>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, item: ConfigItem, value: u64) -> Self {
        self.scalars.retain(|(i, _)| *i != item);
        self.scalars.push((item, value));
        self
    }

    pub fn without(mut self, item: ConfigItem) -> Self {
        self.scalars.retain(|(i, _)| *i != item);
        self.blobs.retain(|(i, _)| *i != item);
        self
    }

    pub fn with_blob(mut self, item: ConfigItem, data: Vec<u8>) -> Self {
        self.blobs.retain(|(i, _)| *i != item);
        self.blobs.push((item, data));
        self
    }

    /// Adds an e820 map of `(base, length, type)` entries.
    pub fn with_e820(self, entries: &[(u64, u64, u32)]) -> Self {
        let mut data = Vec::new();
        for &(base, length, typ) in entries {
            data.extend_from_slice(E820Entry { base, length, typ }.as_bytes());
        }
        self.with_blob(ConfigItem::E820, data)
    }

    pub fn with_dma(mut self, range: MemoryRange) -> Self {
        self.dma = Some(range);
        self
    }

    pub fn queried(&self, item: ConfigItem) -> bool {
        self.queries.contains(&item)
    }
}

impl ConfigChannel for MockChannel {
    fn read_scalar(&mut self, item: ConfigItem) -> Option<u64> {
        self.queries.push(item);
        self.scalars
            .iter()
            .find(|(i, _)| *i == item)
            .map(|(_, value)| *value)
    }

    fn read_blob(&mut self, item: ConfigItem, buf: &mut [u8]) -> Option<usize> {
        self.queries.push(item);
        let (_, data) = self.blobs.iter().find(|(i, _)| *i == item)?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Some(data.len())
    }

    fn dma_buffer(&self) -> Option<MemoryRange> {
        self.dma
    }
}

pub struct MockCpu {
    pub physical_bits: u8,
    sev: Option<(ConfidentialKind, u8)>,
    pub msr_reads: Vec<u32>,
}

impl MockCpu {
    pub fn new() -> Self {
        Self {
            physical_bits: 48,
            sev: None,
            msr_reads: Vec::new(),
        }
    }

    /// Reports SEV support, with `kind` active. `Disabled` means capable but
    /// not enabled.
    pub fn with_sev(mut self, kind: ConfidentialKind, c_bit: u8) -> Self {
        self.sev = Some((kind, c_bit));
        self
    }
}

impl Cpu for MockCpu {
    fn cpuid(&mut self, leaf: u32, _subleaf: u32) -> CpuidResult {
        match leaf {
            CPUID_EXTENDED_MAX_LEAF => CpuidResult {
                eax: if self.sev.is_some() {
                    CPUID_SEV_FEATURES
                } else {
                    CPUID_ADDRESS_SIZES
                },
                ..Default::default()
            },
            CPUID_ADDRESS_SIZES => CpuidResult {
                eax: AddressSizesEax::new()
                    .with_physical_address_bits(self.physical_bits)
                    .with_virtual_address_bits(48)
                    .into_bits(),
                ..Default::default()
            },
            CPUID_SEV_FEATURES => match self.sev {
                Some((_, c_bit)) => CpuidResult {
                    eax: SevFeaturesEax::new().with_sev(true).into_bits(),
                    ebx: SevFeaturesEbx::new().with_cbit_position(c_bit).into_bits(),
                    ..Default::default()
                },
                None => CpuidResult::default(),
            },
            _ => CpuidResult::default(),
        }
    }

    fn read_msr(&mut self, msr: u32) -> u64 {
        self.msr_reads.push(msr);
        match (msr, self.sev) {
            (MSR_SEV_STATUS, Some((kind, _))) => {
                let status = SevStatusMsr::new();
                match kind {
                    ConfidentialKind::Disabled => status,
                    ConfidentialKind::Sev => status.with_sev_enabled(true),
                    ConfidentialKind::SevEs => status.with_sev_enabled(true).with_es_enabled(true),
                    ConfidentialKind::SevSnp => status
                        .with_sev_enabled(true)
                        .with_es_enabled(true)
                        .with_snp_enabled(true),
                }
                .into_bits()
            }
            _ => 0,
        }
    }
}

pub struct MockHostBridge {
    regs: [u8; 256],
    pub smbase_in_ram: bool,
}

impl MockHostBridge {
    pub fn new(device_id: u16) -> Self {
        let mut regs = [0; 256];
        regs[2..4].copy_from_slice(&device_id.to_le_bytes());
        Self {
            regs,
            smbase_in_ram: false,
        }
    }

    pub fn reg8(&self, offset: u16) -> u8 {
        self.regs[offset as usize]
    }

    pub fn reg16(&self, offset: u16) -> u16 {
        let offset = offset as usize;
        u16::from_le_bytes([self.regs[offset], self.regs[offset + 1]])
    }

    pub fn reg32(&self, offset: u16) -> u32 {
        let offset = offset as usize;
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&self.regs[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    }

    fn write(&mut self, offset: u16, bytes: &[u8]) {
        let offset = offset as usize;
        self.regs[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl HostBridge for MockHostBridge {
    fn read8(&mut self, offset: u16) -> u8 {
        self.reg8(offset)
    }

    fn write8(&mut self, offset: u16, value: u8) {
        let value = if offset == q35::MCH_DEFAULT_SMBASE_CTL
            && value == q35::MCH_DEFAULT_SMBASE_QUERY
        {
            if self.smbase_in_ram {
                q35::MCH_DEFAULT_SMBASE_IN_RAM
            } else {
                0
            }
        } else {
            value
        };
        self.write(offset, &[value]);
    }

    fn read16(&mut self, offset: u16) -> u16 {
        self.reg16(offset)
    }

    fn write16(&mut self, offset: u16, value: u16) {
        self.write(offset, &value.to_le_bytes());
    }

    fn write32(&mut self, offset: u16, value: u32) {
        self.write(offset, &value.to_le_bytes());
    }
}

#[derive(Default)]
pub struct MockFlash {
    volumes: Vec<(u64, Vec<u8>)>,
}

impl MockFlash {
    pub fn insert(&mut self, base: u64, data: Vec<u8>) {
        self.volumes.retain(|(b, _)| *b != base);
        self.volumes.push((base, data));
    }

    pub fn insert_header(&mut self, base: u64, header: FirmwareVolumeHeader) {
        self.insert(base, fv_bytes(&header));
    }

    pub fn clear(&mut self) {
        self.volumes.clear();
    }
}

impl FlashAccess for MockFlash {
    fn read(&mut self, address: u64, buf: &mut [u8]) -> bool {
        for (base, data) in &self.volumes {
            let Some(offset) = address.checked_sub(*base) else {
                continue;
            };
            let Some(bytes) = usize::try_from(offset)
                .ok()
                .and_then(|offset| data.get(offset..offset + buf.len()))
            else {
                continue;
            };
            buf.copy_from_slice(bytes);
            return true;
        }
        false
    }
}

const FV_BLOCK_SIZE: u32 = 0x1000;

/// The header followed by a one-entry block map covering `fv_length`.
pub fn fv_bytes(header: &FirmwareVolumeHeader) -> Vec<u8> {
    let mut data = header.as_bytes().to_vec();
    let blocks = FvBlockMapEntry {
        num_blocks: (header.fv_length / u64::from(FV_BLOCK_SIZE)) as u32,
        length: FV_BLOCK_SIZE,
    };
    data.extend_from_slice(blocks.as_bytes());
    data.extend_from_slice(FvBlockMapEntry::new_zeroed().as_bytes());
    data
}

/// A valid header for a volume of `fv_length` bytes.
pub fn fv_header(fv_length: u64) -> FirmwareVolumeHeader {
    let mut header = FirmwareVolumeHeader::new_zeroed();
    header.fv_length = fv_length;
    header.signature = FV_SIGNATURE;
    header.attributes = 0x0004_feff;
    header.header_length =
        (size_of::<FirmwareVolumeHeader>() + 2 * size_of::<FvBlockMapEntry>()) as u16;
    header.revision = FV_REVISION;

    let sum = fv_bytes(&header)
        .chunks_exact(2)
        .fold(0u16, |sum, word| {
            sum.wrapping_add(u16::from_le_bytes([word[0], word[1]]))
        });
    header.checksum = 0u16.wrapping_sub(sum);
    header
}

pub struct MockBootState {
    pub record: Option<Vec<u8>>,
}

impl BootStateStore for MockBootState {
    fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
        let record = self.record.as_ref()?;
        let len = record.len().min(buf.len());
        buf[..len].copy_from_slice(&record[..len]);
        Some(record.len())
    }
}

pub struct MockCpuOps {
    index: u32,
    pub feature_control: u64,
    pub msr_writes: Vec<(u32, u64)>,
    pub cache_flushes: u32,
}

impl MockCpuOps {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            feature_control: 0,
            msr_writes: Vec::new(),
            cache_flushes: 0,
        }
    }
}

impl CpuOps for MockCpuOps {
    fn index(&self) -> u32 {
        self.index
    }

    fn read_msr(&mut self, msr: u32) -> u64 {
        match msr {
            MSR_IA32_FEATURE_CONTROL => self.feature_control,
            _ => 0,
        }
    }

    fn write_msr(&mut self, msr: u32, value: u64) {
        self.msr_writes.push((msr, value));
        if msr == MSR_IA32_FEATURE_CONTROL {
            self.feature_control = value;
        }
    }

    fn write_back_invalidate(&mut self) {
        self.cache_flushes += 1;
    }
}

/// A platform with valid firmware volumes at the default locations.
pub struct TestPlatform {
    pub channel: MockChannel,
    pub cpu: MockCpu,
    pub host_bridge: MockHostBridge,
    pub flash: MockFlash,
    pub boot_state: MockBootState,
}

impl TestPlatform {
    fn new(kind: HostBridgeKind, low_memory: u64) -> Self {
        let config = PeiConfig::default();
        let mut flash = MockFlash::default();
        for range in [config.pei_fv, config.dxe_fv] {
            flash.insert_header(range.start(), fv_header(range.len()));
        }
        Self {
            channel: MockChannel::new().with(ConfigItem::LowMemorySize, low_memory),
            cpu: MockCpu::new(),
            host_bridge: MockHostBridge::new(kind.as_raw()),
            flash,
            boot_state: MockBootState { record: None },
        }
    }

    pub fn q35(low_memory: u64) -> Self {
        Self::new(HostBridgeKind::Q35, low_memory)
    }

    pub fn i440fx(low_memory: u64) -> Self {
        Self::new(HostBridgeKind::I440Fx, low_memory)
    }

    pub fn with(mut self, item: ConfigItem, value: u64) -> Self {
        self.channel = self.channel.with(item, value);
        self
    }

    pub fn without(mut self, item: ConfigItem) -> Self {
        self.channel = self.channel.without(item);
        self
    }

    pub fn with_blob(mut self, item: ConfigItem, data: Vec<u8>) -> Self {
        self.channel = self.channel.with_blob(item, data);
        self
    }

    pub fn with_e820(mut self, entries: &[(u64, u64, u32)]) -> Self {
        self.channel = self.channel.with_e820(entries);
        self
    }

    pub fn with_dma(mut self, range: MemoryRange) -> Self {
        self.channel = self.channel.with_dma(range);
        self
    }

    pub fn with_boot_state(mut self, record: BootStateRaw) -> Self {
        self.boot_state.record = Some(record.as_bytes().to_vec());
        self
    }

    pub fn platform(&mut self) -> Platform<'_> {
        Platform {
            channel: &mut self.channel,
            cpu: &mut self.cpu,
            host_bridge: &mut self.host_bridge,
            flash: &mut self.flash,
            boot_state: &mut self.boot_state,
        }
    }

    pub fn run(&mut self, config: &PeiConfig) -> Result<PlatformInfo, PeiError> {
        init_tracing();
        crate::platform_init(&mut self.platform(), config)
    }
}

/// Runs the pipeline on `tp` until the record reaches `target`.
pub fn advance_to(
    tp: &mut TestPlatform,
    config: &PeiConfig,
    target: Phase,
) -> Result<PlatformInfo, PeiError> {
    init_tracing();
    let mut info = PlatformInfo::new();
    crate::advance_to(&mut info, &mut tp.platform(), config, target)?;
    Ok(info)
}
