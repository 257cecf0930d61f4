//! MBR 分区表扫描
//!
//! 解析 0 号扇区的 MBR 以及 DOS 扩展分区的 EBR 链，生成扁平分区表:
//! - 4 个主分区项位于 0x1BE，每项 16 字节
//! - 扩展分区延后处理，EBR 链上的下一跳相对于链头起始 LBA，
//!   逻辑分区相对于当前 EBR 所在 LBA
//! - 链长上限 [`MAX_EXTENDED_HOPS`]，达到上限时返回 `ScanStatus::Truncated`
//!
//! [`MAX_EXTENDED_HOPS`]: crate::config::MAX_EXTENDED_HOPS

use alloc::vec;
use core::fmt;
use core::ops::Range;

use super::block::{DiskDriver, DiskGeometry};
use super::error::{FsError, FsResult};
use crate::config::{ERASE_TABLE_OFFSET, MAX_EXTENDED_HOPS, MAX_PARTITIONS, SECTOR_SIZE};

/// 引导签名
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// 引导签名偏移
const SIGNATURE_OFFSET: usize = 0x1FE;

/// 分区表偏移
const PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// 单个分区条目大小
const PARTITION_ENTRY_SIZE: usize = 16;

/// 主分区 / EBR 条目数
const ENTRY_SLOTS: usize = 4;

/// 活动分区标志
const ACTIVE_FLAG: u8 = 0x80;

/// 分区类型码
pub mod type_code {
    pub const EMPTY: u8 = 0x00;
    pub const FAT12: u8 = 0x01;
    pub const FAT16_SMALL: u8 = 0x04;
    pub const EXTENDED_CHS: u8 = 0x05;
    pub const FAT16: u8 = 0x06;
    pub const FAT32_CHS: u8 = 0x0B;
    pub const FAT32_LBA: u8 = 0x0C;
    pub const FAT16_LBA: u8 = 0x0E;
    pub const EXTENDED_LBA: u8 = 0x0F;
    /// 固件自定义 littlefs 分区 ('L')
    pub const LITTLEFS: u8 = 0x4C;
    /// Linux 原生 (ext4)
    pub const LINUX: u8 = 0x83;
    pub const EXTENDED_LINUX: u8 = 0x85;

    /// 是否为扩展分区类型
    pub const fn is_extended(code: u8) -> bool {
        matches!(code, EXTENDED_CHS | EXTENDED_LBA | EXTENDED_LINUX)
    }

    /// 是否为 FAT 家族类型
    pub const fn is_fat(code: u8) -> bool {
        matches!(code, FAT12 | FAT16_SMALL | FAT16 | FAT32_CHS | FAT32_LBA | FAT16_LBA)
    }
}

// ===== 小端布局解码 =====

/// 带边界检查的小端只读视图
#[derive(Clone, Copy)]
struct LeBytes<'a>(&'a [u8]);

impl<'a> LeBytes<'a> {
    fn u8_at(&self, offset: usize) -> Option<u8> {
        self.0.get(offset).copied()
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes = self.0.get(offset..offset.checked_add(4)?)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn slice(&self, offset: usize, len: usize) -> Option<LeBytes<'a>> {
        self.0.get(offset..offset.checked_add(len)?).map(LeBytes)
    }
}

/// 一个 16 字节的分区表条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    /// 字节 0: 活动标志 (0x80) | 引导单元 (低 7 位)
    pub status: u8,
    /// 字节 4: 类型码
    pub type_code: u8,
    /// 字节 8-11: 起始 LBA (相对值)
    pub start_lba: u32,
    /// 字节 12-15: 扇区数
    pub sector_count: u32,
}

impl PartitionEntry {
    /// 从原始字节解析分区条目，长度不足 16 字节时返回 None
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let raw = LeBytes(data).slice(0, PARTITION_ENTRY_SIZE)?;
        Some(Self {
            status: raw.u8_at(0)?,
            type_code: raw.u8_at(4)?,
            start_lba: raw.u32_at(8)?,
            sector_count: raw.u32_at(12)?,
        })
    }

    /// 空条目 (类型为 0 或扇区数为 0)
    pub fn is_empty(&self) -> bool {
        self.type_code == type_code::EMPTY || self.sector_count == 0
    }

    pub fn is_extended(&self) -> bool {
        type_code::is_extended(self.type_code)
    }

    pub fn bootable(&self) -> bool {
        self.status & ACTIVE_FLAG != 0
    }

    pub fn boot_unit(&self) -> u8 {
        self.status & !ACTIVE_FLAG
    }
}

/// MBR / EBR 扇区视图
pub struct BootSector<'a> {
    raw: LeBytes<'a>,
}

impl<'a> BootSector<'a> {
    /// 包装扇区数据，长度不足 512 字节时返回 `InvalidArgument`
    pub fn new(bytes: &'a [u8]) -> FsResult<Self> {
        if bytes.len() < SECTOR_SIZE {
            return Err(FsError::InvalidArgument);
        }
        Ok(Self {
            raw: LeBytes(bytes),
        })
    }

    /// 检查 0x55AA 签名
    pub fn has_signature(&self) -> bool {
        self.raw.u8_at(SIGNATURE_OFFSET) == Some(BOOT_SIGNATURE[0])
            && self.raw.u8_at(SIGNATURE_OFFSET + 1) == Some(BOOT_SIGNATURE[1])
    }

    /// 第 `slot` (0..4) 个分区条目
    pub fn entry(&self, slot: usize) -> Option<PartitionEntry> {
        if slot >= ENTRY_SLOTS {
            return None;
        }
        let raw = self
            .raw
            .slice(PARTITION_TABLE_OFFSET + slot * PARTITION_ENTRY_SIZE, PARTITION_ENTRY_SIZE)?;
        PartitionEntry::from_bytes(raw.0)
    }

    /// 厂商擦除块表中 `slot` 对应的值 (扇区数)
    ///
    /// 越界或为 0 时返回 None。
    pub fn erase_block_size(&self, slot: usize) -> Option<u32> {
        if slot >= ENTRY_SLOTS {
            return None;
        }
        self.raw
            .u32_at(ERASE_TABLE_OFFSET + slot * 4)
            .filter(|&size| size != 0)
    }
}

// ===== 分区记录 =====

/// 单个分区描述
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// 逻辑编号 (等于分区表下标，0 为整盘)
    pub logical_num: u8,
    /// MBR 主分区槽位 1..=4，扩展链中的分区和整盘为 0
    pub mbr_num: u8,
    /// 起始扇区 (整盘绝对 LBA)
    pub start_sector: u64,
    /// 扇区数
    pub sector_count: u64,
    /// 活动分区标志
    pub bootable: bool,
    /// 引导单元
    pub boot_unit: u8,
    /// 类型码
    pub type_code: u8,
    /// 擦除块大小 (扇区数)
    pub erase_block_size: Option<u32>,
}

impl Partition {
    /// 0 号整盘槽位
    pub const fn whole_disk(sector_count: u64) -> Self {
        Self {
            logical_num: 0,
            mbr_num: 0,
            start_sector: 0,
            sector_count,
            bootable: false,
            boot_unit: 0,
            type_code: type_code::EMPTY,
            erase_block_size: None,
        }
    }

    /// 结束扇区 (不含)
    pub fn end_sector(&self) -> u64 {
        self.start_sector + self.sector_count
    }

    /// 是否为逻辑分区
    pub fn is_logical(&self) -> bool {
        self.logical_num != 0 && self.mbr_num == 0
    }

    fn overlaps(&self, start: u64, end: u64) -> bool {
        start < self.end_sector() && self.start_sector < end
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("logical", &self.logical_num)
            .field("mbr", &self.mbr_num)
            .field("type", &format_args!("0x{:02X}", self.type_code))
            .field("start", &self.start_sector)
            .field("count", &self.sector_count)
            .field("bootable", &self.bootable)
            .field("erase_block", &self.erase_block_size)
            .finish()
    }
}

/// 单盘分区表 (0 号为整盘)
pub type PartitionList = heapless::Vec<Partition, MAX_PARTITIONS>;

/// 扫描结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum ScanStatus {
    /// 分区表完整扫描
    Complete,
    /// 扩展链达到跳数上限或分区表已满，后续分区未登记
    Truncated,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Truncated => write!(f, "truncated"),
        }
    }
}

// ===== 扫描器 =====

/// 候选分区的处理结果
enum Admit {
    Accepted,
    Skipped,
    TableFull,
}

struct Scanner<'a> {
    driver: &'a mut dyn DiskDriver,
    table: &'a mut PartitionList,
    disk_sectors: u64,
}

impl Scanner<'_> {
    /// 对候选分区做合法性检查后登记
    ///
    /// `base` 为条目起始 LBA 的参照点，`[start, end)` 必须落在 `bounds` 内。
    /// 不合法的候选只记录警告。
    fn admit(
        &mut self,
        entry: &PartitionEntry,
        base: u64,
        bounds: Range<u64>,
        mbr_num: u8,
        erase_block_size: Option<u32>,
    ) -> Admit {
        if entry.is_empty() {
            return Admit::Skipped;
        }

        let start = base + entry.start_lba as u64;
        let count = entry.sector_count as u64;
        let end = start + count;

        if start < bounds.start || end > bounds.end {
            crate::log_warn!(
                "partition type 0x{:02X} at {}+{} outside {}..{}, skipped",
                entry.type_code,
                start,
                count,
                bounds.start,
                bounds.end
            );
            return Admit::Skipped;
        }
        // 0 号整盘槽位不参与重叠检查
        if self.table.iter().skip(1).any(|p| p.overlaps(start, end)) {
            crate::log_warn!(
                "partition type 0x{:02X} at {}+{} overlaps an earlier partition, skipped",
                entry.type_code,
                start,
                count
            );
            return Admit::Skipped;
        }

        let partition = Partition {
            logical_num: self.table.len() as u8,
            mbr_num,
            start_sector: start,
            sector_count: count,
            bootable: entry.bootable(),
            boot_unit: entry.boot_unit(),
            type_code: entry.type_code,
            erase_block_size,
        };
        match self.table.push(partition) {
            Ok(()) => Admit::Accepted,
            Err(_) => {
                crate::log_warn!("partition table full at {} entries", MAX_PARTITIONS);
                Admit::TableFull
            }
        }
    }

    /// 沿 EBR 链遍历一个扩展分区，返回是否被截断
    ///
    /// 逻辑分区必须位于当前 EBR 之后，且不超出扩展分区 `[head, end)`。
    fn walk_extended(&mut self, head: u64, end: u64, sector: &mut [u8]) -> bool {
        let mut ebr_lba = head;
        let mut hops = 0;

        loop {
            if hops == MAX_EXTENDED_HOPS {
                crate::log_warn!(
                    "extended chain at {} exceeds {} hops, truncated",
                    head,
                    MAX_EXTENDED_HOPS
                );
                return true;
            }
            hops += 1;

            if ebr_lba >= self.disk_sectors {
                crate::log_warn!("EBR at {} outside disk, chain ends", ebr_lba);
                return false;
            }
            if let Err(e) = self.driver.read_sectors(ebr_lba, sector) {
                crate::log_warn!("EBR read at {} failed: {}, chain ends", ebr_lba, e);
                return false;
            }
            let ebr = match BootSector::new(sector) {
                Ok(ebr) if ebr.has_signature() => ebr,
                _ => {
                    crate::log_warn!("EBR at {} has no boot signature, chain ends", ebr_lba);
                    return false;
                }
            };

            let mut next = None;
            for slot in 0..ENTRY_SLOTS {
                let Some(entry) = ebr.entry(slot) else {
                    continue;
                };
                if entry.is_empty() {
                    continue;
                }
                if entry.is_extended() {
                    // 下一跳相对于链头
                    if next.is_none() {
                        next = Some(head + entry.start_lba as u64);
                    } else {
                        crate::log_warn!("EBR at {} has extra link in slot {}, ignored", ebr_lba, slot);
                    }
                    continue;
                }
                // 逻辑分区相对于当前 EBR
                let bounds = ebr_lba + 1..end;
                if let Admit::TableFull = self.admit(&entry, ebr_lba, bounds, 0, None) {
                    return true;
                }
            }

            match next {
                Some(lba) => ebr_lba = lba,
                None => return false,
            }
        }
    }
}

/// 扫描磁盘分区表，把发现的分区追加到 `table`
///
/// `table` 的 0 号槽位应已放入整盘记录。缺少引导签名时返回 `Corrupt`；
/// 单个候选分区不合法只会被跳过。
pub fn scan(
    driver: &mut dyn DiskDriver,
    geometry: &DiskGeometry,
    table: &mut PartitionList,
) -> FsResult<ScanStatus> {
    let sector_size = geometry.sector_size as usize;
    if sector_size < SECTOR_SIZE {
        return Err(FsError::InvalidArgument);
    }
    let mut sector = vec![0u8; sector_size];
    driver.read_sectors(0, &mut sector)?;

    let mbr = BootSector::new(&sector)?;
    if !mbr.has_signature() {
        return Err(FsError::Corrupt);
    }

    let mut primaries = [None; ENTRY_SLOTS];
    let mut erase = [None; ENTRY_SLOTS];
    for slot in 0..ENTRY_SLOTS {
        primaries[slot] = mbr.entry(slot);
        erase[slot] = mbr.erase_block_size(slot);
    }

    let mut scanner = Scanner {
        driver,
        table,
        disk_sectors: geometry.sector_count,
    };
    let mut status = ScanStatus::Complete;

    // 主分区先登记，扩展分区延后
    let mut extended = heapless::Vec::<Range<u64>, ENTRY_SLOTS>::new();
    for (slot, entry) in primaries.iter().enumerate() {
        let Some(entry) = entry else { continue };
        if entry.is_empty() {
            continue;
        }
        if entry.is_extended() {
            let head = entry.start_lba as u64;
            let end = (head + entry.sector_count as u64).min(geometry.sector_count);
            let _ = extended.push(head..end);
            continue;
        }
        let bounds = 1..geometry.sector_count;
        if let Admit::TableFull = scanner.admit(entry, 0, bounds, slot as u8 + 1, erase[slot]) {
            return Ok(ScanStatus::Truncated);
        }
    }

    for container in extended {
        if scanner.walk_extended(container.start, container.end, &mut sector) {
            status = ScanStatus::Truncated;
        }
    }

    Ok(status)
}
