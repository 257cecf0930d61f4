//! 内存块设备
//!
//! 用于恢复模式下的 ramdisk 以及主机端测试。通过 [`RamDiskMonitor`]
//! 可以在磁盘交给 `BlockDevices` 之后继续观察 IO 次数、注入硬件故障。

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;

use super::block::{DiskDriver, DiskGeometry, DriverError};

/// 默认擦除组大小 (扇区数)
const DEFAULT_ERASE_GROUP: u32 = 1024;

#[derive(Default)]
struct Counters {
    reads: Cell<u32>,
    writes: Cell<u32>,
    failing: Cell<bool>,
}

/// RamDisk 的共享观察句柄
#[derive(Clone)]
pub struct RamDiskMonitor {
    counters: Rc<Counters>,
}

impl RamDiskMonitor {
    /// 驱动读取次数
    pub fn read_count(&self) -> u32 {
        self.counters.reads.get()
    }

    /// 驱动写入次数
    pub fn write_count(&self) -> u32 {
        self.counters.writes.get()
    }

    /// 驱动 IO 总次数
    pub fn io_count(&self) -> u32 {
        self.read_count() + self.write_count()
    }

    /// 注入 / 解除硬件故障
    pub fn set_failing(&self, failing: bool) {
        self.counters.failing.set(failing);
    }
}

/// 内存中的磁盘
pub struct RamDisk {
    data: Vec<u8>,
    sector_size: u32,
    erase_group_size: u32,
    counters: Rc<Counters>,
}

impl RamDisk {
    /// 创建全零磁盘
    pub fn new(sector_count: u64, sector_size: u32) -> Self {
        let len = sector_count as usize * sector_size as usize;
        Self::from_image(vec![0u8; len], sector_size)
    }

    /// 从磁盘镜像创建，尾部不足一个扇区的字节被忽略
    pub fn from_image(data: Vec<u8>, sector_size: u32) -> Self {
        Self {
            data,
            sector_size,
            erase_group_size: DEFAULT_ERASE_GROUP,
            counters: Rc::new(Counters::default()),
        }
    }

    /// 设置擦除组大小
    pub fn with_erase_group(mut self, sectors: u32) -> Self {
        self.erase_group_size = sectors;
        self
    }

    /// 获取观察句柄
    pub fn monitor(&self) -> RamDiskMonitor {
        RamDiskMonitor {
            counters: self.counters.clone(),
        }
    }

    /// 磁盘镜像
    pub fn image(&self) -> &[u8] {
        &self.data
    }

    fn sector_count(&self) -> u64 {
        self.data
            .len()
            .checked_div(self.sector_size as usize)
            .unwrap_or(0) as u64
    }

    fn span(&self, lba: u64, len: usize) -> Result<core::ops::Range<usize>, DriverError> {
        if self.counters.failing.get() {
            return Err(DriverError::Hardware);
        }
        let start = usize::try_from(lba)
            .ok()
            .and_then(|lba| lba.checked_mul(self.sector_size as usize))
            .ok_or(DriverError::Hardware)?;
        let end = start.checked_add(len).ok_or(DriverError::Hardware)?;
        if end > self.data.len() {
            return Err(DriverError::Hardware);
        }
        Ok(start..end)
    }
}

impl DiskDriver for RamDisk {
    fn geometry(&mut self) -> Result<DiskGeometry, DriverError> {
        if self.counters.failing.get() || self.sector_size == 0 {
            return Err(DriverError::NotReady);
        }
        Ok(DiskGeometry {
            sector_size: self.sector_size,
            sector_count: self.sector_count(),
            erase_group_size: self.erase_group_size,
        })
    }

    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DriverError> {
        self.counters.reads.set(self.counters.reads.get() + 1);
        let range = self.span(lba, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: u64, buf: &[u8]) -> Result<(), DriverError> {
        self.counters.writes.set(self.counters.writes.get() + 1);
        let range = self.span(lba, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}
