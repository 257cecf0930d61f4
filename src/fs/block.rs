//! eMMC 块设备抽象层
//!
//! 把物理磁盘 (eMMC 用户区 / boot 区) 暴露为按分区寻址的块设备:
//! - `DeviceHandle` = `(磁盘号 << 8) | 分区号`，分区号 0 表示整盘原始访问
//! - 所有 LBA 都是分区内相对地址，读写前做越界检查
//! - 硬件驱动通过 [`DiskDriver`] 接入，失败直接返回 `IoError`，本层不重试

use alloc::boxed::Box;
use alloc::vec;
use core::fmt;

use embedded_storage::{ReadStorage, Storage};

use super::error::{FsError, FsResult};
use super::partition::{self, Partition, PartitionList, ScanStatus};
use crate::config::MAX_DISKS;

// ===== 设备标识 =====

/// 物理磁盘编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct DiskId(pub u8);

impl DiskId {
    /// eMMC 用户数据区
    pub const EMMC_USER: Self = Self(0);
    /// eMMC boot0 硬件分区
    pub const EMMC_BOOT0: Self = Self(1);
    /// eMMC boot1 硬件分区
    pub const EMMC_BOOT1: Self = Self(2);

    /// 磁盘名称 (fstab 使用)
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::EMMC_USER => Some("emmc-user"),
            Self::EMMC_BOOT0 => Some("emmc-boot0"),
            Self::EMMC_BOOT1 => Some("emmc-boot1"),
            _ => None,
        }
    }

    /// 按名称查找磁盘
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "emmc-user" => Some(Self::EMMC_USER),
            "emmc-boot0" => Some(Self::EMMC_BOOT0),
            "emmc-boot1" => Some(Self::EMMC_BOOT1),
            _ => None,
        }
    }
}

impl fmt::Display for DiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "disk{}", self.0),
        }
    }
}

/// 块设备句柄: 高字节为磁盘号，低字节为分区号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct DeviceHandle(u16);

impl DeviceHandle {
    /// 打包磁盘号和分区号
    pub const fn pack(disk: DiskId, partition: u8) -> Self {
        Self(((disk.0 as u16) << 8) | partition as u16)
    }

    /// 整盘原始访问句柄
    pub const fn whole_disk(disk: DiskId) -> Self {
        Self::pack(disk, 0)
    }

    /// 拆分为 (磁盘号, 分区号)
    pub const fn unpack(self) -> (DiskId, u8) {
        (DiskId((self.0 >> 8) as u8), (self.0 & 0xFF) as u8)
    }

    pub const fn disk(self) -> DiskId {
        self.unpack().0
    }

    pub const fn partition(self) -> u8 {
        self.unpack().1
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (disk, partition) = self.unpack();
        write!(f, "{}p{}", disk, partition)
    }
}

// ===== 硬件接口 =====

/// 驱动报告的磁盘几何信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    /// 扇区大小 (字节)
    pub sector_size: u32,
    /// 扇区总数
    pub sector_count: u64,
    /// 擦除组大小 (扇区数)
    pub erase_group_size: u32,
}

/// 驱动层错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum DriverError {
    /// 设备未就绪
    NotReady,
    /// 命令超时
    Timeout,
    /// 数据 CRC 错误
    Crc,
    /// 写保护
    WriteProtected,
    /// 其他硬件错误
    Hardware,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "Device not ready"),
            Self::Timeout => write!(f, "Command timeout"),
            Self::Crc => write!(f, "Data CRC error"),
            Self::WriteProtected => write!(f, "Write protected"),
            Self::Hardware => write!(f, "Hardware error"),
        }
    }
}

impl From<DriverError> for FsError {
    fn from(_: DriverError) -> Self {
        FsError::IoError
    }
}

/// 物理磁盘驱动 (eMMC / SPI 等)
///
/// LBA 为整盘绝对地址，缓冲区长度总是扇区大小的整数倍。
pub trait DiskDriver {
    /// 查询磁盘几何信息
    fn geometry(&mut self) -> Result<DiskGeometry, DriverError>;

    /// 从绝对 LBA 开始读取若干扇区
    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DriverError>;

    /// 从绝对 LBA 开始写入若干扇区
    fn write_sectors(&mut self, lba: u64, buf: &[u8]) -> Result<(), DriverError>;
}

/// 块设备信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDeviceInfo {
    /// 扇区大小 (字节)
    pub sector_size: u32,
    /// 分区扇区数
    pub sector_count: u64,
    /// 磁盘擦除组大小 (扇区数)
    pub erase_group_size: u32,
}

impl BlockDeviceInfo {
    /// 分区总字节数
    pub fn size_bytes(&self) -> u64 {
        self.sector_count * self.sector_size as u64
    }
}

// ===== 磁盘表 =====

struct Disk {
    id: DiskId,
    driver: Box<dyn DiskDriver>,
    partitionable: bool,
    geometry: Option<DiskGeometry>,
    /// 0 号槽位为整盘
    partitions: PartitionList,
    scan: Option<FsResult<ScanStatus>>,
}

impl Disk {
    /// 查询几何信息并扫描分区表
    fn probe(&mut self) -> FsResult<()> {
        self.partitions.clear();
        self.scan = None;
        self.geometry = None;

        let geometry = self.driver.geometry().map_err(|e| {
            crate::log_error!("{}: geometry query failed: {}", self.id, e);
            FsError::from(e)
        })?;
        if geometry.sector_size == 0 {
            return Err(FsError::Corrupt);
        }
        self.geometry = Some(geometry);

        self.partitions
            .push(Partition::whole_disk(geometry.sector_count))
            .map_err(|_| FsError::OutOfMemory)?;

        if !self.partitionable {
            crate::log_info!("{}: {} sectors, raw only", self.id, geometry.sector_count);
            return Ok(());
        }

        let result = partition::scan(self.driver.as_mut(), &geometry, &mut self.partitions);
        self.scan = Some(result);
        match result {
            Ok(status) => {
                crate::log_info!(
                    "{}: {} sectors, {} partitions ({})",
                    self.id,
                    geometry.sector_count,
                    self.partitions.len() - 1,
                    status
                );
                Ok(())
            }
            Err(e) => {
                crate::log_error!("{}: partition scan failed: {} ({})", self.id, e, e.errno());
                Err(e)
            }
        }
    }

    fn sector_size(&self) -> FsResult<u32> {
        self.geometry
            .map(|g| g.sector_size)
            .ok_or(FsError::NotFound)
    }
}

/// 全部物理磁盘的块设备层
pub struct BlockDevices {
    disks: heapless::Vec<Disk, MAX_DISKS>,
}

impl BlockDevices {
    /// 创建空磁盘表
    pub const fn new() -> Self {
        Self {
            disks: heapless::Vec::new(),
        }
    }

    /// 登记一块物理磁盘
    ///
    /// `partitionable` 为 false 的磁盘 (例如 eMMC boot 区) 只提供 0 号整盘访问。
    pub fn add_disk(
        &mut self,
        id: DiskId,
        driver: Box<dyn DiskDriver>,
        partitionable: bool,
    ) -> FsResult<()> {
        if id.0 as usize >= MAX_DISKS {
            return Err(FsError::InvalidArgument);
        }
        if self.disks.iter().any(|d| d.id == id) {
            return Err(FsError::AlreadyExists);
        }
        self.disks
            .push(Disk {
                id,
                driver,
                partitionable,
                geometry: None,
                partitions: PartitionList::new(),
                scan: None,
            })
            .map_err(|_| FsError::OutOfMemory)
    }

    /// 查询所有磁盘几何信息并扫描分区表
    ///
    /// 单块磁盘失败不影响其他磁盘；全部处理完后返回第一个错误。
    /// 扫描失败的磁盘仍可通过 0 号整盘句柄访问。
    pub fn initialize(&mut self) -> FsResult<()> {
        let mut first_error = None;
        for disk in self.disks.iter_mut() {
            if let Err(e) = disk.probe() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 已登记的磁盘
    pub fn disk_ids(&self) -> impl Iterator<Item = DiskId> + '_ {
        self.disks.iter().map(|d| d.id)
    }

    /// 最近一次分区扫描结果 (未扫描或不可分区时为 None)
    pub fn scan_status(&self, disk: DiskId) -> Option<FsResult<ScanStatus>> {
        self.disks.iter().find(|d| d.id == disk).and_then(|d| d.scan)
    }

    /// 磁盘分区表 (0 号为整盘，句柄中的分区号被忽略)
    pub fn partitions(&self, device: DeviceHandle) -> FsResult<&[Partition]> {
        Ok(&self.disk(device.disk())?.partitions)
    }

    /// 句柄指向的分区
    pub fn partition(&self, device: DeviceHandle) -> FsResult<&Partition> {
        self.disk(device.disk())?
            .partitions
            .get(device.partition() as usize)
            .ok_or(FsError::NotFound)
    }

    /// 块设备信息: 扇区大小/数量取自分区，擦除组取自磁盘
    pub fn info(&self, device: DeviceHandle) -> FsResult<BlockDeviceInfo> {
        let disk = self.disk(device.disk())?;
        let geometry = disk.geometry.ok_or(FsError::NotFound)?;
        let partition = disk
            .partitions
            .get(device.partition() as usize)
            .ok_or(FsError::NotFound)?;
        Ok(BlockDeviceInfo {
            sector_size: geometry.sector_size,
            sector_count: partition.sector_count,
            erase_group_size: geometry.erase_group_size,
        })
    }

    /// 读取扇区，扇区数由缓冲区长度决定
    pub fn read(&mut self, device: DeviceHandle, lba: u64, buf: &mut [u8]) -> FsResult<()> {
        let result = self.locate(device, lba, buf.len()).and_then(|(index, abs)| {
            self.disks[index]
                .driver
                .read_sectors(abs, buf)
                .map_err(FsError::from)
        });
        if let Err(e) = result {
            crate::log_error!("read {} lba {} +{}B: {} ({})", device, lba, buf.len(), e, e.errno());
        }
        result
    }

    /// 写入扇区，扇区数由缓冲区长度决定
    pub fn write(&mut self, device: DeviceHandle, lba: u64, buf: &[u8]) -> FsResult<()> {
        let result = self.locate(device, lba, buf.len()).and_then(|(index, abs)| {
            self.disks[index]
                .driver
                .write_sectors(abs, buf)
                .map_err(FsError::from)
        });
        if let Err(e) = result {
            crate::log_error!("write {} lba {} +{}B: {} ({})", device, lba, buf.len(), e, e.errno());
        }
        result
    }

    /// 校验访问范围并换算成整盘绝对 LBA，返回 (磁盘下标, 绝对 LBA)
    fn locate(&self, device: DeviceHandle, lba: u64, len: usize) -> FsResult<(usize, u64)> {
        let index = self
            .disks
            .iter()
            .position(|d| d.id == device.disk())
            .ok_or(FsError::NotFound)?;
        let disk = &self.disks[index];
        let sector_size = disk.sector_size()? as usize;

        if len == 0 || len % sector_size != 0 {
            return Err(FsError::InvalidArgument);
        }
        let count = (len / sector_size) as u64;

        let partition = disk
            .partitions
            .get(device.partition() as usize)
            .ok_or(FsError::NotFound)?;
        let end = lba.checked_add(count).ok_or(FsError::OutOfRange)?;
        if end > partition.sector_count {
            return Err(FsError::OutOfRange);
        }
        Ok((index, partition.start_sector + lba))
    }

    fn disk(&self, id: DiskId) -> FsResult<&Disk> {
        self.disks.iter().find(|d| d.id == id).ok_or(FsError::NotFound)
    }
}

impl Default for BlockDevices {
    fn default() -> Self {
        Self::new()
    }
}

// ===== embedded-storage 适配 =====

/// 单个分区的按字节寻址视图
///
/// 实现 `embedded_storage` 的读写接口，供 littlefs 一类按字节访问的后端使用。
/// 非整扇区写入走 读-改-写。
pub struct PartitionStorage<'a> {
    devices: &'a mut BlockDevices,
    device: DeviceHandle,
    info: BlockDeviceInfo,
}

impl<'a> PartitionStorage<'a> {
    /// 创建分区视图
    pub fn new(devices: &'a mut BlockDevices, device: DeviceHandle) -> FsResult<Self> {
        let info = devices.info(device)?;
        Ok(Self {
            devices,
            device,
            info,
        })
    }

    /// 获取分区信息
    pub fn info(&self) -> &BlockDeviceInfo {
        &self.info
    }

    fn check_range(&self, offset: u32, len: usize) -> FsResult<()> {
        let end = offset as u64 + len as u64;
        if end > self.info.size_bytes() {
            return Err(FsError::OutOfRange);
        }
        Ok(())
    }
}

impl ReadStorage for PartitionStorage<'_> {
    type Error = FsError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        let sector_size = self.info.sector_size as usize;
        let mut sector = vec![0u8; sector_size];

        let mut done = 0;
        while done < bytes.len() {
            let pos = offset as u64 + done as u64;
            let lba = pos / sector_size as u64;
            let within = (pos % sector_size as u64) as usize;
            let chunk = core::cmp::min(sector_size - within, bytes.len() - done);

            self.devices.read(self.device, lba, &mut sector)?;
            bytes[done..done + chunk].copy_from_slice(&sector[within..within + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        usize::try_from(self.info.size_bytes()).unwrap_or(usize::MAX)
    }
}

impl Storage for PartitionStorage<'_> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        let sector_size = self.info.sector_size as usize;
        let mut sector = vec![0u8; sector_size];

        let mut done = 0;
        while done < bytes.len() {
            let pos = offset as u64 + done as u64;
            let lba = pos / sector_size as u64;
            let within = (pos % sector_size as u64) as usize;
            let chunk = core::cmp::min(sector_size - within, bytes.len() - done);

            if chunk == sector_size {
                self.devices.write(self.device, lba, &bytes[done..done + chunk])?;
            } else {
                self.devices.read(self.device, lba, &mut sector)?;
                sector[within..within + chunk].copy_from_slice(&bytes[done..done + chunk]);
                self.devices.write(self.device, lba, &sector)?;
            }
            done += chunk;
        }
        Ok(())
    }
}
