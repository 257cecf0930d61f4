//! 存储栈
//!
//! 自底向上分为:
//! - `block`: eMMC 块设备与分区相对寻址
//! - `partition`: MBR / EBR 分区表扫描
//! - `backend`: 文件系统后端能力接口
//! - `vfs`: 挂载表、路径解析与操作分发
//! - `fstab`: 启动挂载描述表

pub mod backend;
pub mod block;
pub mod error;
pub mod fstab;
pub mod partition;
pub mod ramdisk;
pub mod types;
pub mod vfs;

#[cfg(test)]
mod testing;

pub use backend::FilesystemBackend;
pub use block::{
    BlockDeviceInfo, BlockDevices, DeviceHandle, DiskDriver, DiskGeometry, DiskId, DriverError,
    PartitionStorage,
};
pub use error::{FsError, FsResult};
pub use fstab::MountDescriptor;
pub use partition::{Partition, ScanStatus};
pub use ramdisk::RamDisk;
pub use types::{
    DirEntry, FileKind, FsType, MountData, MountId, OpenOptions, SeekFrom, Stat, StatVfs,
};
pub use vfs::{MountPoint, MountSummary, OpenDir, OpenFile, OpenFileGuard, Storage};
