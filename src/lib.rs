//! InkBoot - 电子墨水手持设备 启动/恢复/升级 固件存储栈
//!
//! 本库提供以下核心功能:
//! - eMMC 原始分区块设备抽象 (分区相对寻址、越界检查)
//! - MBR / 扩展分区链扫描
//! - 按挂载点路由的轻量 VFS (FAT / littlefs / ext4 后端通过能力接口接入)
//! - 条件编译日志系统
//!
//! 所有状态都挂在显式的 [`fs::Storage`] 上下文对象里，没有全局注册表。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// defmt 日志经 RTT 输出
#[cfg(feature = "log-defmt")]
use defmt_rtt as _;

pub mod fs;
pub mod util;

// ===== 重导出常用类型 =====
pub use fs::{
    BlockDevices, DeviceHandle, DiskDriver, DiskId, FilesystemBackend, FsError, FsResult, FsType,
    Storage,
};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 存储栈配置常量
pub mod config {
    /// 默认扇区大小 (字节)
    pub const SECTOR_SIZE: usize = 512;

    /// 物理磁盘最大数量 (DeviceHandle 高字节)
    pub const MAX_DISKS: usize = 4;

    /// 每块磁盘的分区表容量 (含 0 号整盘槽位)
    pub const MAX_PARTITIONS: usize = 32;

    /// 扩展分区链最大跳数，防止损坏/环形链表导致死循环
    pub const MAX_EXTENDED_HOPS: usize = 100;

    /// 挂载表容量
    pub const MAX_MOUNTS: usize = 16;

    /// 后端注册表容量 (每种文件系统类型至多一个)
    pub const MAX_BACKENDS: usize = 4;

    /// 挂载路径最大长度 (字节)
    pub const MAX_MOUNT_PATH_LEN: usize = 64;

    /// 目录项名称最大长度 (字节)
    pub const MAX_NAME_LEN: usize = 64;

    /// MBR 扇区中厂商擦除块表的偏移 (4 x u32 LE，每个主分区槽位一项)
    pub const ERASE_TABLE_OFFSET: usize = 0x1A8;
}
