//! 文件系统后端能力接口
//!
//! FAT / littlefs / ext4 的具体实现位于本 crate 之外，通过 [`FilesystemBackend`]
//! 接入 VFS。每个入口都有默认实现返回 `NotSupported`，后端只需覆盖自己支持的操作。
//!
//! 所有路径参数都是挂载点内的相对路径，总以 `/` 开头 (挂载点根目录为 `/`)。
//! 每次调用都会拿到块设备层的可变引用，后端通过挂载点记录中的设备句柄访问存储。

use super::block::{BlockDevices, DeviceHandle};
use super::error::{FsError, FsResult};
use super::types::{
    DirEntry, DirHandle, FileHandle, MountData, OpenOptions, SeekFrom, Stat, StatVfs,
};
use super::vfs::MountPoint;

/// 文件系统后端
#[allow(unused_variables)]
pub trait FilesystemBackend {
    /// 后端名称 (日志使用)
    fn name(&self) -> &'static str;

    /// 检查设备上是否为本后端的文件系统 (自动探测时调用)
    fn probe(&mut self, io: &mut BlockDevices, device: DeviceHandle) -> bool {
        false
    }

    // ===== 挂载 =====

    /// 挂载，返回后端私有数据 (保存在挂载点记录中)
    fn mount(&mut self, io: &mut BlockDevices, mount: &MountPoint) -> FsResult<MountData> {
        Err(FsError::NotSupported)
    }

    fn unmount(&mut self, io: &mut BlockDevices, mount: &MountPoint) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    // ===== 文件操作 =====

    fn open(
        &mut self,
        io: &mut BlockDevices,
        mount: &MountPoint,
        path: &str,
        options: OpenOptions,
    ) -> FsResult<FileHandle> {
        Err(FsError::NotSupported)
    }

    fn read(
        &mut self,
        io: &mut BlockDevices,
        mount: &MountPoint,
        file: FileHandle,
        buf: &mut [u8],
    ) -> FsResult<usize> {
        Err(FsError::NotSupported)
    }

    fn write(
        &mut self,
        io: &mut BlockDevices,
        mount: &MountPoint,
        file: FileHandle,
        buf: &[u8],
    ) -> FsResult<usize> {
        Err(FsError::NotSupported)
    }

    fn seek(
        &mut self,
        io: &mut BlockDevices,
        mount: &MountPoint,
        file: FileHandle,
        pos: SeekFrom,
    ) -> FsResult<u64> {
        Err(FsError::NotSupported)
    }

    fn tell(&mut self, io: &mut BlockDevices, mount: &MountPoint, file: FileHandle) -> FsResult<u64> {
        Err(FsError::NotSupported)
    }

    fn truncate(
        &mut self,
        io: &mut BlockDevices,
        mount: &MountPoint,
        file: FileHandle,
        len: u64,
    ) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn sync(&mut self, io: &mut BlockDevices, mount: &MountPoint, file: FileHandle) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn close(&mut self, io: &mut BlockDevices, mount: &MountPoint, file: FileHandle) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    // ===== 目录操作 =====

    fn opendir(&mut self, io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<DirHandle> {
        Err(FsError::NotSupported)
    }

    /// 读取下一个目录项，目录结束时返回 `Ok(None)`
    fn readdir(
        &mut self,
        io: &mut BlockDevices,
        mount: &MountPoint,
        dir: DirHandle,
    ) -> FsResult<Option<DirEntry>> {
        Err(FsError::NotSupported)
    }

    fn closedir(&mut self, io: &mut BlockDevices, mount: &MountPoint, dir: DirHandle) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    // ===== 元数据操作 =====

    fn unlink(&mut self, io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn rename(&mut self, io: &mut BlockDevices, mount: &MountPoint, from: &str, to: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn mkdir(&mut self, io: &mut BlockDevices, mount: &MountPoint, path: &str, mode: u32) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn rmdir(&mut self, io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn stat(&mut self, io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<Stat> {
        Err(FsError::NotSupported)
    }

    fn statvfs(&mut self, io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<StatVfs> {
        Err(FsError::NotSupported)
    }

    fn chmod(&mut self, io: &mut BlockDevices, mount: &MountPoint, path: &str, mode: u32) -> FsResult<()> {
        Err(FsError::NotSupported)
    }
}
