//! 挂载表与 VFS 分发
//!
//! [`Storage`] 是整个存储栈的上下文对象，持有:
//! - 块设备层 ([`BlockDevices`])
//! - 后端注册表 (每种文件系统类型至多一个后端)
//! - 挂载表 (按插入顺序)
//!
//! 路径解析采用带边界检查的最长前缀匹配: 挂载点 `/os` 匹配 `/os` 和 `/os/x`，
//! 但不匹配 `/os2/x`。文件 / 目录句柄只保存挂载点的 [`MountId`]，挂载点卸载后
//! 句柄上的操作返回 `BadFileDescriptor`。

use alloc::boxed::Box;

use super::backend::FilesystemBackend;
use super::block::{BlockDevices, DeviceHandle};
use super::error::{FsError, FsResult};
use super::fstab::MountDescriptor;
use super::types::{
    DirEntry, DirHandle, FileHandle, FileKind, FsType, MountData, MountId, OpenOptions, SeekFrom,
    Stat, StatVfs,
};
use crate::config::{MAX_BACKENDS, MAX_MOUNTS, MAX_MOUNT_PATH_LEN};

/// 挂载路径
pub type MountPath = heapless::String<MAX_MOUNT_PATH_LEN>;

// ===== 挂载点 =====

/// 挂载点记录
#[derive(Debug)]
pub struct MountPoint {
    id: MountId,
    path: MountPath,
    device: DeviceHandle,
    fs_type: FsType,
    data: MountData,
}

impl MountPoint {
    pub fn id(&self) -> MountId {
        self.id
    }

    /// 挂载路径 (以 `/` 开头，不以 `/` 结尾)
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// 存储设备
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    /// 实际使用的文件系统类型 (不会是 `Auto`)
    pub fn fs_type(&self) -> FsType {
        self.fs_type
    }

    /// 后端私有数据
    pub fn data(&self) -> MountData {
        self.data
    }

    /// 挂载路径是否为 `abs` 的前缀，且前缀之后紧跟 `/` 或字符串结束
    fn covers(&self, abs: &str) -> bool {
        let prefix = self.path.as_str();
        abs.starts_with(prefix) && matches!(abs.as_bytes().get(prefix.len()), None | Some(b'/'))
    }

    /// 挂载点内的相对路径，挂载点自身为 `/`
    fn relative<'p>(&self, abs: &'p str) -> &'p str {
        match &abs[self.path.len()..] {
            "" => "/",
            rest => rest,
        }
    }
}

/// 校验挂载路径: 以 `/` 开头、长度大于 1、不以 `/` 结尾、没有空路径段
fn validate_mount_path(path: &str) -> FsResult<MountPath> {
    if !path.starts_with('/') || path.len() <= 1 || path.ends_with('/') || path.contains("//") {
        return Err(FsError::InvalidArgument);
    }
    MountPath::try_from(path).map_err(|_| FsError::InvalidArgument)
}

fn check_absolute(path: &str) -> FsResult<()> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(FsError::InvalidArgument)
    }
}

/// 最长前缀匹配，返回挂载表下标
fn resolve_index(mounts: &[MountPoint], path: &str) -> FsResult<usize> {
    mounts
        .iter()
        .enumerate()
        .filter(|(_, m)| m.covers(path))
        .max_by_key(|(_, m)| m.path.len())
        .map(|(index, _)| index)
        .ok_or(FsError::NotFound)
}

struct BackendSlot {
    fs_type: FsType,
    backend: Box<dyn FilesystemBackend>,
}

fn backend_mut(
    backends: &mut [BackendSlot],
    fs_type: FsType,
) -> FsResult<&mut (dyn FilesystemBackend + 'static)> {
    backends
        .iter_mut()
        .find(|slot| slot.fs_type == fs_type)
        .map(|slot| slot.backend.as_mut())
        .ok_or(FsError::NotFound)
}

fn logged<T>(op: &str, path: &str, result: FsResult<T>) -> FsResult<T> {
    if let Err(e) = &result {
        crate::log_warn!("{} {}: {} ({})", op, path, e, e.errno());
    }
    result
}

// ===== 句柄 =====

/// 打开的文件
///
/// 关闭后 (或所属挂载点卸载后) 句柄失效，不会自动关闭，
/// 需要作用域自动关闭时使用 [`OpenFileGuard`]。
#[derive(Debug)]
pub struct OpenFile {
    handle: FileHandle,
    mount: Option<MountId>,
}

impl OpenFile {
    /// 是否仍处于打开状态
    pub fn is_open(&self) -> bool {
        self.mount.is_some()
    }

    /// 所属挂载点
    pub fn mount_id(&self) -> Option<MountId> {
        self.mount
    }

    /// 后端句柄
    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    fn mount_or_badf(&self) -> FsResult<MountId> {
        self.mount.ok_or(FsError::BadFileDescriptor)
    }
}

#[derive(Debug)]
enum DirState {
    /// 合成的根目录，游标指向挂载表
    Root { cursor: usize },
    Backend { handle: DirHandle, mount: MountId },
    Closed,
}

/// 打开的目录
#[derive(Debug)]
pub struct OpenDir {
    state: DirState,
}

impl OpenDir {
    pub fn is_open(&self) -> bool {
        !matches!(self.state, DirState::Closed)
    }

    /// 是否为合成根目录
    pub fn is_root(&self) -> bool {
        matches!(self.state, DirState::Root { .. })
    }
}

/// fstab 批量挂载结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountSummary {
    /// 成功挂载数
    pub mounted: usize,
    /// 失败数
    pub failed: usize,
    /// 第一个错误
    pub first_error: Option<FsError>,
}

// ===== 存储上下文 =====

/// 存储栈上下文
pub struct Storage {
    blocks: BlockDevices,
    backends: heapless::Vec<BackendSlot, MAX_BACKENDS>,
    mounts: heapless::Vec<MountPoint, MAX_MOUNTS>,
    next_mount_id: u32,
}

impl Storage {
    /// 基于已登记磁盘的块设备层创建上下文
    pub fn new(blocks: BlockDevices) -> Self {
        Self {
            blocks,
            backends: heapless::Vec::new(),
            mounts: heapless::Vec::new(),
            next_mount_id: 1,
        }
    }

    /// 初始化块设备层 (查询几何信息、扫描分区表)
    pub fn initialize(&mut self) -> FsResult<()> {
        self.blocks.initialize()
    }

    pub fn blocks(&self) -> &BlockDevices {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockDevices {
        &mut self.blocks
    }

    // ==================== 后端注册 ====================

    /// 注册文件系统后端
    pub fn register_backend(
        &mut self,
        fs_type: FsType,
        backend: Box<dyn FilesystemBackend>,
    ) -> FsResult<()> {
        let result = self.try_register(fs_type, backend);
        logged("register", fs_type.name(), result)
    }

    fn try_register(&mut self, fs_type: FsType, backend: Box<dyn FilesystemBackend>) -> FsResult<()> {
        if fs_type == FsType::Auto {
            return Err(FsError::InvalidArgument);
        }
        if self.has_backend(fs_type) {
            return Err(FsError::AlreadyExists);
        }
        let name = backend.name();
        self.backends
            .push(BackendSlot { fs_type, backend })
            .map_err(|_| FsError::OutOfMemory)?;
        crate::log_debug!("backend {} registered for {}", name, fs_type);
        Ok(())
    }

    /// 是否已注册该类型的后端
    pub fn has_backend(&self, fs_type: FsType) -> bool {
        self.backends.iter().any(|slot| slot.fs_type == fs_type)
    }

    // ==================== 挂载 ====================

    /// 挂载设备到 `path`
    ///
    /// `FsType::Auto` 时先按分区类型码推测，再依注册顺序调用各后端的 `probe`。
    pub fn mount(&mut self, path: &str, device: DeviceHandle, fs_type: FsType) -> FsResult<()> {
        let result = self.try_mount(path, device, fs_type);
        match &result {
            Ok(fs) => crate::log_info!("mounted {} on {} ({})", device, path, fs),
            Err(e) => crate::log_error!(
                "mount {} on {} ({}) failed: {} ({})",
                device,
                path,
                fs_type,
                e,
                e.errno()
            ),
        }
        result.map(|_| ())
    }

    fn try_mount(&mut self, path: &str, device: DeviceHandle, fs_type: FsType) -> FsResult<FsType> {
        let mount_path = validate_mount_path(path)?;
        if self.mounts.iter().any(|m| m.path() == path) {
            return Err(FsError::Busy);
        }
        if self.mounts.is_full() {
            return Err(FsError::OutOfMemory);
        }
        if fs_type != FsType::Auto && !self.has_backend(fs_type) {
            return Err(FsError::NotFound);
        }
        self.blocks.info(device)?;

        let fs_type = self.select_fs_type(device, fs_type)?;
        let backend = backend_mut(&mut self.backends, fs_type)?;

        let mut mount = MountPoint {
            id: MountId(self.next_mount_id),
            path: mount_path,
            device,
            fs_type,
            data: MountData::default(),
        };
        mount.data = backend.mount(&mut self.blocks, &mount)?;

        self.next_mount_id = self.next_mount_id.wrapping_add(1);
        self.mounts.push(mount).map_err(|_| FsError::OutOfMemory)?;
        Ok(fs_type)
    }

    /// 确定挂载使用的后端类型
    fn select_fs_type(&mut self, device: DeviceHandle, fs_type: FsType) -> FsResult<FsType> {
        if fs_type != FsType::Auto {
            return Ok(fs_type);
        }

        let hint = self
            .blocks
            .partition(device)
            .ok()
            .and_then(|p| FsType::from_type_code(p.type_code));

        // 类型码对应的后端优先探测，其余按注册顺序
        let mut order = heapless::Vec::<usize, MAX_BACKENDS>::new();
        if let Some(first) = hint.and_then(|h| self.backends.iter().position(|s| s.fs_type == h)) {
            let _ = order.push(first);
        }
        for index in 0..self.backends.len() {
            if !order.contains(&index) {
                let _ = order.push(index);
            }
        }

        for index in order {
            let slot = &mut self.backends[index];
            if slot.backend.probe(&mut self.blocks, device) {
                crate::log_debug!("{}: detected {}", device, slot.fs_type);
                return Ok(slot.fs_type);
            }
        }
        Err(FsError::NotFound)
    }

    /// 卸载 `path` 上的挂载点
    ///
    /// 后端卸载失败时挂载点保留，错误原样返回。
    pub fn unmount(&mut self, path: &str) -> FsResult<()> {
        let result = self.try_unmount(path);
        if result.is_ok() {
            crate::log_info!("unmounted {}", path);
        }
        logged("unmount", path, result)
    }

    fn try_unmount(&mut self, path: &str) -> FsResult<()> {
        let index = self
            .mounts
            .iter()
            .position(|m| m.path() == path)
            .ok_or(FsError::NotSupported)?;
        let mount = &self.mounts[index];
        let backend = backend_mut(&mut self.backends, mount.fs_type)?;
        backend.unmount(&mut self.blocks, mount)?;
        self.mounts.remove(index);
        Ok(())
    }

    /// 按 fstab 描述表挂载，单项失败不影响其余项
    pub fn mount_table(&mut self, table: &[MountDescriptor<'_>]) -> MountSummary {
        let mut summary = MountSummary::default();
        for entry in table {
            match self.mount(entry.path, entry.device(), entry.fs_type) {
                Ok(()) => summary.mounted += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary.first_error.get_or_insert(e);
                }
            }
        }
        summary
    }

    /// 关机时卸载全部挂载点
    ///
    /// 按挂载的逆序处理，失败不提前退出；所有挂载点都会从挂载表移除，
    /// 返回第一个错误。
    pub fn unmount_all(&mut self) -> FsResult<()> {
        let mut first_error = None;
        let mut failed = 0usize;

        while let Some(mount) = self.mounts.pop() {
            let result = backend_mut(&mut self.backends, mount.fs_type)
                .and_then(|backend| backend.unmount(&mut self.blocks, &mount));
            if let Err(e) = logged("unmount", mount.path(), result) {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                crate::log_error!("shutdown: {} unmount failures", failed);
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// 解析绝对路径所属的挂载点
    pub fn resolve(&self, path: &str) -> FsResult<&MountPoint> {
        check_absolute(path)?;
        resolve_index(&self.mounts, path).map(|index| &self.mounts[index])
    }

    /// 按序号枚举挂载路径，返回后序号前进；枚举结束返回 `NotFound`
    pub fn list_mounts(&self, index: &mut usize) -> FsResult<&str> {
        let mount = self.mounts.get(*index).ok_or(FsError::NotFound)?;
        *index += 1;
        Ok(mount.path())
    }

    /// 全部挂载点 (挂载顺序)
    pub fn mounts(&self) -> impl Iterator<Item = &MountPoint> + '_ {
        self.mounts.iter()
    }

    // ==================== 分发 ====================

    /// 按路径解析挂载点并调用后端
    fn dispatch_path<T>(
        &mut self,
        path: &str,
        op: impl FnOnce(&mut dyn FilesystemBackend, &mut BlockDevices, &MountPoint, &str) -> FsResult<T>,
    ) -> FsResult<T> {
        check_absolute(path)?;
        let index = resolve_index(&self.mounts, path)?;
        let mount = &self.mounts[index];
        let backend = backend_mut(&mut self.backends, mount.fs_type)?;
        op(backend, &mut self.blocks, mount, mount.relative(path))
    }

    /// 按句柄记录的挂载点调用后端
    fn dispatch_mount<T>(
        &mut self,
        id: MountId,
        op: impl FnOnce(&mut dyn FilesystemBackend, &mut BlockDevices, &MountPoint) -> FsResult<T>,
    ) -> FsResult<T> {
        let mount = self
            .mounts
            .iter()
            .find(|m| m.id == id)
            .ok_or(FsError::BadFileDescriptor)?;
        let backend = backend_mut(&mut self.backends, mount.fs_type)?;
        op(backend, &mut self.blocks, mount)
    }

    fn dispatch_file<T>(
        &mut self,
        op_name: &str,
        file: &OpenFile,
        op: impl FnOnce(&mut dyn FilesystemBackend, &mut BlockDevices, &MountPoint, FileHandle) -> FsResult<T>,
    ) -> FsResult<T> {
        let handle = file.handle;
        let result = file
            .mount_or_badf()
            .and_then(|id| self.dispatch_mount(id, |backend, io, mount| op(backend, io, mount, handle)));
        if let Err(e) = &result {
            crate::log_warn!("{} fd {}: {} ({})", op_name, handle.0, e, e.errno());
        }
        result
    }

    // ==================== 文件操作 ====================

    /// 打开文件
    pub fn open(&mut self, path: &str, options: OpenOptions) -> FsResult<OpenFile> {
        let result = self.dispatch_path(path, |backend, io, mount, rel| {
            backend.open(io, mount, rel, options).map(|handle| OpenFile {
                handle,
                mount: Some(mount.id),
            })
        });
        logged("open", path, result)
    }

    /// 打开文件，返回离开作用域时自动关闭的守卫
    pub fn open_guarded(&mut self, path: &str, options: OpenOptions) -> FsResult<OpenFileGuard<'_>> {
        let file = self.open(path, options)?;
        Ok(OpenFileGuard {
            storage: self,
            file,
        })
    }

    pub fn read(&mut self, file: &OpenFile, buf: &mut [u8]) -> FsResult<usize> {
        self.dispatch_file("read", file, |backend, io, mount, handle| {
            backend.read(io, mount, handle, buf)
        })
    }

    pub fn write(&mut self, file: &OpenFile, buf: &[u8]) -> FsResult<usize> {
        self.dispatch_file("write", file, |backend, io, mount, handle| {
            backend.write(io, mount, handle, buf)
        })
    }

    pub fn seek(&mut self, file: &OpenFile, pos: SeekFrom) -> FsResult<u64> {
        self.dispatch_file("seek", file, |backend, io, mount, handle| {
            backend.seek(io, mount, handle, pos)
        })
    }

    pub fn tell(&mut self, file: &OpenFile) -> FsResult<u64> {
        self.dispatch_file("tell", file, |backend, io, mount, handle| {
            backend.tell(io, mount, handle)
        })
    }

    pub fn truncate(&mut self, file: &OpenFile, len: u64) -> FsResult<()> {
        self.dispatch_file("truncate", file, |backend, io, mount, handle| {
            backend.truncate(io, mount, handle, len)
        })
    }

    pub fn sync(&mut self, file: &OpenFile) -> FsResult<()> {
        self.dispatch_file("sync", file, |backend, io, mount, handle| {
            backend.sync(io, mount, handle)
        })
    }

    /// 关闭文件
    ///
    /// 无论后端是否出错，句柄都会失效；对已关闭的句柄再次关闭直接返回 Ok。
    pub fn close(&mut self, file: &mut OpenFile) -> FsResult<()> {
        if !file.is_open() {
            return Ok(());
        }
        let result = self.dispatch_file("close", file, |backend, io, mount, handle| {
            backend.close(io, mount, handle)
        });
        file.mount = None;
        result
    }

    // ==================== 目录操作 ====================

    /// 打开目录，`/` 为列出全部挂载点的合成根目录
    pub fn opendir(&mut self, path: &str) -> FsResult<OpenDir> {
        if path == "/" {
            return Ok(OpenDir {
                state: DirState::Root { cursor: 0 },
            });
        }
        let result = self.dispatch_path(path, |backend, io, mount, rel| {
            backend.opendir(io, mount, rel).map(|handle| OpenDir {
                state: DirState::Backend {
                    handle,
                    mount: mount.id,
                },
            })
        });
        logged("opendir", path, result)
    }

    /// 读取下一个目录项，目录结束返回 `Ok(None)`
    ///
    /// 后端返回的 `.` / `..` 目录项会被跳过。
    pub fn readdir(&mut self, dir: &mut OpenDir) -> FsResult<Option<DirEntry>> {
        match &mut dir.state {
            DirState::Root { cursor } => {
                let Some(mount) = self.mounts.get(*cursor) else {
                    return Ok(None);
                };
                *cursor += 1;
                DirEntry::new(&mount.path()[1..], FileKind::Directory, None)
                    .map(Some)
                    .ok_or(FsError::InvalidArgument)
            }
            DirState::Backend { handle, mount } => {
                let (handle, id) = (*handle, *mount);
                let result = self.dispatch_mount(id, |backend, io, mount| loop {
                    match backend.readdir(io, mount, handle)? {
                        Some(entry) if entry.is_dot() => continue,
                        other => return Ok(other),
                    }
                });
                if let Err(e) = &result {
                    crate::log_warn!("readdir dir {}: {} ({})", handle.0, e, e.errno());
                }
                result
            }
            DirState::Closed => Err(FsError::BadFileDescriptor),
        }
    }

    /// 关闭目录，与 `close` 语义一致
    pub fn closedir(&mut self, dir: &mut OpenDir) -> FsResult<()> {
        match core::mem::replace(&mut dir.state, DirState::Closed) {
            DirState::Root { .. } | DirState::Closed => Ok(()),
            DirState::Backend { handle, mount } => {
                let result = self.dispatch_mount(mount, |backend, io, mount| {
                    backend.closedir(io, mount, handle)
                });
                if let Err(e) = &result {
                    crate::log_warn!("closedir dir {}: {} ({})", handle.0, e, e.errno());
                }
                result
            }
        }
    }

    // ==================== 元数据操作 ====================

    pub fn mkdir(&mut self, path: &str, mode: u32) -> FsResult<()> {
        let result = self.dispatch_path(path, |backend, io, mount, rel| backend.mkdir(io, mount, rel, mode));
        logged("mkdir", path, result)
    }

    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        let result = self.dispatch_path(path, |backend, io, mount, rel| backend.unlink(io, mount, rel));
        logged("unlink", path, result)
    }

    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        let result = self.dispatch_path(path, |backend, io, mount, rel| backend.rmdir(io, mount, rel));
        logged("rmdir", path, result)
    }

    pub fn stat(&mut self, path: &str) -> FsResult<Stat> {
        let result = self.dispatch_path(path, |backend, io, mount, rel| backend.stat(io, mount, rel));
        logged("stat", path, result)
    }

    pub fn statvfs(&mut self, path: &str) -> FsResult<StatVfs> {
        let result = self.dispatch_path(path, |backend, io, mount, rel| backend.statvfs(io, mount, rel));
        logged("statvfs", path, result)
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> FsResult<()> {
        let result = self.dispatch_path(path, |backend, io, mount, rel| backend.chmod(io, mount, rel, mode));
        logged("chmod", path, result)
    }

    /// 重命名，源和目标必须位于同一挂载点
    pub fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let result = self.try_rename(from, to);
        logged("rename", from, result)
    }

    fn try_rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        check_absolute(from)?;
        check_absolute(to)?;
        let index = resolve_index(&self.mounts, from)?;
        if resolve_index(&self.mounts, to) != Ok(index) {
            crate::log_warn!("rename {} -> {}: crosses mount points", from, to);
            return Err(FsError::InvalidArgument);
        }
        let mount = &self.mounts[index];
        let backend = backend_mut(&mut self.backends, mount.fs_type)?;
        backend.rename(&mut self.blocks, mount, mount.relative(from), mount.relative(to))
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(BlockDevices::new())
    }
}

// ===== 作用域守卫 =====

/// 离开作用域时自动关闭的文件
pub struct OpenFileGuard<'s> {
    storage: &'s mut Storage,
    file: OpenFile,
}

impl OpenFileGuard<'_> {
    pub fn file(&self) -> &OpenFile {
        &self.file
    }

    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.storage.read(&self.file, buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        self.storage.write(&self.file, buf)
    }

    /// 写入全部数据
    pub fn write_all(&mut self, data: &[u8]) -> FsResult<()> {
        let mut offset = 0;
        while offset < data.len() {
            let written = self.write(&data[offset..])?;
            if written == 0 {
                return Err(FsError::IoError);
            }
            offset += written;
        }
        Ok(())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        self.storage.seek(&self.file, pos)
    }

    pub fn tell(&mut self) -> FsResult<u64> {
        self.storage.tell(&self.file)
    }

    pub fn truncate(&mut self, len: u64) -> FsResult<()> {
        self.storage.truncate(&self.file, len)
    }

    pub fn sync(&mut self) -> FsResult<()> {
        self.storage.sync(&self.file)
    }

    /// 显式关闭并取得结果
    pub fn close(mut self) -> FsResult<()> {
        self.storage.close(&mut self.file)
    }
}

impl Drop for OpenFileGuard<'_> {
    fn drop(&mut self) {
        // 错误已在 close 内记录
        let _ = self.storage.close(&mut self.file);
    }
}
