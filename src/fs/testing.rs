//! 测试辅助: 磁盘镜像构造器与内存文件系统后端

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use super::backend::FilesystemBackend;
use super::block::{BlockDevices, DeviceHandle, DiskId};
use super::error::{FsError, FsResult};
use super::partition::type_code;
use super::ramdisk::RamDisk;
use super::types::{
    DirEntry, DirHandle, FileHandle, FileKind, MountData, OpenOptions, SeekFrom, Stat, StatVfs,
};
use super::vfs::{MountPoint, Storage};
use crate::config::{ERASE_TABLE_OFFSET, MAX_NAME_LEN};

const SECTOR: usize = 512;

// ===== 磁盘镜像 =====

/// 按扇区拼装 MBR / EBR 的磁盘镜像 (512 字节扇区)
pub struct DiskImage {
    data: Vec<u8>,
}

impl DiskImage {
    pub fn new(sectors: u64) -> Self {
        Self {
            data: vec![0u8; sectors as usize * SECTOR],
        }
    }

    fn sector_mut(&mut self, lba: u64) -> &mut [u8] {
        let start = lba as usize * SECTOR;
        &mut self.data[start..start + SECTOR]
    }

    /// 写入 `lba` 扇区中第 `slot` 个分区表项
    pub fn entry(&mut self, lba: u64, slot: usize, status: u8, type_code: u8, start: u32, count: u32) {
        let offset = 0x1BE + slot * 16;
        let sector = self.sector_mut(lba);
        sector[offset] = status;
        sector[offset + 4] = type_code;
        sector[offset + 8..offset + 12].copy_from_slice(&start.to_le_bytes());
        sector[offset + 12..offset + 16].copy_from_slice(&count.to_le_bytes());
    }

    /// 写入 0x55AA 引导签名
    pub fn sign(&mut self, lba: u64) {
        let sector = self.sector_mut(lba);
        sector[0x1FE] = 0x55;
        sector[0x1FF] = 0xAA;
    }

    /// 写入擦除块大小表
    pub fn erase_table(&mut self, lba: u64, values: [u32; 4]) {
        let sector = self.sector_mut(lba);
        for (slot, value) in values.iter().enumerate() {
            let offset = ERASE_TABLE_OFFSET + slot * 4;
            sector[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn into_ramdisk(self) -> RamDisk {
        RamDisk::from_image(self.data, SECTOR as u32).with_erase_group(1024)
    }
}

/// 手持设备 eMMC 用户区布局
///
/// - p1 FAT32   2048 +8192
/// - p2 Linux   10240 +16384
/// - 扩展分区   32768 +32768，内含 p3 / p4 (Linux) 与 p5 (littlefs)
pub fn handset_image() -> DiskImage {
    let head = 32768u64;
    let mut image = DiskImage::new(65536);
    image.entry(0, 0, 0x80, type_code::FAT32_LBA, 2048, 8192);
    image.entry(0, 1, 0x00, type_code::LINUX, 10240, 16384);
    image.entry(0, 2, 0x00, type_code::EXTENDED_LBA, head as u32, 32768);
    image.sign(0);

    let logical = [
        (0u64, type_code::LINUX, 4096u32),
        (8192, type_code::LINUX, 4096),
        (16384, type_code::LITTLEFS, 8192),
    ];
    for (i, (offset, code, count)) in logical.iter().enumerate() {
        let ebr = head + offset;
        image.entry(ebr, 0, 0, *code, 64, *count);
        if let Some((next, _, _)) = logical.get(i + 1) {
            image.entry(ebr, 1, 0, type_code::EXTENDED_LBA, *next as u32, 8192);
        }
        image.sign(ebr);
    }
    image
}

/// 已初始化的存储上下文: eMMC 用户区 (分区) + boot0 (整盘)
pub fn handset_storage() -> Storage {
    let mut blocks = BlockDevices::new();
    blocks
        .add_disk(DiskId::EMMC_USER, Box::new(handset_image().into_ramdisk()), true)
        .unwrap();
    blocks
        .add_disk(DiskId::EMMC_BOOT0, Box::new(RamDisk::new(1024, SECTOR as u32)), false)
        .unwrap();
    let mut storage = Storage::new(blocks);
    storage.initialize().unwrap();
    storage
}

// ===== 内存文件系统 =====

type Key = (u32, String);

struct OpenMemFile {
    key: Key,
    pos: u64,
    append: bool,
}

#[derive(Default)]
struct MemFsState {
    calls: Vec<String>,
    files: BTreeMap<Key, Vec<u8>>,
    dirs: BTreeSet<Key>,
    modes: BTreeMap<Key, u32>,
    open_files: BTreeMap<u32, OpenMemFile>,
    open_dirs: BTreeMap<u32, VecDeque<DirEntry>>,
    mounted: BTreeSet<u32>,
    next_id: u32,
    fail_mount: Option<FsError>,
    fail_unmount: bool,
    fail_close: bool,
    dot_entries: bool,
}

impl MemFsState {
    fn alloc(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

fn key(mount: &MountPoint, path: &str) -> Key {
    (mount.data().0, path.to_string())
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

fn leaf(path: &str) -> &str {
    &path[path.rfind('/').map_or(0, |index| index + 1)..]
}

/// 记录调用的内存文件系统后端
///
/// 克隆体共享状态，测试保留一份克隆用于观察。
#[derive(Clone)]
pub struct MemFs {
    name: &'static str,
    signature: Option<&'static [u8]>,
    state: Rc<RefCell<MemFsState>>,
}

impl MemFs {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            signature: None,
            state: Rc::new(RefCell::new(MemFsState::default())),
        }
    }

    /// 探测时在设备 0 号扇区开头查找该签名
    pub fn with_signature(mut self, signature: &'static [u8]) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// 当前挂载数
    pub fn mounted(&self) -> usize {
        self.state.borrow().mounted.len()
    }

    /// 任一挂载中该相对路径的文件内容
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.borrow();
        state
            .files
            .iter()
            .find(|((_, p), _)| p == path)
            .map(|(_, data)| data.clone())
    }

    pub fn open_files(&self) -> usize {
        self.state.borrow().open_files.len()
    }

    pub fn open_dirs(&self) -> usize {
        self.state.borrow().open_dirs.len()
    }

    pub fn set_fail_mount(&self, error: Option<FsError>) {
        self.state.borrow_mut().fail_mount = error;
    }

    pub fn set_fail_unmount(&self, fail: bool) {
        self.state.borrow_mut().fail_unmount = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.state.borrow_mut().fail_close = fail;
    }

    /// readdir 是否返回 `.` 与 `..`
    pub fn set_dot_entries(&self, enabled: bool) {
        self.state.borrow_mut().dot_entries = enabled;
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl FilesystemBackend for MemFs {
    fn name(&self) -> &'static str {
        self.name
    }

    fn probe(&mut self, io: &mut BlockDevices, device: DeviceHandle) -> bool {
        let Some(signature) = self.signature else {
            return false;
        };
        let Ok(info) = io.info(device) else {
            return false;
        };
        let mut sector = vec![0u8; info.sector_size as usize];
        io.read(device, 0, &mut sector).is_ok() && sector.starts_with(signature)
    }

    fn mount(&mut self, io: &mut BlockDevices, mount: &MountPoint) -> FsResult<MountData> {
        self.record(format!("mount {}", mount.path()));
        let state = &mut *self.state.borrow_mut();
        if let Some(e) = state.fail_mount {
            return Err(e);
        }
        io.info(mount.device())?;
        let id = state.alloc();
        state.mounted.insert(id);
        state.dirs.insert((id, "/".to_string()));
        Ok(MountData(id))
    }

    fn unmount(&mut self, _io: &mut BlockDevices, mount: &MountPoint) -> FsResult<()> {
        self.record(format!("unmount {}", mount.path()));
        let state = &mut *self.state.borrow_mut();
        if state.fail_unmount {
            return Err(FsError::IoError);
        }
        state.mounted.remove(&mount.data().0);
        Ok(())
    }

    fn open(
        &mut self,
        _io: &mut BlockDevices,
        mount: &MountPoint,
        path: &str,
        options: OpenOptions,
    ) -> FsResult<FileHandle> {
        self.record(format!("open {}", path));
        let state = &mut *self.state.borrow_mut();
        let key = key(mount, path);
        if state.dirs.contains(&key) {
            return Err(FsError::InvalidArgument);
        }
        let exists = state.files.contains_key(&key);
        if !exists && !(options.create || options.create_new) {
            return Err(FsError::NotFound);
        }
        if exists && options.create_new {
            return Err(FsError::AlreadyExists);
        }
        if !exists || options.truncate {
            state.files.insert(key.clone(), Vec::new());
        }
        let id = state.alloc();
        state.open_files.insert(
            id,
            OpenMemFile {
                key,
                pos: 0,
                append: options.append,
            },
        );
        Ok(FileHandle(id))
    }

    fn read(
        &mut self,
        _io: &mut BlockDevices,
        _mount: &MountPoint,
        file: FileHandle,
        buf: &mut [u8],
    ) -> FsResult<usize> {
        let state = &mut *self.state.borrow_mut();
        let open = state.open_files.get_mut(&file.0).ok_or(FsError::BadFileDescriptor)?;
        let data = state.files.get(&open.key).ok_or(FsError::NotFound)?;
        let start = (open.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        open.pos += n as u64;
        Ok(n)
    }

    fn write(
        &mut self,
        _io: &mut BlockDevices,
        _mount: &MountPoint,
        file: FileHandle,
        buf: &[u8],
    ) -> FsResult<usize> {
        let state = &mut *self.state.borrow_mut();
        let open = state.open_files.get_mut(&file.0).ok_or(FsError::BadFileDescriptor)?;
        let data = state.files.get_mut(&open.key).ok_or(FsError::NotFound)?;
        if open.append {
            open.pos = data.len() as u64;
        }
        let start = open.pos as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        open.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(
        &mut self,
        _io: &mut BlockDevices,
        _mount: &MountPoint,
        file: FileHandle,
        pos: SeekFrom,
    ) -> FsResult<u64> {
        let state = &mut *self.state.borrow_mut();
        let open = state.open_files.get_mut(&file.0).ok_or(FsError::BadFileDescriptor)?;
        let len = state.files.get(&open.key).map_or(0, |d| d.len()) as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => open.pos as i64 + delta,
        };
        if target < 0 {
            return Err(FsError::InvalidArgument);
        }
        open.pos = target as u64;
        Ok(open.pos)
    }

    fn tell(&mut self, _io: &mut BlockDevices, _mount: &MountPoint, file: FileHandle) -> FsResult<u64> {
        let state = self.state.borrow();
        state
            .open_files
            .get(&file.0)
            .map(|open| open.pos)
            .ok_or(FsError::BadFileDescriptor)
    }

    fn truncate(
        &mut self,
        _io: &mut BlockDevices,
        _mount: &MountPoint,
        file: FileHandle,
        len: u64,
    ) -> FsResult<()> {
        let state = &mut *self.state.borrow_mut();
        let open = state.open_files.get(&file.0).ok_or(FsError::BadFileDescriptor)?;
        let data = state.files.get_mut(&open.key).ok_or(FsError::NotFound)?;
        data.resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self, _io: &mut BlockDevices, _mount: &MountPoint, file: FileHandle) -> FsResult<()> {
        if self.state.borrow().open_files.contains_key(&file.0) {
            Ok(())
        } else {
            Err(FsError::BadFileDescriptor)
        }
    }

    fn close(&mut self, _io: &mut BlockDevices, _mount: &MountPoint, file: FileHandle) -> FsResult<()> {
        self.record("close".to_string());
        let state = &mut *self.state.borrow_mut();
        state.open_files.remove(&file.0).ok_or(FsError::BadFileDescriptor)?;
        if state.fail_close {
            return Err(FsError::IoError);
        }
        Ok(())
    }

    fn opendir(&mut self, _io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<DirHandle> {
        self.record(format!("opendir {}", path));
        let state = &mut *self.state.borrow_mut();
        let dir = key(mount, path);
        if !state.dirs.contains(&dir) {
            return Err(FsError::NotFound);
        }

        let mut entries = VecDeque::new();
        if state.dot_entries {
            for dot in [".", ".."] {
                entries.extend(DirEntry::new(dot, FileKind::Directory, None));
            }
        }
        for (id, child) in state.dirs.iter() {
            if *id == dir.0 && child != path && parent(child) == path {
                entries.extend(DirEntry::new(leaf(child), FileKind::Directory, None));
            }
        }
        for ((id, child), data) in state.files.iter() {
            if *id == dir.0 && parent(child) == path {
                entries.extend(DirEntry::new(leaf(child), FileKind::Regular, Some(data.len() as u64)));
            }
        }

        let handle = state.alloc();
        state.open_dirs.insert(handle, entries);
        Ok(DirHandle(handle))
    }

    fn readdir(
        &mut self,
        _io: &mut BlockDevices,
        _mount: &MountPoint,
        dir: DirHandle,
    ) -> FsResult<Option<DirEntry>> {
        let mut state = self.state.borrow_mut();
        let entries = state.open_dirs.get_mut(&dir.0).ok_or(FsError::BadFileDescriptor)?;
        Ok(entries.pop_front())
    }

    fn closedir(&mut self, _io: &mut BlockDevices, _mount: &MountPoint, dir: DirHandle) -> FsResult<()> {
        self.state
            .borrow_mut()
            .open_dirs
            .remove(&dir.0)
            .map(|_| ())
            .ok_or(FsError::BadFileDescriptor)
    }

    fn unlink(&mut self, _io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<()> {
        self.record(format!("unlink {}", path));
        self.state
            .borrow_mut()
            .files
            .remove(&key(mount, path))
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }

    fn rename(&mut self, _io: &mut BlockDevices, mount: &MountPoint, from: &str, to: &str) -> FsResult<()> {
        self.record(format!("rename {} {}", from, to));
        let state = &mut *self.state.borrow_mut();
        let data = state.files.remove(&key(mount, from)).ok_or(FsError::NotFound)?;
        state.files.insert(key(mount, to), data);
        Ok(())
    }

    fn mkdir(&mut self, _io: &mut BlockDevices, mount: &MountPoint, path: &str, mode: u32) -> FsResult<()> {
        self.record(format!("mkdir {}", path));
        let state = &mut *self.state.borrow_mut();
        let dir = key(mount, path);
        if state.dirs.contains(&dir) || state.files.contains_key(&dir) {
            return Err(FsError::AlreadyExists);
        }
        state.modes.insert(dir.clone(), mode & 0o7777);
        state.dirs.insert(dir);
        Ok(())
    }

    fn rmdir(&mut self, _io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<()> {
        self.record(format!("rmdir {}", path));
        let removed = self.state.borrow_mut().dirs.remove(&key(mount, path));
        if removed {
            Ok(())
        } else {
            Err(FsError::NotFound)
        }
    }

    fn stat(&mut self, _io: &mut BlockDevices, mount: &MountPoint, path: &str) -> FsResult<Stat> {
        let state = self.state.borrow();
        let target = key(mount, path);
        let (kind, size, default_mode) = if let Some(data) = state.files.get(&target) {
            (FileKind::Regular, data.len() as u64, 0o644)
        } else if state.dirs.contains(&target) {
            (FileKind::Directory, 0, 0o755)
        } else {
            return Err(FsError::NotFound);
        };
        let perm = state.modes.get(&target).copied().unwrap_or(default_mode);
        Ok(Stat {
            mode: kind.mode_bits() | perm,
            nlink: 1,
            size,
            blksize: SECTOR as u32,
            blocks: size.div_ceil(SECTOR as u64),
            dev: mount.device().raw(),
            ..Stat::default()
        })
    }

    fn statvfs(&mut self, io: &mut BlockDevices, mount: &MountPoint, _path: &str) -> FsResult<StatVfs> {
        let info = io.info(mount.device())?;
        Ok(StatVfs {
            block_size: info.sector_size,
            fragment_size: info.sector_size,
            blocks: info.sector_count,
            blocks_free: info.sector_count,
            blocks_avail: info.sector_count,
            name_max: MAX_NAME_LEN as u32,
            ..StatVfs::default()
        })
    }

    fn chmod(&mut self, _io: &mut BlockDevices, mount: &MountPoint, path: &str, mode: u32) -> FsResult<()> {
        let state = &mut *self.state.borrow_mut();
        let target = key(mount, path);
        if !state.files.contains_key(&target) && !state.dirs.contains(&target) {
            return Err(FsError::NotFound);
        }
        state.modes.insert(target, mode & 0o7777);
        Ok(())
    }
}

/// 只有名称的后端，所有操作都不支持
pub struct MinimalFs;

impl FilesystemBackend for MinimalFs {
    fn name(&self) -> &'static str {
        "minimal"
    }
}

/// 只支持挂载 / 卸载的后端
pub struct MountOnlyFs;

impl FilesystemBackend for MountOnlyFs {
    fn name(&self) -> &'static str {
        "mount-only"
    }

    fn mount(&mut self, _io: &mut BlockDevices, _mount: &MountPoint) -> FsResult<MountData> {
        Ok(MountData::default())
    }

    fn unmount(&mut self, _io: &mut BlockDevices, _mount: &MountPoint) -> FsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::types::mode;

    #[test]
    fn test_handset_layout() {
        let storage = handset_storage();
        let parts = storage
            .blocks()
            .partitions(DeviceHandle::whole_disk(DiskId::EMMC_USER))
            .unwrap();
        assert_eq!(parts.len(), 6);
        assert_eq!(parts[5].type_code, type_code::LITTLEFS);
        assert_eq!(parts[5].start_sector, 32768 + 16384 + 64);
        assert_eq!(mode::S_IFREG, FileKind::Regular.mode_bits());
    }
}
