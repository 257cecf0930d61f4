//! VFS 公共类型
//!
//! 文件系统类型标签、目录项、stat 记录、打开选项以及后端私有句柄。

use core::fmt;

use super::partition::type_code;
use crate::config::MAX_NAME_LEN;

/// 文件系统类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FsType {
    /// FAT12/16/32
    Fat,
    /// littlefs
    LittleFs,
    /// ext4
    Ext4,
    /// 挂载时自动探测
    Auto,
}

impl FsType {
    /// 根据分区类型码推测文件系统
    pub fn from_type_code(code: u8) -> Option<Self> {
        match code {
            c if type_code::is_fat(c) => Some(Self::Fat),
            type_code::LITTLEFS => Some(Self::LittleFs),
            type_code::LINUX => Some(Self::Ext4),
            _ => None,
        }
    }

    /// fstab 中使用的名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fat => "vfat",
            Self::LittleFs => "littlefs",
            Self::Ext4 => "ext4",
            Self::Auto => "auto",
        }
    }

    /// 按 fstab 名称解析
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "vfat" | "fat" => Some(Self::Fat),
            "littlefs" | "lfs" => Some(Self::LittleFs),
            "ext4" => Some(Self::Ext4),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ===== 句柄 =====

/// 挂载点唯一标识，卸载后不会被复用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountId(pub(crate) u32);

/// 后端挂载时返回的私有数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountData(pub u32);

/// 后端私有的文件句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(pub u32);

/// 后端私有的目录句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirHandle(pub u32);

// ===== 目录项 / 元数据 =====

/// 文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// 普通文件
    Regular,
    /// 目录
    Directory,
    /// 字符设备
    Character,
    /// 块设备
    Block,
    /// 命名管道
    Fifo,
    /// 套接字
    Socket,
}

/// `st_mode` 类型位
pub mod mode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFSOCK: u32 = 0o140000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFBLK: u32 = 0o060000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFCHR: u32 = 0o020000;
    pub const S_IFIFO: u32 = 0o010000;
}

impl FileKind {
    /// 对应的 `st_mode` 类型位
    pub const fn mode_bits(self) -> u32 {
        match self {
            Self::Regular => mode::S_IFREG,
            Self::Directory => mode::S_IFDIR,
            Self::Character => mode::S_IFCHR,
            Self::Block => mode::S_IFBLK,
            Self::Fifo => mode::S_IFIFO,
            Self::Socket => mode::S_IFSOCK,
        }
    }

    /// 从 `st_mode` 解析类型
    pub const fn from_mode(bits: u32) -> Option<Self> {
        match bits & mode::S_IFMT {
            mode::S_IFREG => Some(Self::Regular),
            mode::S_IFDIR => Some(Self::Directory),
            mode::S_IFCHR => Some(Self::Character),
            mode::S_IFBLK => Some(Self::Block),
            mode::S_IFIFO => Some(Self::Fifo),
            mode::S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }
}

/// 目录项名称
pub type EntryName = heapless::String<MAX_NAME_LEN>;

/// 目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 名称
    pub name: EntryName,
    /// 类型
    pub kind: FileKind,
    /// 大小 (后端未提供时为 None)
    pub size: Option<u64>,
}

impl DirEntry {
    /// 创建目录项，名称超长时返回 None
    pub fn new(name: &str, kind: FileKind, size: Option<u64>) -> Option<Self> {
        let mut entry_name = EntryName::new();
        entry_name.push_str(name).ok()?;
        Some(Self {
            name: entry_name,
            kind,
            size,
        })
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, FileKind::Directory)
    }

    /// `.` 或 `..` 目录项
    pub fn is_dot(&self) -> bool {
        self.is_dir() && (self.name == "." || self.name == "..")
    }
}

/// stat 记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// inode 号
    pub ino: u64,
    /// 类型位 | 权限位
    pub mode: u32,
    /// 硬链接数
    pub nlink: u32,
    /// 属主 (未跟踪时为 0)
    pub uid: u32,
    /// 属组 (未跟踪时为 0)
    pub gid: u32,
    /// 大小 (字节)
    pub size: u64,
    /// 块大小
    pub blksize: u32,
    /// 块数
    pub blocks: u64,
    /// 所在设备
    pub dev: u16,
}

impl Stat {
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }
}

/// statvfs 记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatVfs {
    /// 块大小
    pub block_size: u32,
    /// 片段大小
    pub fragment_size: u32,
    /// 总块数
    pub blocks: u64,
    /// 空闲块数
    pub blocks_free: u64,
    /// 非特权用户可用块数
    pub blocks_avail: u64,
    /// inode 总数
    pub files: u64,
    /// 空闲 inode 数
    pub files_free: u64,
    /// 文件名最大长度
    pub name_max: u32,
}

// ===== 打开选项 =====

/// 文件打开选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// 读取权限
    pub read: bool,
    /// 写入权限
    pub write: bool,
    /// 如果不存在则创建
    pub create: bool,
    /// 创建新文件 (如果存在则失败)
    pub create_new: bool,
    /// 追加模式
    pub append: bool,
    /// 截断文件
    pub truncate: bool,
}

impl OpenOptions {
    /// 创建新的打开选项
    pub const fn new() -> Self {
        Self {
            read: false,
            write: false,
            create: false,
            create_new: false,
            append: false,
            truncate: false,
        }
    }

    pub const fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub const fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub const fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub const fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    pub const fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub const fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// 只读打开
    pub const fn read_only() -> Self {
        Self::new().read(true)
    }

    /// 只写打开 (创建或截断)
    pub const fn write_only() -> Self {
        Self::new().write(true).create(true).truncate(true)
    }

    /// 读写打开
    pub const fn read_write() -> Self {
        Self::new().read(true).write(true)
    }

    /// 追加模式打开
    pub const fn append_mode() -> Self {
        Self::new().write(true).create(true).append(true)
    }
}

/// 文件指针位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// 从文件开头
    Start(u64),
    /// 从文件末尾
    End(i64),
    /// 从当前位置
    Current(i64),
}
