//! 存储栈错误类型
//!
//! 块设备、分区扫描和 VFS 共用同一组错误码，对上层呈现 POSIX 风格的负错误码。

use core::fmt;

/// 存储栈错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FsError {
    /// 无效参数 (路径格式、缓冲区长度等)
    InvalidArgument,
    /// 挂载点 / 后端 / 设备 / 文件不存在
    NotFound,
    /// 已存在
    AlreadyExists,
    /// 挂载点被占用
    Busy,
    /// 后端不支持该操作
    NotSupported,
    /// LBA 越界
    OutOfRange,
    /// 硬件 IO 错误
    IoError,
    /// 句柄已关闭或所属挂载已卸载
    BadFileDescriptor,
    /// 固定容量表已满
    OutOfMemory,
    /// 分区表或文件系统结构损坏
    Corrupt,
}

impl FsError {
    /// POSIX 风格负错误码
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => -22,   // EINVAL
            Self::NotFound => -2,           // ENOENT
            Self::AlreadyExists => -17,     // EEXIST
            Self::Busy => -16,              // EBUSY
            Self::NotSupported => -95,      // ENOTSUP
            Self::OutOfRange => -34,        // ERANGE
            Self::IoError => -5,            // EIO
            Self::BadFileDescriptor => -9,  // EBADF
            Self::OutOfMemory => -12,       // ENOMEM
            Self::Corrupt => -117,          // EUCLEAN
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::NotFound => write!(f, "Not found"),
            Self::AlreadyExists => write!(f, "Already exists"),
            Self::Busy => write!(f, "Device or mount busy"),
            Self::NotSupported => write!(f, "Operation not supported"),
            Self::OutOfRange => write!(f, "LBA out of range"),
            Self::IoError => write!(f, "IO error"),
            Self::BadFileDescriptor => write!(f, "Bad file descriptor"),
            Self::OutOfMemory => write!(f, "Table full"),
            Self::Corrupt => write!(f, "Corrupt structure"),
        }
    }
}

/// 存储栈通用结果类型
pub type FsResult<T> = Result<T, FsError>;
