//! 挂载描述表 (fstab)
//!
//! 启动时按表顺序挂载，单项失败不影响后续项。文本格式每行一项:
//!
//! ```text
//! # <磁盘>     <分区> <类型>    <挂载点>
//! emmc-user    1      vfat      /boot
//! emmc-user    5      auto      /user
//! ```

use super::block::{DeviceHandle, DiskId};
use super::error::{FsError, FsResult};
use super::types::FsType;
use crate::config::MAX_MOUNTS;

/// 挂载描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountDescriptor<'a> {
    pub disk: DiskId,
    /// 分区号，0 为整盘
    pub partition: u8,
    pub fs_type: FsType,
    pub path: &'a str,
}

impl<'a> MountDescriptor<'a> {
    pub const fn new(disk: DiskId, partition: u8, fs_type: FsType, path: &'a str) -> Self {
        Self {
            disk,
            partition,
            fs_type,
            path,
        }
    }

    /// 对应的块设备句柄
    pub const fn device(&self) -> DeviceHandle {
        DeviceHandle::pack(self.disk, self.partition)
    }
}

/// 解析后的挂载表
pub type MountTable<'a> = heapless::Vec<MountDescriptor<'a>, MAX_MOUNTS>;

/// 解析 fstab 文本
///
/// `#` 之后为注释，空行忽略。字段数不对、磁盘名 / 类型未知或挂载点
/// 不是绝对路径时返回 `InvalidArgument`，超过挂载表容量返回 `OutOfMemory`。
pub fn parse(text: &str) -> FsResult<MountTable<'_>> {
    let mut table = MountTable::new();

    for (index, raw) in text.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        let entry = parse_line(line).map_err(|e| {
            crate::log_warn!("fstab line {}: {}", index + 1, e);
            e
        })?;
        table.push(entry).map_err(|_| FsError::OutOfMemory)?;
    }

    Ok(table)
}

fn parse_line(line: &str) -> FsResult<MountDescriptor<'_>> {
    let mut fields = line.split_whitespace();
    let (Some(disk), Some(partition), Some(fs_type), Some(path), None) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return Err(FsError::InvalidArgument);
    };

    let disk = DiskId::from_name(disk).ok_or(FsError::InvalidArgument)?;
    let partition = partition.parse::<u8>().map_err(|_| FsError::InvalidArgument)?;
    let fs_type = FsType::from_name(fs_type).ok_or(FsError::InvalidArgument)?;
    if !path.starts_with('/') {
        return Err(FsError::InvalidArgument);
    }

    Ok(MountDescriptor::new(disk, partition, fs_type, path))
}

/// 内置挂载表
pub mod presets {
    use super::MountDescriptor;
    use crate::fs::block::DiskId;
    use crate::fs::types::FsType;

    const HANDSET: [MountDescriptor<'static>; 4] = [
        MountDescriptor::new(DiskId::EMMC_USER, 1, FsType::Fat, "/boot"),
        MountDescriptor::new(DiskId::EMMC_USER, 2, FsType::Ext4, "/os"),
        MountDescriptor::new(DiskId::EMMC_USER, 5, FsType::Auto, "/user"),
        MountDescriptor::new(DiskId::EMMC_BOOT0, 0, FsType::LittleFs, "/bootloader"),
    ];

    /// 手持设备标准布局: 引导区 (FAT)、系统 (ext4)、用户数据 (自动探测)、
    /// boot0 上的引导程序数据 (littlefs)
    pub fn handset() -> &'static [MountDescriptor<'static>] {
        &HANDSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fstab() {
        let text = "\
# 标准布局
emmc-user   1  vfat      /boot
emmc-user   2  ext4      /os      # 系统分区

emmc-boot0  0  littlefs  /bootloader
";
        let table = parse(text).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table[0], MountDescriptor::new(DiskId::EMMC_USER, 1, FsType::Fat, "/boot"));
        assert_eq!(table[1].path, "/os");
        assert_eq!(table[2].device(), DeviceHandle::whole_disk(DiskId::EMMC_BOOT0));
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        for bad in [
            "emmc-user 1 vfat",
            "emmc-user 1 vfat /boot extra",
            "sdcard 1 vfat /boot",
            "emmc-user 300 vfat /boot",
            "emmc-user 1 ntfs /boot",
            "emmc-user 1 vfat boot",
        ] {
            assert_eq!(parse(bad), Err(FsError::InvalidArgument), "{}", bad);
        }
    }

    #[test]
    fn test_parse_capacity() {
        let mut text = String::new();
        for i in 0..=MAX_MOUNTS {
            text.push_str(&format!("emmc-user {} auto /m{}\n", i + 1, i));
        }
        assert_eq!(parse(&text), Err(FsError::OutOfMemory));
    }

    #[test]
    fn test_handset_preset() {
        let table = presets::handset();
        assert_eq!(table.len(), 4);
        assert_eq!(table[2].device(), DeviceHandle::pack(DiskId::EMMC_USER, 5));
        assert_eq!(table[2].fs_type, FsType::Auto);
        assert!(table.iter().all(|d| d.path.starts_with('/')));
    }
}
