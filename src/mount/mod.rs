// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod table;
pub mod udisks;

use std::path::{Path, PathBuf};

use anyhow::Result;

pub use table::MountEntry;

/// Everything the provisioner needs from the host's volume management.
///
/// Device arguments accept any of the spellings in use: `sdb1`, `/dev/sdb1`
/// or the udisks object path `block_devices/sdb1`. A whole-disk name such as
/// `sdb` refers to any of its partitions when querying mount state.
pub trait VolumeManager {
    /// Resolve a filesystem label through the by-label symlink directory.
    /// `Ok(None)` when no device carries the label.
    fn device_by_label(&self, label: &str) -> Result<Option<PathBuf>>;

    /// Snapshot of the live mount table.
    fn mounts(&self) -> Result<Vec<MountEntry>>;

    /// udisks handle (`block_devices/<name>`) for a partition, if udisks knows it.
    fn block_device(&self, partition: &str) -> Option<String>;

    fn mount(&self, block_device: &str) -> Result<()>;

    fn unmount(&self, block_device: &str) -> Result<()>;

    /// Loopback mount of a filesystem image.
    fn loop_mount(&self, image: &Path, target: &Path, fstype: &str) -> Result<()>;

    fn unmount_path(&self, target: &Path) -> Result<()>;

    fn mount_point(&self, device: &str) -> Result<Option<PathBuf>> {
        Ok(table::find_mount(&self.mounts()?, device))
    }

    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        Ok(self.mounts()?.iter().any(|m| m.target == path))
    }
}
