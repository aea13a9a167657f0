// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result};

use crate::{
    defs,
    mount::{MountEntry, VolumeManager, table},
    utils,
};

/// Volume management through `udisksctl` for removable partitions and
/// `mount`/`umount` for loopback images.
pub struct Udisks {
    by_label_dir: PathBuf,
}

impl Udisks {
    pub fn new<P: Into<PathBuf>>(by_label_dir: P) -> Self {
        Self {
            by_label_dir: by_label_dir.into(),
        }
    }
}

/// udev escapes blanks and slashes in by-label link names.
pub fn label_link_name(label: &str) -> String {
    label.replace(' ', "\\x20").replace('/', "\\x2f")
}

/// Follow `<dir>/<label>` if it is a symlink.
pub fn resolve_label(by_label_dir: &Path, label: &str) -> Result<Option<PathBuf>> {
    let link = by_label_dir.join(label_link_name(label));
    match fs::symlink_metadata(&link) {
        Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(&link) {
            Ok(target) => Ok(Some(target)),
            Err(e) => {
                log::debug!("Stale label link {}: {}", link.display(), e);
                Ok(None)
            }
        },
        _ => Ok(None),
    }
}

impl VolumeManager for Udisks {
    fn device_by_label(&self, label: &str) -> Result<Option<PathBuf>> {
        resolve_label(&self.by_label_dir, label)
    }

    fn mounts(&self) -> Result<Vec<MountEntry>> {
        table::read_mounts()
    }

    fn block_device(&self, partition: &str) -> Option<String> {
        let handle = format!(
            "{}{}",
            defs::UDISKS_BLOCK_PREFIX,
            table::partition_name(partition)
        );
        let known = Command::new("udisksctl")
            .args(["info", "-p", &handle])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if known {
            Some(handle)
        } else {
            log::debug!("udisksctl does not know {}", handle);
            None
        }
    }

    fn mount(&self, block_device: &str) -> Result<()> {
        utils::run_checked(Command::new("udisksctl").args(["mount", "-p", block_device]))
            .with_context(|| format!("Failed to mount {block_device} with udisksctl"))?;
        Ok(())
    }

    fn unmount(&self, block_device: &str) -> Result<()> {
        utils::run_checked(Command::new("udisksctl").args(["unmount", "-p", block_device]))
            .with_context(|| format!("Failed to unmount {block_device} with udisksctl"))?;
        Ok(())
    }

    fn loop_mount(&self, image: &Path, target: &Path, fstype: &str) -> Result<()> {
        utils::run_checked(
            utils::privileged("mount")
                .args(["-o", "loop,rw", "-t", fstype])
                .arg(image)
                .arg(target),
        )
        .with_context(|| format!("Failed to mount {} on {}", image.display(), target.display()))?;
        Ok(())
    }

    fn unmount_path(&self, target: &Path) -> Result<()> {
        utils::run_checked(utils::privileged("umount").arg(target))
            .with_context(|| format!("Failed to unmount {}", target.display()))?;
        Ok(())
    }
}
