// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use rustix::fs::{Mode, chmod};

use crate::{
    core::Provisioner,
    defs,
    utils::{self, run_checked},
};

/// File operations on root-owned targets (the device partition and the
/// writable image).
pub trait FileOps {
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()>;
    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;
    fn make_dir(&self, path: &Path) -> Result<()>;
    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> Result<()>;
    fn remove_tree(&self, path: &Path) -> Result<()>;
    fn touch(&self, path: &Path) -> Result<()>;
}

/// Runs `cp`, `chmod`, `mkdir`, ... through `sudo` when not root.
pub struct PrivilegedFiles;

impl FileOps for PrivilegedFiles {
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        run_checked(utils::privileged("cp").arg(src).arg(dst))?;
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        run_checked(utils::privileged("chmod").arg(format!("{mode:o}")).arg(path))?;
        Ok(())
    }

    fn make_dir(&self, path: &Path) -> Result<()> {
        run_checked(utils::privileged("mkdir").arg("-p").arg(path))?;
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        run_checked(utils::privileged("rmdir").arg(path))?;
        Ok(())
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        run_checked(utils::privileged("rm").arg("-rf").arg(path))?;
        Ok(())
    }

    fn touch(&self, path: &Path) -> Result<()> {
        run_checked(utils::privileged("touch").arg(path))?;
        Ok(())
    }
}

/// Direct file operations for when we already hold the needed rights.
pub struct LocalFiles;

impl FileOps for LocalFiles {
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        fs::copy(src, dst)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        chmod(path, Mode::from_raw_mode(mode))
            .with_context(|| format!("Failed to chmod {}", path.display()))?;
        Ok(())
    }

    fn make_dir(&self, path: &Path) -> Result<()> {
        utils::ensure_dir_exists(path)
            .with_context(|| format!("Failed to create {}", path.display()))
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).with_context(|| format!("Failed to rmdir {}", path.display()))
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
            Ok(_) => fs::remove_file(path)?,
            Err(_) => {}
        }
        Ok(())
    }

    fn touch(&self, path: &Path) -> Result<()> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to touch {}", path.display()))?;
        Ok(())
    }
}

impl Provisioner<'_> {
    /// Install the preseed/kickstart files on the partition root and the
    /// syslinux menus under `syslinux/`.
    pub(super) fn install_boot_files(&self, device_mount: &Path) -> Result<()> {
        let syslinux = device_mount.join(defs::SYSLINUX_DIR);
        for name in defs::ROOT_BOOT_FILES {
            self.install_file(name, device_mount)?;
        }
        for name in defs::SYSLINUX_BOOT_FILES {
            self.install_file(name, &syslinux)?;
        }
        Ok(())
    }

    pub(super) fn install_file(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let src = self.config.boot_files_dir.join(name);
        if !src.is_file() {
            bail!("Cannot find {}", src.display());
        }
        let dst = dest_dir.join(name);

        self.files
            .copy_file(&src, &dst)
            .with_context(|| format!("Failed to install {} as {}", name, dst.display()))?;
        log::info!("Installed {} to {}", name, dst.display());

        self.files
            .set_mode(&dst, defs::BOOT_FILE_MODE)
            .with_context(|| format!("Failed to set permissions on {}", dst.display()))?;
        Ok(dst)
    }
}
