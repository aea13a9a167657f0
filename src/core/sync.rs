// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::HashSet,
    fs::{self, create_dir_all, remove_dir_all, remove_file},
    os::unix::fs::symlink,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

use crate::{
    conf::config::Config,
    core::Provisioner,
    defs,
    utils::{self, run_checked},
};

/// Per-host provisioning material under `<base configs dir>/<hostname>`.
#[derive(Debug, Clone)]
pub struct HostBundle {
    pub base: PathBuf,
    pub hostname: String,
    pub root: PathBuf,
    pub ssh_host_keys: PathBuf,
    pub ssh_user_keys: PathBuf,
    pub openvpn_cert: PathBuf,
}

impl HostBundle {
    pub fn locate(config: &Config) -> Self {
        let root = config.host_dir();
        Self {
            base: config.base_configs_dir.clone(),
            hostname: config.hostname.clone(),
            ssh_host_keys: root.join(defs::SSH_HOST_KEYS_DIR),
            ssh_user_keys: root.join(defs::SSH_USER_KEYS_DIR),
            openvpn_cert: root.join(defs::OPENVPN_CERT_DIR),
            root,
        }
    }

    pub fn dirs(&self) -> [&Path; 3] {
        [&self.ssh_host_keys, &self.ssh_user_keys, &self.openvpn_cert]
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base.is_dir() {
            bail!("Can't find base configuration directory {}", self.base.display());
        }
        if !self.root.is_dir() {
            bail!(
                "Can't find directory with data for {} ({})",
                self.hostname,
                self.root.display()
            );
        }
        for dir in [&self.ssh_host_keys, &self.ssh_user_keys] {
            if !dir.is_dir() {
                bail!("Cannot find SSH key data {}", dir.display());
            }
        }
        if !self.openvpn_cert.is_dir() {
            bail!("Cannot find OpenVPN cert data {}", self.openvpn_cert.display());
        }
        Ok(())
    }
}

/// Makes `dst` hold exactly what `src` holds: missing files are copied and
/// files only present in `dst` are deleted.
pub trait Archiver {
    /// `elevated` asks for root rights on the destination; ownership is then
    /// not carried over.
    fn mirror(&self, src: &Path, dst: &Path, elevated: bool) -> Result<()>;
}

pub struct Rsync;

impl Archiver for Rsync {
    fn mirror(&self, src: &Path, dst: &Path, elevated: bool) -> Result<()> {
        let mut cmd = if elevated {
            utils::privileged("rsync")
        } else {
            Command::new("rsync")
        };
        cmd.args(["-a", "--delete"]);
        if elevated {
            cmd.arg("--no-owner");
        }
        cmd.arg(with_trailing_slash(src)).arg(with_trailing_slash(dst));
        run_checked(&mut cmd)?;
        Ok(())
    }
}

fn with_trailing_slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.ends_with('/') {
        s.into_owned()
    } else {
        format!("{s}/")
    }
}

/// In-process mirror; needs write access to `dst` without help.
pub struct NativeMirror;

impl Archiver for NativeMirror {
    fn mirror(&self, src: &Path, dst: &Path, _elevated: bool) -> Result<()> {
        mirror_dir(src, dst).with_context(|| {
            format!("Failed to mirror {} to {}", src.display(), dst.display())
        })
    }
}

fn mirror_dir(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("{} is not a directory", src.display());
    }
    utils::ensure_dir_exists(dst)?;

    let mut wanted = HashSet::new();
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?.to_path_buf();
        let target = dst.join(&rel);
        let ft = entry.file_type();

        if let Ok(existing) = fs::symlink_metadata(&target) {
            let same_kind = existing.is_dir() == ft.is_dir()
                && existing.file_type().is_symlink() == ft.is_symlink();
            if !same_kind {
                if existing.is_dir() {
                    remove_dir_all(&target)?;
                } else {
                    remove_file(&target)?;
                }
            }
        }

        if ft.is_dir() {
            create_dir_all(&target)?;
            fs::set_permissions(&target, entry.metadata()?.permissions())?;
        } else if ft.is_symlink() {
            if fs::symlink_metadata(&target).is_ok() {
                remove_file(&target)?;
            }
            symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
        wanted.insert(rel);
    }

    for entry in WalkDir::new(dst).min_depth(1).contents_first(true) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(dst)?;
        if wanted.contains(rel) {
            continue;
        }
        log::debug!("Deleting {}", entry.path().display());
        if entry.file_type().is_dir() {
            remove_dir_all(entry.path())?;
        } else {
            remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Staging location for `src` under `staging_root`. Refuses anything that
/// would land on `staging_root` itself, since staging is wiped afterwards.
pub fn staging_path(staging_root: &Path, src: &Path) -> Result<PathBuf> {
    let Some(name) = src.file_name().filter(|n| !n.is_empty()) else {
        bail!(
            "Refusing to stage {} into {}: no directory name",
            src.display(),
            staging_root.display()
        );
    };
    let staging = staging_root.join(name);
    if staging == staging_root || staging.parent() != Some(staging_root) {
        bail!("Refusing to possibly delete {}", staging_root.display());
    }
    Ok(staging)
}

/// Removes the staging copy however the copy ended.
struct StagingGuard<'a>(&'a Path);

impl Drop for StagingGuard<'_> {
    fn drop(&mut self) {
        utils::cleanup_temp_dir(self.0);
    }
}

impl Provisioner<'_> {
    /// Mirror `src` into `<dest_root>/<basename of src>`, going through a
    /// local staging copy first so the privileged step never reads from a
    /// network file system.
    pub(super) fn copy_provisioning_dir(&self, src: &Path, dest_root: &Path) -> Result<()> {
        let staging = staging_path(&self.config.staging_root, src)?;
        let dest = dest_root.join(staging.file_name().context("staging path has no name")?);

        log::info!("Copying {} to {}", src.display(), dest.display());
        if !dest.exists()
            && let Err(e) = self.files.make_dir(&dest)
        {
            log::warn!("Can't create directory {}: {:#}", dest.display(), e);
        }

        let _guard = StagingGuard(&staging);
        self.archiver
            .mirror(src, &staging, false)
            .with_context(|| format!("Failed to stage {}", src.display()))?;
        self.archiver
            .mirror(&staging, &dest, true)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
        Ok(())
    }
}
