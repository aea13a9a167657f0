// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::Path,
};

use anyhow::{Result, bail};
use nix::unistd::{Uid, User};

use crate::{
    core::{Outcome, Provisioner},
    defs,
};

impl Provisioner<'_> {
    /// Loop-mount the `casper-rw` image found on the device partition at the
    /// configured mount point, creating the mount point if needed.
    pub(super) fn mount_casper(&self, device_mount: &Path) -> Result<Outcome> {
        self.casper_engaged.set(true);
        let image = device_mount.join(defs::CASPER_RW);
        let target = &self.config.casper_mount_dir;

        if !image.exists() {
            bail!("Cannot find casper-rw source {}", image.display());
        }
        if !target.exists() {
            self.files.make_dir(target)?;
        }
        if self.volumes.is_mount_point(target)? {
            return Ok(Outcome::Unchanged(format!(
                "{} is already mounted on {}",
                defs::CASPER_RW,
                target.display()
            )));
        }

        self.volumes
            .loop_mount(&image, target, &self.config.casper_fstype)?;
        log::info!("Mounted {} on {}", image.display(), target.display());
        Ok(Outcome::Done)
    }

    /// Unmount the image and remove its mount point. Problems are logged only.
    pub(super) fn release_casper(&self) {
        let target = &self.config.casper_mount_dir;
        match self.volumes.is_mount_point(target) {
            Ok(true) => match self.volumes.unmount_path(target) {
                Ok(()) => log::info!("Unmounted {}", target.display()),
                Err(e) => log::error!("{:#}", e),
            },
            Ok(false) => log::debug!("{} is not mounted", target.display()),
            Err(e) => log::error!("Failed to query mount state: {:#}", e),
        }

        if target.exists()
            && let Err(e) = self.files.remove_dir(target)
        {
            log::error!("Failed to remove {}: {:#}", target.display(), e);
        }
        self.casper_engaged.set(false);
    }

    pub(super) fn list_casper(&self) -> Result<()> {
        let root = &self.config.casper_mount_dir;
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }
        let listing = render_tree(root);
        println!("{}", root.display());
        for line in &listing.lines {
            println!("{}", line);
        }
        println!();
        println!("{} directories, {} files", listing.dirs, listing.files);
        Ok(())
    }

    pub(super) fn empty_casper(&self) {
        let root = &self.config.casper_mount_dir;
        for name in defs::PROVISIONED_DIRS {
            let dir = root.join(name);
            if !dir.exists() {
                continue;
            }
            match self.files.remove_tree(&dir) {
                Ok(()) => log::info!("Removed {}", dir.display()),
                Err(e) => log::error!("Failed to remove {}: {:#}", dir.display(), e),
            }
        }
    }

    pub(super) fn label_casper(&self) {
        let marker = self.config.casper_mount_dir.join(&self.config.usb_label);
        match self.files.touch(&marker) {
            Ok(()) => log::info!("Labelled {} with {}", defs::CASPER_RW, marker.display()),
            Err(e) => log::error!("Failed to create {}: {:#}", marker.display(), e),
        }
    }
}

#[derive(Debug, Default)]
pub struct TreeListing {
    pub lines: Vec<String>,
    pub dirs: usize,
    pub files: usize,
}

/// `tree -pu` style rendering of everything below `root`, sorted by name.
pub fn render_tree(root: &Path) -> TreeListing {
    let mut listing = TreeListing::default();
    walk(root, "", &mut listing);
    listing
}

fn walk(dir: &Path, prefix: &str, listing: &mut TreeListing) {
    let mut entries: Vec<_> = match fs::read_dir(dir) {
        Ok(iter) => iter.flatten().collect(),
        Err(e) => {
            log::debug!("read_dir {}: {}", dir.display(), e);
            if let Some(last) = listing.lines.last_mut() {
                last.push_str("  [error opening dir]");
            }
            return;
        }
    };
    entries.sort_by_key(|e| e.file_name());

    let count = entries.len();
    for (i, entry) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let path = entry.path();
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        let branch = if last { "└── " } else { "├── " };
        listing.lines.push(format!(
            "{}{}[{} {:<8}] {}",
            prefix,
            branch,
            permission_string(meta.permissions().mode()),
            owner_name(meta.uid()),
            entry.file_name().to_string_lossy()
        ));

        if meta.is_dir() {
            listing.dirs += 1;
            let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
            walk(&path, &child_prefix, listing);
        } else {
            listing.files += 1;
        }
    }
}

fn permission_string(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        0o020000 => 'c',
        0o060000 => 'b',
        0o010000 => 'p',
        0o140000 => 's',
        _ => '-',
    };
    let mut s = String::with_capacity(10);
    s.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

fn owner_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}
