// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod device;
pub mod files;
pub mod image;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

use std::{cell::Cell, process::Command};

use anyhow::{Context, Result};

use crate::{
    cli::Action,
    conf::config::Config,
    core::{files::FileOps, image::DiskImager, sync::Archiver},
    mount::VolumeManager,
    utils,
};

/// Result of a step that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Already in the requested state; nothing was run.
    Unchanged(String),
    /// The tool complained, but about an expected condition.
    Benign(String),
    /// The tool failed; reported, but the run carries on as a success.
    Reported(String),
}

impl Outcome {
    pub fn log(&self) {
        match self {
            Self::Done => {}
            Self::Unchanged(reason) | Self::Benign(reason) => log::info!("{}", reason),
            Self::Reported(reason) => log::error!("{}", reason),
        }
    }
}

/// External capabilities, one per concern, so sequencing can run against fakes.
pub struct Backends<'a> {
    pub volumes: &'a dyn VolumeManager,
    pub files: &'a dyn FileOps,
    pub archiver: &'a dyn Archiver,
    pub imager: &'a dyn DiskImager,
}

pub struct Provisioner<'a> {
    config: &'a Config,
    volumes: &'a dyn VolumeManager,
    files: &'a dyn FileOps,
    archiver: &'a dyn Archiver,
    imager: &'a dyn DiskImager,
    /// This run has started working on the USB device.
    device_engaged: Cell<bool>,
    /// This run has started working on the writable image mount.
    casper_engaged: Cell<bool>,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a Config, backends: Backends<'a>) -> Self {
        Self {
            config,
            volumes: backends.volumes,
            files: backends.files,
            archiver: backends.archiver,
            imager: backends.imager,
            device_engaged: Cell::new(false),
            casper_engaged: Cell::new(false),
        }
    }

    /// Run one action and return the process exit status. Every failure goes
    /// through [`Self::clean_exit`].
    pub fn execute(&self, action: Action) -> i32 {
        log::debug!("Action: {:?}", action);
        match self.dispatch(action) {
            Ok(()) if action == Action::Provision => self.clean_exit(0),
            Ok(()) => 0,
            Err(e) => {
                log::error!("{:#}", e);
                self.clean_exit(1)
            }
        }
    }

    fn dispatch(&self, action: Action) -> Result<()> {
        match action {
            Action::FindDevice => self.find_device(),
            Action::MountUsb => self.mount_partitions().map(|o| o.log()),
            Action::UnmountUsb => self.unmount_partitions().map(|o| o.log()),
            Action::MountCasper => {
                let device_mount = self.device_mount_dir()?;
                self.mount_casper(&device_mount).map(|o| o.log())
            }
            Action::UnmountCasper => {
                self.casper_engaged.set(true);
                self.release_casper();
                Ok(())
            }
            Action::ListCasper => self.with_casper(|| self.list_casper()),
            Action::EmptyCasper => self.with_casper(|| {
                self.empty_casper();
                Ok(())
            }),
            Action::LabelCasper => self.with_casper(|| {
                self.label_casper();
                Ok(())
            }),
            Action::ReadUsbInto => self.read_usb_into().map(|o| o.log()),
            Action::WriteUsbFrom => self.write_usb_from().map(|o| o.log()),
            Action::Provision => self.provision(),
        }
    }

    /// Mount the writable image, run `f`, then unmount and drop the mount point
    /// whatever `f` returned.
    fn with_casper<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let device_mount = self.device_mount_dir()?;
        self.mount_casper(&device_mount)?.log();
        let result = f();
        self.release_casper();
        result
    }

    fn provision(&self) -> Result<()> {
        if let Some(cmd) = &self.config.config_mount_command {
            log::info!("Making configuration available: {}", cmd);
            utils::run_checked(Command::new("sh").args(["-c", cmd]))
                .context("Failed to make base configuration directory available")?;
        }

        let bundle = sync::HostBundle::locate(self.config);
        bundle.validate()?;

        let device_mount = self.device_mount_dir()?;
        self.mount_casper(&device_mount)?.log();

        self.install_boot_files(&device_mount)?;

        for dir in bundle.dirs() {
            self.copy_provisioning_dir(dir, &self.config.casper_mount_dir)?;
        }
        Ok(())
    }

    /// Unmount and remove the image mount point, unmount the device, and hand
    /// back the status for the process to exit with. A successful run whose
    /// device cannot be unmounted exits with 1.
    pub fn clean_exit(&self, status: i32) -> i32 {
        if self.casper_engaged.get() {
            self.release_casper();
        }
        if !self.device_engaged.get() {
            return status;
        }
        match self.volumes.mount_point(&self.config.device_name()) {
            Ok(Some(_)) => match self.unmount_partitions() {
                Ok(outcome) => {
                    outcome.log();
                    status
                }
                Err(e) => {
                    log::error!("{:#}", e);
                    status.max(1)
                }
            },
            Ok(None) => status,
            Err(e) => {
                log::error!("Failed to query mount state: {:#}", e);
                status.max(1)
            }
        }
    }
}
