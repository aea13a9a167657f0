// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::{
    core::{Outcome, Provisioner},
    defs,
    mount::table,
};

/// The installer drive: a data partition (1) and a secondary partition (2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    pub name: String,
    pub path: PathBuf,
    pub partitions: [String; 2],
}

impl DeviceRef {
    pub fn new(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
            partitions: [table::partition_of(name, 1), table::partition_of(name, 2)],
        }
    }
}

impl Provisioner<'_> {
    pub fn device(&self) -> DeviceRef {
        DeviceRef::new(&self.config.device_name(), self.config.device_path())
    }

    fn label_device(&self) -> Result<Option<PathBuf>> {
        let found = self.volumes.device_by_label(&self.config.usb_label)?;
        match &found {
            Some(dev) => log::debug!(
                "Found device labelled '{}' on {}",
                self.config.usb_label,
                dev.display()
            ),
            None => log::info!("No device labelled '{}' found", self.config.usb_label),
        }
        Ok(found)
    }

    /// Report where the labelled partition is. Not finding it is a valid answer.
    pub(super) fn find_device(&self) -> Result<()> {
        let label = &self.config.usb_label;
        if let Some(dev) = self.label_device()? {
            println!("[+] Partition with label {} is found on {}", label, dev.display());
            return Ok(());
        }

        let mounts = self.volumes.mounts()?;
        match table::find_by_mount_dir(&mounts, label) {
            Some(entry) => {
                let partition = table::partition_name(&entry.source);
                println!(
                    "[+] Partition {} ({}) is mounted on {}",
                    entry.source,
                    entry.fs_type,
                    entry.target.display()
                );
                println!(
                    "[+] Guessing base device file is {}/{} and udisksctl uses {}{}",
                    defs::DEV_DIR,
                    table::base_device(partition),
                    defs::UDISKS_BLOCK_PREFIX,
                    partition
                );
            }
            None => println!("[+] Cannot find device"),
        }
        Ok(())
    }

    /// Mount both partitions through udisks. Partitions that are already
    /// mounted are left alone.
    pub fn mount_partitions(&self) -> Result<Outcome> {
        self.device_engaged.set(true);
        let device = self.device();

        let mut handles = Vec::with_capacity(2);
        for partition in &device.partitions {
            match self.volumes.block_device(partition) {
                Some(handle) => handles.push((partition, handle)),
                None => bail!("No udisks block device found for {}", partition),
            }
        }

        let mut outcome = Outcome::Unchanged(format!("{} is already mounted", device.name));
        for (partition, handle) in handles {
            if let Some(dir) = self.volumes.mount_point(partition)? {
                log::debug!("Partition {} already mounted on {}", partition, dir.display());
                continue;
            }
            self.volumes.mount(&handle)?;
            log::info!("Mounted {}", handle);
            outcome = Outcome::Done;
        }
        Ok(outcome)
    }

    /// Unmount partition 2, then partition 1. A failure on one does not stop
    /// the attempt on the other; failures are reported together afterwards.
    pub fn unmount_partitions(&self) -> Result<Outcome> {
        self.device_engaged.set(true);
        let device = self.device();

        let mut failed = Vec::new();
        let mut unmounted = 0;
        for partition in device.partitions.iter().rev() {
            match self.volumes.mount_point(partition) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    log::debug!("Partition {} is not mounted", partition);
                    continue;
                }
                Err(e) => {
                    log::error!("Failed to query mount state of {}: {:#}", partition, e);
                    failed.push(partition.as_str());
                    continue;
                }
            }
            let handle = self.volumes.block_device(partition).unwrap_or_else(|| {
                format!("{}{}", defs::UDISKS_BLOCK_PREFIX, partition)
            });
            match self.volumes.unmount(&handle) {
                Ok(()) => {
                    log::info!("Unmounted {}", partition);
                    unmounted += 1;
                }
                Err(e) => {
                    log::error!("{:#}", e);
                    failed.push(partition.as_str());
                }
            }
        }

        if !failed.is_empty() {
            bail!("Failed to unmount {}", failed.join(", "));
        }
        if unmounted == 0 {
            return Ok(Outcome::Unchanged(format!("{} is not mounted", device.name)));
        }
        Ok(Outcome::Done)
    }

    /// Mount directory of the labelled partition, mounting the drive first
    /// when needed.
    pub(super) fn device_mount_dir(&self) -> Result<PathBuf> {
        let Some(labelled) = self.label_device()? else {
            bail!("No device labelled '{}' found", self.config.usb_label);
        };
        self.device_engaged.set(true);
        let labelled = labelled.to_string_lossy().into_owned();

        if let Some(dir) = self.volumes.mount_point(&labelled)? {
            log::debug!("{} mounted on {}", labelled, dir.display());
            return Ok(dir);
        }

        log::info!("Device {} is not mounted, mounting it", self.config.device);
        self.mount_partitions()?.log();
        match self.volumes.mount_point(&labelled)? {
            Some(dir) => Ok(dir),
            None => bail!("Device {} is not mounted", self.config.device),
        }
    }
}
