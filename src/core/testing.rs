// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory volume manager and imager plus a temp directory laid out like a
//! mounted installer drive and a config bundle.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};
use tempfile::TempDir;

use crate::{
    conf::config::{ArchiverKind, BlockSize, Codec, Config},
    core::{
        Backends, Provisioner,
        files::LocalFiles,
        image::{DiskImager, PipelineStatus},
        sync::NativeMirror,
    },
    defs,
    mount::{MountEntry, VolumeManager, table},
};

pub const HOSTNAME: &str = "dimsdemo1";

#[derive(Default)]
pub struct FakeVolumes {
    pub labels: RefCell<HashMap<String, PathBuf>>,
    pub mounts: RefCell<Vec<MountEntry>>,
    /// Partitions udisks can resolve.
    pub known: RefCell<HashSet<String>>,
    pub fail_unmount: RefCell<HashSet<String>>,
    pub calls: RefCell<Vec<String>>,
    /// Number of upcoming `mounts()` calls that fail.
    pub failing_mount_queries: Cell<u32>,
    /// Where `mount` puts each partition.
    pub partition_dirs: HashMap<String, PathBuf>,
}

impl FakeVolumes {
    pub fn mount_point_of(&self, device: &str) -> Option<PathBuf> {
        table::find_mount(&self.mounts.borrow(), device)
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl VolumeManager for FakeVolumes {
    fn device_by_label(&self, label: &str) -> Result<Option<PathBuf>> {
        Ok(self.labels.borrow().get(label).cloned())
    }

    fn mounts(&self) -> Result<Vec<MountEntry>> {
        let failing = self.failing_mount_queries.get();
        if failing > 0 {
            self.failing_mount_queries.set(failing - 1);
            bail!("Failed to read mount table");
        }
        Ok(self.mounts.borrow().clone())
    }

    fn block_device(&self, partition: &str) -> Option<String> {
        let name = table::partition_name(partition);
        self.known
            .borrow()
            .contains(name)
            .then(|| format!("{}{}", defs::UDISKS_BLOCK_PREFIX, name))
    }

    fn mount(&self, block_device: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("mount {block_device}"));
        let name = table::partition_name(block_device);
        let Some(target) = self.partition_dirs.get(name) else {
            bail!("no mount directory for {}", name);
        };
        self.mounts.borrow_mut().push(MountEntry {
            source: format!("/dev/{name}"),
            target: target.clone(),
            fs_type: "vfat".into(),
        });
        Ok(())
    }

    fn unmount(&self, block_device: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("unmount {block_device}"));
        let name = table::partition_name(block_device);
        if self.fail_unmount.borrow().contains(name) {
            bail!("Error unmounting /dev/{}: target is busy", name);
        }
        let source = format!("/dev/{name}");
        self.mounts.borrow_mut().retain(|m| m.source != source);
        Ok(())
    }

    fn loop_mount(&self, image: &Path, target: &Path, fstype: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!(
            "loop_mount {} {} {}",
            image.display(),
            target.display(),
            fstype
        ));
        self.mounts.borrow_mut().push(MountEntry {
            source: "/dev/loop0".into(),
            target: target.to_path_buf(),
            fs_type: fstype.into(),
        });
        Ok(())
    }

    fn unmount_path(&self, target: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("unmount_path {}", target.display()));
        self.mounts.borrow_mut().retain(|m| m.target != target);
        Ok(())
    }
}

pub struct FakeImager {
    pub calls: RefCell<Vec<String>>,
    pub status: RefCell<PipelineStatus>,
}

impl Default for FakeImager {
    fn default() -> Self {
        Self {
            calls: RefCell::default(),
            status: RefCell::new(PipelineStatus {
                success: true,
                ..Default::default()
            }),
        }
    }
}

impl DiskImager for FakeImager {
    fn read_device(
        &self,
        device: &Path,
        image: &Path,
        block_size: &BlockSize,
        codec: Codec,
    ) -> Result<PipelineStatus> {
        self.calls.borrow_mut().push(format!(
            "read {} {} {} {}",
            device.display(),
            block_size,
            codec.program(),
            image.display()
        ));
        Ok(self.status.borrow().clone())
    }

    fn write_device(
        &self,
        image: &Path,
        device: &Path,
        block_size: &BlockSize,
        codec: Codec,
    ) -> Result<PipelineStatus> {
        self.calls.borrow_mut().push(format!(
            "write {} {} {} {}",
            image.display(),
            block_size,
            codec.program(),
            device.display()
        ));
        Ok(self.status.borrow().clone())
    }
}

/// ```text
/// <tmp>/dev/sdb                       device node stand-in
/// <tmp>/media/DIMSINSTALL/casper-rw   partition 1 mount directory
/// <tmp>/media/sdb2/                   partition 2 mount directory
/// <tmp>/boot/{preseed,ks,txt,syslinux}.cfg
/// <tmp>/configs/dimsdemo1/{ssh-host-keys,ssh-user-keys,openvpn-cert}/
/// <tmp>/work/                         holds the casper-rw mount point
/// <tmp>/staging/
/// ```
pub struct Harness {
    tmp: TempDir,
    pub config: Config,
    pub volumes: FakeVolumes,
    pub imager: FakeImager,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        fs::create_dir_all(root.join("dev")).unwrap();
        fs::write(root.join("dev/sdb"), b"").unwrap();

        let usb = root.join("media").join(defs::DEFAULT_USB_LABEL);
        fs::create_dir_all(usb.join(defs::SYSLINUX_DIR)).unwrap();
        fs::write(usb.join(defs::CASPER_RW), b"").unwrap();
        let second = root.join("media/sdb2");
        fs::create_dir_all(&second).unwrap();

        let boot = root.join("boot");
        fs::create_dir_all(&boot).unwrap();
        for name in defs::ROOT_BOOT_FILES.iter().chain(defs::SYSLINUX_BOOT_FILES) {
            fs::write(boot.join(name), format!("# {name}\n")).unwrap();
        }

        let bundle = root.join("configs").join(HOSTNAME);
        for (dir, file) in [
            (defs::SSH_HOST_KEYS_DIR, "ssh_host_rsa_key.pub"),
            (defs::SSH_USER_KEYS_DIR, "ansible.pub"),
            (defs::OPENVPN_CERT_DIR, "client.crt"),
        ] {
            fs::create_dir_all(bundle.join(dir)).unwrap();
            fs::write(bundle.join(dir).join(file), format!("{dir}/{file}\n")).unwrap();
        }

        fs::create_dir_all(root.join("work")).unwrap();
        fs::create_dir_all(root.join("staging")).unwrap();

        let config = Config {
            device: root.join("dev/sdb").to_string_lossy().into_owned(),
            hostname: HOSTNAME.to_string(),
            base_configs_dir: root.join("configs"),
            boot_files_dir: boot,
            casper_mount_dir: root.join("work").join(defs::CASPER_RW),
            staging_root: root.join("staging"),
            by_label_dir: root.join("by-label"),
            archiver: ArchiverKind::Native,
            ..Config::default()
        };

        let volumes = FakeVolumes {
            labels: RefCell::new(HashMap::from([(
                defs::DEFAULT_USB_LABEL.to_string(),
                PathBuf::from("/dev/sdb1"),
            )])),
            known: RefCell::new(HashSet::from(["sdb1".to_string(), "sdb2".to_string()])),
            partition_dirs: HashMap::from([
                ("sdb1".to_string(), usb),
                ("sdb2".to_string(), second),
            ]),
            ..FakeVolumes::default()
        };

        Self {
            tmp,
            config,
            volumes,
            imager: FakeImager::default(),
        }
    }

    pub fn provisioner(&self) -> Provisioner<'_> {
        self.provisioner_with_imager(&self.imager)
    }

    pub fn provisioner_with_imager<'a>(&'a self, imager: &'a dyn DiskImager) -> Provisioner<'a> {
        Provisioner::new(
            &self.config,
            Backends {
                volumes: &self.volumes,
                files: &LocalFiles,
                archiver: &NativeMirror,
                imager,
            },
        )
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn usb_dir(&self) -> PathBuf {
        self.root().join("media").join(defs::DEFAULT_USB_LABEL)
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.root().join("boot")
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.root().join("configs").join(HOSTNAME)
    }

    pub fn casper_dir(&self) -> PathBuf {
        self.config.casper_mount_dir.clone()
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root().join("staging")
    }
}
