// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

use crate::conf::config::{ArchiverKind, BlockSize, Codec};
use crate::defs::CONFIG_FILE_DEFAULT;

#[derive(Parser, Debug)]
#[command(
    name = "createusb",
    version,
    about = "Provision an installer USB drive with per-host keys and boot configuration"
)]
#[command(group(ArgGroup::new("action").multiple(false)))]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Device file for the USB drive (e.g. sdb)
    #[arg(short = 'D', long = "device")]
    pub device: Option<String>,
    /// Hostname of the system to install
    #[arg(short = 'H', long = "hostname")]
    pub hostname: Option<String>,
    /// Volume label of the installer partition
    #[arg(short = 'l', long = "usblabel")]
    pub usblabel: Option<String>,
    /// Base directory holding one config bundle per host
    #[arg(long = "base-configs-dir")]
    pub base_configs_dir: Option<PathBuf>,
    #[arg(long = "distro-version")]
    pub distro_version: Option<String>,
    /// Compressed image file for --read-usb-into / --write-usb-from
    #[arg(short = 'f', long = "imagefile")]
    pub imagefile: Option<PathBuf>,
    /// Block size handed to dd
    #[arg(long = "block-size")]
    pub block_size: Option<BlockSize>,
    #[arg(long = "codec", value_enum)]
    pub codec: Option<Codec>,
    #[arg(long = "archiver", value_enum)]
    pub archiver: Option<ArchiverKind>,
    /// Directory holding preseed.cfg, ks.cfg, txt.cfg and syslinux.cfg
    #[arg(long = "boot-files-dir")]
    pub boot_files_dir: Option<PathBuf>,

    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
    /// Print usage with examples and exit
    #[arg(short = 'u', long = "usage")]
    pub usage: bool,

    /// Find the labelled USB partition and exit
    #[arg(long = "find-device", group = "action")]
    pub find_device: bool,
    #[arg(long = "mount-usb", group = "action")]
    pub mount_usb: bool,
    #[arg(long = "unmount-usb", group = "action")]
    pub unmount_usb: bool,
    /// Mount casper-rw in the current directory and exit
    #[arg(long = "mount-casper", group = "action")]
    pub mount_casper: bool,
    #[arg(long = "unmount-casper", group = "action")]
    pub unmount_casper: bool,
    /// List contents of the casper-rw file system
    #[arg(long = "ls-casper", group = "action")]
    pub ls_casper: bool,
    /// Remove provisioned directories (not lost+found) from casper-rw
    #[arg(long = "empty-casper", group = "action")]
    pub empty_casper: bool,
    /// Put a file named after --usblabel into casper-rw
    #[arg(long = "label-casper", group = "action")]
    pub label_casper: bool,
    #[arg(long = "read-usb-into", group = "action")]
    pub read_usb_into: bool,
    #[arg(long = "write-usb-from", group = "action")]
    pub write_usb_from: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the default configuration as TOML
    GenConfig {
        #[arg(short = 'o', long = "output", default_value = CONFIG_FILE_DEFAULT)]
        output: PathBuf,
    },
    /// Print the merged configuration in JSON format
    ShowConfig,
}

/// What a single invocation does. Exactly one is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    FindDevice,
    MountUsb,
    UnmountUsb,
    MountCasper,
    UnmountCasper,
    ListCasper,
    EmptyCasper,
    LabelCasper,
    ReadUsbInto,
    WriteUsbFrom,
    Provision,
}

impl Cli {
    pub fn action(&self) -> Action {
        let flags = [
            (self.find_device, Action::FindDevice),
            (self.mount_usb, Action::MountUsb),
            (self.unmount_usb, Action::UnmountUsb),
            (self.mount_casper, Action::MountCasper),
            (self.unmount_casper, Action::UnmountCasper),
            (self.ls_casper, Action::ListCasper),
            (self.empty_casper, Action::EmptyCasper),
            (self.label_casper, Action::LabelCasper),
            (self.read_usb_into, Action::ReadUsbInto),
            (self.write_usb_from, Action::WriteUsbFrom),
        ];
        flags
            .into_iter()
            .find_map(|(set, action)| set.then_some(action))
            .unwrap_or(Action::Provision)
    }
}

pub const EXTRA_USAGE: &str = r#"Examples:

  Provision the USB drive for host dimsdemo1:
    $ createusb --verbose --hostname dimsdemo1

  Show what is stored in the casper-rw image:
    $ createusb --ls-casper

  Image the whole drive into a compressed file:
    $ createusb -v --device sdb --read-usb-into --imagefile ubuntu-14.04.5-install.dd.bz2

  Write a compressed image back to a drive:
    $ createusb -v --device sdb --write-usb-from --imagefile ubuntu-14.04.5-install.dd.bz2

  A trailing "dd: error writing '/dev/sdb': No space left on device" after a
  full-drive write is expected.

  Running two instances against the same drive at once is not supported."#;
