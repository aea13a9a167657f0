// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::OnceLock,
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::{cli::Cli, defs};

static BLOCK_SIZE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Block size argument for `dd`, e.g. `512` or `4M`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockSize(String);

impl BlockSize {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self(defs::DEFAULT_BLOCK_SIZE.to_string())
    }
}

impl FromStr for BlockSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = BLOCK_SIZE_REGEX
            .get_or_init(|| Regex::new(r"^[1-9][0-9]*[KMGkmg]?$").expect("Invalid Regex pattern"));
        if re.is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(format!("invalid block size '{s}': expected digits with optional K/M/G suffix"))
        }
    }
}

impl TryFrom<String> for BlockSize {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlockSize> for String {
    fn from(value: BlockSize) -> Self {
        value.0
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compression tool used for whole-device images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Bzip2,
    Gzip,
    Xz,
}

impl Codec {
    pub fn program(self) -> &'static str {
        match self {
            Self::Bzip2 => "bzip2",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Bzip2 => ".dd.bz2",
            Self::Gzip => ".dd.gz",
            Self::Xz => ".dd.xz",
        }
    }
}

/// Backend for mirror copies into the writable image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiverKind {
    #[default]
    Rsync,
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: String,
    pub usb_label: String,
    pub hostname: String,
    pub base_configs_dir: PathBuf,
    pub distro_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file: Option<PathBuf>,
    pub block_size: BlockSize,
    pub codec: Codec,
    pub archiver: ArchiverKind,
    pub boot_files_dir: PathBuf,
    pub casper_mount_dir: PathBuf,
    pub casper_fstype: String,
    pub staging_root: PathBuf,
    pub by_label_dir: PathBuf,
    /// Shell command run before provisioning to make `base_configs_dir` available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_mount_command: Option<String>,
    pub verbose: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: defs::DEFAULT_DEVICE.to_string(),
            usb_label: defs::DEFAULT_USB_LABEL.to_string(),
            hostname: default_hostname(),
            base_configs_dir: default_base_configs_dir(),
            distro_version: defs::DEFAULT_DISTRO_VERSION.to_string(),
            image_file: None,
            block_size: BlockSize::default(),
            codec: Codec::default(),
            archiver: ArchiverKind::default(),
            boot_files_dir: PathBuf::from("."),
            casper_mount_dir: PathBuf::from(defs::CASPER_RW),
            casper_fstype: defs::CASPER_FSTYPE.to_string(),
            staging_root: std::env::temp_dir(),
            by_label_dir: PathBuf::from(defs::BY_LABEL_DIR),
            config_mount_command: None,
            verbose: false,
            debug: false,
        }
    }
}

fn default_hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn default_base_configs_dir() -> PathBuf {
    let root = std::env::var_os(defs::INSTALL_ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(defs::INSTALL_ROOT_FALLBACK));
    root.join(defs::CONFIGS_SUBDIR)
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn load_default() -> Result<Self> {
        Self::from_file(defs::CONFIG_FILE_DEFAULT)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Apply command line overrides. The result is treated as read-only afterwards.
    pub fn merge_with_cli(&mut self, cli: &Cli) {
        if let Some(device) = &cli.device {
            self.device = device.clone();
        }
        if let Some(label) = &cli.usblabel {
            self.usb_label = label.clone();
        }
        if let Some(hostname) = &cli.hostname {
            self.hostname = hostname.clone();
        }
        if let Some(dir) = &cli.base_configs_dir {
            self.base_configs_dir = dir.clone();
        }
        if let Some(version) = &cli.distro_version {
            self.distro_version = version.clone();
        }
        if let Some(image) = &cli.imagefile {
            self.image_file = Some(image.clone());
        }
        if let Some(bs) = &cli.block_size {
            self.block_size = bs.clone();
        }
        if let Some(codec) = cli.codec {
            self.codec = codec;
        }
        if let Some(archiver) = cli.archiver {
            self.archiver = archiver;
        }
        if let Some(dir) = &cli.boot_files_dir {
            self.boot_files_dir = dir.clone();
        }
        self.verbose |= cli.verbose || cli.debug;
        self.debug |= cli.debug;
    }

    /// Relative directories are anchored at `cwd`.
    pub fn anchor_paths(&mut self, cwd: &Path) {
        for dir in [&mut self.casper_mount_dir, &mut self.boot_files_dir] {
            if dir.is_relative() {
                *dir = cwd.join(&*dir);
            }
        }
    }

    /// `/dev/<device>`, unless the device was given as a path already.
    pub fn device_path(&self) -> PathBuf {
        let device = Path::new(&self.device);
        if device.is_absolute() {
            device.to_path_buf()
        } else {
            Path::new(defs::DEV_DIR).join(device)
        }
    }

    /// Bare kernel name of the device, e.g. `sdb`.
    pub fn device_name(&self) -> String {
        Path::new(&self.device)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.device.clone())
    }

    pub fn host_dir(&self) -> PathBuf {
        self.base_configs_dir.join(&self.hostname)
    }

    /// Conventional image name, e.g. `ubuntu-14.04.5-install.dd.bz2`.
    pub fn default_image_name(&self) -> String {
        format!(
            "ubuntu-{}-install{}",
            self.distro_version,
            self.codec.extension()
        )
    }
}
