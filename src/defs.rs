// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub const CONFIG_FILE_DEFAULT: &str = "/etc/createusb/config.toml";

pub const DEFAULT_DEVICE: &str = "sdb";
pub const DEFAULT_USB_LABEL: &str = "DIMSINSTALL";
pub const DEFAULT_DISTRO_VERSION: &str = "14.04.5";
pub const DEFAULT_BLOCK_SIZE: &str = "512";

pub const DEV_DIR: &str = "/dev";
pub const BY_LABEL_DIR: &str = "/dev/disk/by-label";
pub const UDISKS_BLOCK_PREFIX: &str = "block_devices/";

/// Install root; the per-host bundles live under `$DIMS/nas/scd`.
pub const INSTALL_ROOT_ENV: &str = "DIMS";
pub const INSTALL_ROOT_FALLBACK: &str = "/opt/dims";
pub const CONFIGS_SUBDIR: &str = "nas/scd";

pub const CASPER_RW: &str = "casper-rw";
pub const CASPER_FSTYPE: &str = "ext2";
pub const SYSLINUX_DIR: &str = "syslinux";

pub const SSH_HOST_KEYS_DIR: &str = "ssh-host-keys";
pub const SSH_USER_KEYS_DIR: &str = "ssh-user-keys";
pub const OPENVPN_CERT_DIR: &str = "openvpn-cert";

pub const PROVISIONED_DIRS: &[&str] = &[SSH_HOST_KEYS_DIR, SSH_USER_KEYS_DIR, OPENVPN_CERT_DIR];

/// Files copied to the root of the first partition.
pub const ROOT_BOOT_FILES: &[&str] = &["preseed.cfg", "ks.cfg"];
/// Files copied to `syslinux/` on the first partition.
pub const SYSLINUX_BOOT_FILES: &[&str] = &["txt.cfg", "syslinux.cfg"];

pub const BOOT_FILE_MODE: u32 = 0o755;

pub const NO_SPACE_MARKER: &str = "No space left on device";
