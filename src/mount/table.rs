// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::PathBuf, sync::OnceLock};

use anyhow::{Context, Result};
use procfs::process::Process;
use regex_lite::Regex;

use crate::defs;

static PARTITION_SUFFIX_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
}

pub fn read_mounts() -> Result<Vec<MountEntry>> {
    if let Ok(process) = Process::myself()
        && let Ok(mountinfo) = process.mountinfo()
    {
        return Ok(mountinfo
            .into_iter()
            .map(|m| MountEntry {
                source: m.mount_source.unwrap_or_default(),
                target: m.mount_point,
                fs_type: m.fs_type,
            })
            .collect());
    }

    let content = fs::read_to_string("/proc/mounts").context("Failed to read /proc/mounts")?;
    Ok(parse_proc_mounts(&content))
}

fn parse_proc_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let target = parts.next()?;
            let fs_type = parts.next().unwrap_or_default();
            Some(MountEntry {
                source: source.to_string(),
                target: PathBuf::from(unescape_octal(target)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// `/proc/mounts` encodes blanks in paths as `\040` and friends.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && let Some(code) = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
        {
            out.push(code);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Kernel name of a device in any of its spellings: `/dev/sdb1`,
/// `block_devices/sdb1` and `sdb1` all give `sdb1`.
pub fn partition_name(device: &str) -> &str {
    if let Some(rest) = device.strip_prefix(defs::UDISKS_BLOCK_PREFIX) {
        return rest;
    }
    if let Some(rest) = device.strip_prefix("/dev/") {
        return rest;
    }
    device
}

/// `sdb` + 1 is `sdb1`; disks whose name ends in a digit take a `p`
/// separator (`nvme0n1p1`, `mmcblk0p1`).
pub fn partition_of(disk: &str, number: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

/// Strip the partition number: `sdb1` gives `sdb`, `nvme0n1p2` gives `nvme0n1`.
pub fn base_device(partition: &str) -> String {
    let re = PARTITION_SUFFIX_REGEX
        .get_or_init(|| Regex::new(r"^(.*?[0-9])p[0-9]+$|^(.*?[^0-9])[0-9]+$").expect("Invalid Regex pattern"));
    match re.captures(partition) {
        Some(caps) => caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| partition.to_string()),
        None => partition.to_string(),
    }
}

fn source_matches(source: &str, name: &str) -> bool {
    let Some(source_name) = source.strip_prefix("/dev/") else {
        return false;
    };
    if source_name == name {
        return true;
    }
    // Partitions of `name` are named the way `partition_of` builds them, so a
    // name ending in a digit only owns `<name>p<N>`.
    let Some(rest) = source_name.strip_prefix(name) else {
        return false;
    };
    let digits = if name.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(digits) => digits,
            None => return false,
        }
    } else {
        rest
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Mount directory of a partition, or of the first mounted partition when
/// given a whole disk. `None` when nothing matches.
pub fn find_mount(entries: &[MountEntry], device: &str) -> Option<PathBuf> {
    let name = partition_name(device);
    if name.is_empty() {
        return None;
    }
    entries
        .iter()
        .find(|m| source_matches(&m.source, name))
        .map(|m| m.target.clone())
}

/// First block-device mount whose directory mentions `needle`
/// (desktop automounters put the label in the mount path).
pub fn find_by_mount_dir<'a>(entries: &'a [MountEntry], needle: &str) -> Option<&'a MountEntry> {
    if needle.is_empty() {
        return None;
    }
    entries
        .iter()
        .filter(|m| m.source.starts_with("/dev/"))
        .find(|m| m.target.to_string_lossy().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, target: &str) -> MountEntry {
        MountEntry {
            source: source.into(),
            target: PathBuf::from(target),
            fs_type: "vfat".into(),
        }
    }

    fn table() -> Vec<MountEntry> {
        vec![
            entry("proc", "/proc"),
            entry("/dev/sda2", "/"),
            entry("/dev/sdb12", "/media/user/OTHER"),
            entry("/dev/sdb1", "/media/user/DIMSINSTALL"),
            entry("/dev/nvme0n1p1", "/boot/efi"),
        ]
    }

    #[test]
    fn finds_partition_in_every_spelling() {
        let t = table();
        let expected = Some(PathBuf::from("/media/user/DIMSINSTALL"));
        assert_eq!(find_mount(&t, "sdb1"), expected);
        assert_eq!(find_mount(&t, "/dev/sdb1"), expected);
        assert_eq!(find_mount(&t, "block_devices/sdb1"), expected);
    }

    #[test]
    fn partition_name_is_not_a_prefix_match() {
        let t = vec![entry("/dev/sdb12", "/media/x")];
        assert_eq!(find_mount(&t, "sdb1"), None);
    }

    #[test]
    fn numbered_names_do_not_claim_longer_numbers() {
        let t = vec![
            entry("/dev/nvme0n10", "/srv/ten"),
            entry("/dev/loop10", "/mnt/loop10"),
            entry("/dev/nvme0n1p3", "/srv/data"),
        ];
        assert_eq!(find_mount(&t, "nvme0n1"), Some(PathBuf::from("/srv/data")));
        assert_eq!(find_mount(&t, "loop1"), None);
        assert_eq!(find_mount(&t, "sdb1"), None);
    }

    #[test]
    fn whole_disk_matches_any_partition() {
        let t = table();
        assert_eq!(find_mount(&t, "sdb"), Some(PathBuf::from("/media/user/OTHER")));
        assert_eq!(find_mount(&t, "nvme0n1"), Some(PathBuf::from("/boot/efi")));
        assert_eq!(find_mount(&t, "sdc"), None);
        assert_eq!(find_mount(&t, ""), None);
    }

    #[test]
    fn names_partitions() {
        assert_eq!(partition_of("sdb", 2), "sdb2");
        assert_eq!(partition_of("nvme0n1", 1), "nvme0n1p1");
        assert_eq!(base_device("sdb1"), "sdb");
        assert_eq!(base_device("sdb12"), "sdb");
        assert_eq!(base_device("nvme0n1p2"), "nvme0n1");
        assert_eq!(base_device("mmcblk0p1"), "mmcblk0");
        assert_eq!(base_device("sdb"), "sdb");
    }

    #[test]
    fn searches_mount_dirs_by_label() {
        let t = table();
        let found = find_by_mount_dir(&t, "DIMSINSTALL").unwrap();
        assert_eq!(found.source, "/dev/sdb1");
        assert!(find_by_mount_dir(&t, "proc").is_none());
        assert!(find_by_mount_dir(&t, "").is_none());
    }

    #[test]
    fn parses_proc_mounts_with_escapes() {
        let content = "/dev/sdb1 /media/user/DIMS\\040INSTALL vfat rw 0 0\nproc /proc proc rw 0 0\n";
        let entries = parse_proc_mounts(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target, PathBuf::from("/media/user/DIMS INSTALL"));
        assert_eq!(entries[0].fs_type, "vfat");
    }
}
