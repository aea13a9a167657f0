// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::Instant,
};

use anyhow::{Context, Result, bail};

use crate::{
    conf::config::{BlockSize, Codec},
    core::{Outcome, Provisioner},
    defs,
    utils::{self, format_elapsed},
};

/// How a `dd` + codec pipeline ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStatus {
    pub success: bool,
    /// Exit code of the first stage that failed.
    pub code: Option<i32>,
    pub stderr: String,
}

/// Whole-device imaging. Errors are reserved for pipelines that could not be
/// started at all; a pipeline that ran reports through [`PipelineStatus`].
pub trait DiskImager {
    fn read_device(
        &self,
        device: &Path,
        image: &Path,
        block_size: &BlockSize,
        codec: Codec,
    ) -> Result<PipelineStatus>;

    fn write_device(
        &self,
        image: &Path,
        device: &Path,
        block_size: &BlockSize,
        codec: Codec,
    ) -> Result<PipelineStatus>;
}

/// `dd` piped through the external compressor.
pub struct DdPipeline;

impl DdPipeline {
    fn spawn_second(first: &mut Child, second: &mut Command) -> Result<Child> {
        match second.spawn() {
            Ok(child) => Ok(child),
            Err(e) => {
                let _ = first.kill();
                let _ = first.wait();
                Err(e).with_context(|| {
                    format!("Failed to execute '{}'", second.get_program().to_string_lossy())
                })
            }
        }
    }

    fn finish(first: Child, second: Child) -> Result<PipelineStatus> {
        let first = first.wait_with_output()?;
        let second = second.wait_with_output()?;

        let mut stderr = String::from_utf8_lossy(&first.stderr).into_owned();
        stderr.push_str(&String::from_utf8_lossy(&second.stderr));
        log_dd_summary(&stderr);

        let code = [&first.status, &second.status]
            .into_iter()
            .find(|s| !s.success())
            .map(|s| s.code().unwrap_or(-1));
        Ok(PipelineStatus {
            success: code.is_none(),
            code,
            stderr,
        })
    }
}

/// Privileged `dd` in the C locale, so its diagnostics can be recognised.
fn dd_command() -> Command {
    let mut cmd = utils::privileged("env");
    cmd.args(["LC_ALL=C", "dd"]);
    cmd
}

fn log_dd_summary(stderr: &str) {
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        log::info!("{}", line);
    }
}

impl DiskImager for DdPipeline {
    fn read_device(
        &self,
        device: &Path,
        image: &Path,
        block_size: &BlockSize,
        codec: Codec,
    ) -> Result<PipelineStatus> {
        let output = File::create(image)
            .with_context(|| format!("Failed to create {}", image.display()))?;

        let mut dd = dd_command()
            .arg(format!("if={}", device.display()))
            .arg(format!("bs={block_size}"))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to execute 'dd'")?;
        let dd_out = dd.stdout.take().context("dd has no stdout")?;

        log::debug!(
            "Running: dd if={} bs={} | {} -c > {}",
            device.display(),
            block_size,
            codec.program(),
            image.display()
        );
        let compressor = Self::spawn_second(
            &mut dd,
            Command::new(codec.program())
                .arg("-c")
                .stdin(Stdio::from(dd_out))
                .stdout(Stdio::from(output))
                .stderr(Stdio::piped()),
        )?;
        Self::finish(dd, compressor)
    }

    fn write_device(
        &self,
        image: &Path,
        device: &Path,
        block_size: &BlockSize,
        codec: Codec,
    ) -> Result<PipelineStatus> {
        let mut decompressor = Command::new(codec.program())
            .arg("-dc")
            .arg(image)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute '{}'", codec.program()))?;
        let plain = decompressor
            .stdout
            .take()
            .context("decompressor has no stdout")?;

        log::debug!(
            "Running: {} -dc {} | dd of={} bs={}",
            codec.program(),
            image.display(),
            device.display(),
            block_size
        );
        let dd = Self::spawn_second(
            &mut decompressor,
            dd_command()
                .arg(format!("of={}", device.display()))
                .arg(format!("bs={block_size}"))
                .stdin(Stdio::from(plain))
                .stdout(Stdio::null())
                .stderr(Stdio::piped()),
        )?;
        Self::finish(decompressor, dd)
    }
}

impl Provisioner<'_> {
    /// Image path for a read (`for_read`) or write, checked before any device
    /// is touched.
    pub(super) fn resolve_image_path(&self, for_read: bool) -> Result<PathBuf> {
        let config = self.config;
        let conventional = config.default_image_name();
        let Some(given) = &config.image_file else {
            bail!("No image file specified (use --imagefile, e.g. {})", conventional);
        };

        let mut image = if given.is_dir() {
            given.join(&conventional)
        } else {
            given.clone()
        };

        if for_read {
            let ext = config.codec.extension();
            if !image.to_string_lossy().ends_with(ext) {
                let mut name = image.clone().into_os_string();
                name.push(ext);
                image = PathBuf::from(name);
            }
            let parent = match image.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            if !parent.is_dir() {
                bail!("Cannot create {}: no directory {}", image.display(), parent.display());
            }
        } else {
            if !image.is_file() {
                bail!("Cannot find image file {}", image.display());
            }
            File::open(&image)
                .with_context(|| format!("Cannot read image file {}", image.display()))?;
        }
        Ok(image)
    }

    fn require_device_node(&self) -> Result<PathBuf> {
        let device = self.device().path;
        if !device.exists() {
            bail!("Device {} not found", device.display());
        }
        Ok(device)
    }

    /// Imaging needs the whole device quiet.
    fn unmount_for_imaging(&self) -> Result<()> {
        self.device_engaged.set(true);
        if self.volumes.mount_point(&self.config.device_name())?.is_some() {
            self.unmount_partitions()?.log();
        }
        Ok(())
    }

    pub(super) fn read_usb_into(&self) -> Result<Outcome> {
        let image = self.resolve_image_path(true)?;
        let device = self.require_device_node()?;
        self.unmount_for_imaging()?;

        let config = self.config;
        log::info!("Reading {} into {}", device.display(), image.display());
        let start = Instant::now();
        let status = self
            .imager
            .read_device(&device, &image, &config.block_size, config.codec)?;
        println!(
            "[+] Finished reading {} into {} in {}",
            device.display(),
            image.display(),
            format_elapsed(start.elapsed())
        );

        if !status.success {
            return Ok(Outcome::Reported(format!(
                "Failed to read {} (exit code {}): {}",
                device.display(),
                status.code.unwrap_or(-1),
                status.stderr.trim()
            )));
        }
        Ok(Outcome::Done)
    }

    pub(super) fn write_usb_from(&self) -> Result<Outcome> {
        let image = self.resolve_image_path(false)?;
        let device = self.require_device_node()?;
        self.unmount_for_imaging()?;

        let config = self.config;
        log::info!("Writing {} to {}", image.display(), device.display());
        let start = Instant::now();
        let status = self
            .imager
            .write_device(&image, &device, &config.block_size, config.codec)?;
        println!(
            "[+] Finished writing {} to {} in {}",
            image.display(),
            device.display(),
            format_elapsed(start.elapsed())
        );

        if status.success {
            return Ok(Outcome::Done);
        }
        if status.stderr.contains(defs::NO_SPACE_MARKER) {
            return Ok(Outcome::Benign(format!(
                "Reached the end of {} before the end of the image",
                device.display()
            )));
        }
        bail!(
            "Writing {} failed (exit code {}): {}",
            device.display(),
            status.code.unwrap_or(-1),
            status.stderr.trim()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{cli::Action, core::testing::Harness};

    fn have_tool(program: &str) -> bool {
        Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    #[test]
    fn dd_runs_in_c_locale() {
        let cmd = dd_command();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.ends_with(&["LC_ALL=C".to_string(), "dd".to_string()]), "{args:?}");
    }

    #[test]
    fn writing_past_end_of_real_device_is_benign() {
        let full = Path::new("/dev/full");
        if !utils::is_root() || !full.exists() || !have_tool("bzip2") {
            return;
        }
        let mut h = Harness::new();
        let raw = h.root().join("install.dd");
        fs::write(&raw, vec![0u8; 4 << 20]).unwrap();
        let status = Command::new("bzip2").arg("-k").arg(&raw).status().unwrap();
        assert!(status.success());
        let image = h.root().join("install.dd.bz2");

        let status = DdPipeline
            .write_device(&image, full, &BlockSize::default(), Codec::Bzip2)
            .unwrap();
        assert!(!status.success);
        assert!(status.stderr.contains(defs::NO_SPACE_MARKER), "{}", status.stderr);

        h.config.image_file = Some(image);
        h.config.device = full.to_string_lossy().into_owned();
        let p = h.provisioner_with_imager(&DdPipeline);
        assert!(matches!(p.write_usb_from().unwrap(), Outcome::Benign(_)));
        assert_eq!(p.execute(Action::WriteUsbFrom), 0);
    }

    #[test]
    fn missing_imagefile_touches_nothing() {
        let h = Harness::new();
        let p = h.provisioner();

        assert_eq!(p.execute(Action::ReadUsbInto), 1);
        assert_eq!(p.execute(Action::WriteUsbFrom), 1);
        assert!(h.volumes.calls.borrow().is_empty());
        assert!(h.imager.calls.borrow().is_empty());
    }

    #[test]
    fn missing_imagefile_error_names_conventional_file() {
        let h = Harness::new();
        let err = h.provisioner().resolve_image_path(true).unwrap_err().to_string();
        assert!(err.contains("ubuntu-14.04.5-install.dd.bz2"), "{err}");
    }

    #[test]
    fn read_path_gains_codec_extension() {
        let mut h = Harness::new();
        h.config.image_file = Some(h.root().join("backup"));
        assert_eq!(
            h.provisioner().resolve_image_path(true).unwrap(),
            h.root().join("backup.dd.bz2")
        );

        h.config.image_file = Some(h.root().join("backup.dd.bz2"));
        assert_eq!(
            h.provisioner().resolve_image_path(true).unwrap(),
            h.root().join("backup.dd.bz2")
        );
    }

    #[test]
    fn directory_imagefile_uses_conventional_name() {
        let mut h = Harness::new();
        h.config.image_file = Some(h.root().to_path_buf());
        h.config.codec = Codec::Xz;
        assert_eq!(
            h.provisioner().resolve_image_path(true).unwrap(),
            h.root().join("ubuntu-14.04.5-install.dd.xz")
        );
    }

    #[test]
    fn write_needs_existing_image() {
        let mut h = Harness::new();
        h.config.image_file = Some(h.root().join("absent.dd.bz2"));
        let p = h.provisioner();
        assert_eq!(p.execute(Action::WriteUsbFrom), 1);
        assert!(h.imager.calls.borrow().is_empty());
    }

    #[test]
    fn read_unmounts_device_first() {
        let mut h = Harness::new();
        h.config.image_file = Some(h.root().join("snapshot"));
        let p = h.provisioner();
        p.mount_partitions().unwrap();

        assert_eq!(p.execute(Action::ReadUsbInto), 0);
        assert!(h.volumes.mount_point_of("sdb").is_none());
        let calls = h.imager.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("read "), "{calls:?}");
        assert!(calls[0].ends_with("snapshot.dd.bz2"), "{calls:?}");
    }

    #[test]
    fn failed_read_is_reported_without_failing_the_run() {
        let mut h = Harness::new();
        h.config.image_file = Some(h.root().join("snapshot"));
        *h.imager.status.borrow_mut() = PipelineStatus {
            success: false,
            code: Some(1),
            stderr: "dd: error reading '/dev/sdb': Input/output error".into(),
        };
        let p = h.provisioner();

        match p.read_usb_into().unwrap() {
            Outcome::Reported(reason) => assert!(reason.contains("Input/output error"), "{reason}"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(p.execute(Action::ReadUsbInto), 0);
    }

    #[test]
    fn no_space_at_end_of_device_is_benign() {
        let mut h = Harness::new();
        let image = h.root().join("install.dd.bz2");
        fs::write(&image, b"BZh").unwrap();
        h.config.image_file = Some(image);
        *h.imager.status.borrow_mut() = PipelineStatus {
            success: false,
            code: Some(1),
            stderr: "dd: error writing '/dev/sdb': No space left on device\n".into(),
        };
        let p = h.provisioner();

        assert!(matches!(p.write_usb_from().unwrap(), Outcome::Benign(_)));
        assert_eq!(p.execute(Action::WriteUsbFrom), 0);
    }

    #[test]
    fn other_write_failures_are_fatal() {
        let mut h = Harness::new();
        let image = h.root().join("install.dd.bz2");
        fs::write(&image, b"BZh").unwrap();
        h.config.image_file = Some(image);
        *h.imager.status.borrow_mut() = PipelineStatus {
            success: false,
            code: Some(2),
            stderr: "bzip2: Data integrity error when decompressing.".into(),
        };
        assert_eq!(h.provisioner().execute(Action::WriteUsbFrom), 1);
    }
}
