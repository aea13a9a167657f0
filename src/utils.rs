// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    ffi::OsStr,
    fs::{create_dir_all, remove_dir_all},
    path::Path,
    process::{Command, Output},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;

pub fn init_logging(verbose: bool, debug: bool) -> Result<()> {
    let level = if debug {
        log::LevelFilter::Debug
    } else if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    use std::io::Write;

    let mut builder = env_logger::Builder::new();

    builder.format(|buf, record| {
        let marker = match record.level() {
            log::Level::Error | log::Level::Warn => "[!]",
            _ => "[+]",
        };
        writeln!(buf, "{} {}", marker, record.args())
    });
    builder
        .target(env_logger::Target::Stdout)
        .filter_level(level)
        .try_init()
        .context("Failed to initialise logger")?;
    Ok(())
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Build a command that runs with root privileges, going through `sudo`
/// unless we already are root.
pub fn privileged<S: AsRef<OsStr>>(program: S) -> Command {
    if is_root() {
        Command::new(program)
    } else {
        let mut cmd = Command::new("sudo");
        cmd.arg(program);
        cmd
    }
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run to completion, relaying output at debug level. Non-zero exit is an error
/// carrying the tool's stderr.
pub fn run_checked(cmd: &mut Command) -> Result<Output> {
    let line = describe(cmd);
    log::debug!("Running: {}", line);
    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute '{line}'. Is it installed?"))?;

    log_lines(&output.stdout);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            bail!("'{}' failed (exit code {})", line, output.status.code().unwrap_or(-1));
        }
        bail!(
            "'{}' failed (exit code {}): {}",
            line,
            output.status.code().unwrap_or(-1),
            stderr
        );
    }
    log_lines(&output.stderr);
    Ok(output)
}

pub fn log_lines(bytes: &[u8]) {
    let s = String::from_utf8_lossy(bytes);
    for line in s.lines() {
        if !line.trim().is_empty() {
            log::debug!("{}", line);
        }
    }
}

pub fn ensure_dir_exists<T: AsRef<Path>>(dir: T) -> Result<()> {
    if !dir.as_ref().exists() {
        create_dir_all(&dir)?;
    }
    Ok(())
}

pub fn cleanup_temp_dir(temp_dir: &Path) {
    if temp_dir.exists()
        && let Err(e) = remove_dir_all(temp_dir)
    {
        log::warn!(
            "Failed to clean up temp dir {}: {:#}",
            temp_dir.display(),
            e
        );
    }
}

/// `H:MM:SS.ffffff`, the way long device copies are reported.
pub fn format_elapsed(elapsed: Duration) -> String {
    let delta = TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::MAX);
    let hours = delta.num_hours();
    let minutes = delta.num_minutes() % 60;
    let seconds = delta.num_seconds() % 60;
    let micros = delta.subsec_nanos() / 1_000;
    format!("{hours}:{minutes:02}:{seconds:02}.{micros:06}")
}
