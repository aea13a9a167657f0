// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;
mod conf;
mod core;
mod defs;
mod mount;
mod utils;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use crate::{
    cli::{Cli, Commands},
    conf::config::{ArchiverKind, Config},
    core::{
        Backends, Provisioner,
        files::{FileOps, LocalFiles, PrivilegedFiles},
        image::DdPipeline,
        sync::{Archiver, NativeMirror, Rsync},
    },
    defs::CONFIG_FILE_DEFAULT,
    mount::udisks::Udisks,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(config_path) = &cli.config {
        return Config::from_file(config_path);
    }

    match Config::load_default() {
        Ok(config) => Ok(config),
        Err(e) => {
            if Path::new(CONFIG_FILE_DEFAULT).exists() {
                eprintln!("Error loading config: {:#}", e);
            }
            Ok(Config::default())
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        match command {
            Commands::GenConfig { output } => {
                Config::default().save_to_file(output)?;
                return Ok(0);
            }
            Commands::ShowConfig => {
                let mut config = load_config(&cli)?;
                config.merge_with_cli(&cli);
                println!("{}", serde_json::to_string(&config)?);
                return Ok(0);
            }
        }
    }

    if cli.usage {
        println!("{}", Cli::command().render_usage());
        println!();
        println!("{}", cli::EXTRA_USAGE);
        return Ok(0);
    }

    let mut config = load_config(&cli)?;
    config.merge_with_cli(&cli);
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    config.anchor_paths(&cwd);

    utils::init_logging(config.verbose, config.debug)?;

    let action = cli.action();
    log::debug!("Configuration: {:?}", config);

    let volumes = Udisks::new(&config.by_label_dir);
    let files: &dyn FileOps = if utils::is_root() {
        &LocalFiles
    } else {
        &PrivilegedFiles
    };
    let archiver: &dyn Archiver = match config.archiver {
        ArchiverKind::Rsync => &Rsync,
        ArchiverKind::Native => &NativeMirror,
    };

    let provisioner = Provisioner::new(
        &config,
        Backends {
            volumes: &volumes,
            files,
            archiver,
            imager: &DdPipeline,
        },
    );
    Ok(provisioner.execute(action))
}

fn main() {
    match run() {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            log::error!("Fatal Error: {:#}", e);
            eprintln!("[!] Fatal Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
