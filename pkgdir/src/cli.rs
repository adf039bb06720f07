// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use clap_complete::{
    generate_to,
    shells::{Bash, Fish, Zsh},
};
use clap_mangen::Man;
use fs_err::{self as fs, File};
use thiserror::Error;

mod build;
mod rebuild;
mod search;
mod serve;
mod status;

use crate::settings;

#[derive(Debug, Parser)]
#[command(name = "pkgdir", version, about = "Package-directory service build orchestrator")]
pub struct Command {
    #[command(flatten)]
    pub global: Global,
    #[command(subcommand)]
    pub subcommand: Option<Subcommand>,
}

#[derive(Debug, clap::Args)]
pub struct Global {
    #[arg(long, global = true, help = "Directory holding pkgdir's YAML config files")]
    pub config_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "<level>[:format][:destination], e.g. debug:json:/var/log/pkgdir.log"
    )]
    pub log: String,
    #[arg(long, global = true, hide = true)]
    pub generate_manpages: Option<PathBuf>,
    #[arg(long, global = true, hide = true)]
    pub generate_completions: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Run the manifest poller and watchdog forever, serving builds on demand
    Serve(serve::Command),
    /// Request a build and wait for it to leave the waiting/building state
    Build(build::Command),
    /// Print a package's current build status
    Status(status::Command),
    /// Search packages by name, tag, or description word
    Search(search::Command),
    /// Force a rebuild of one package, bypassing the expiry check
    Rebuild(rebuild::Command),
}

pub async fn process() -> Result<(), Error> {
    let Command { global, subcommand } = Command::parse();

    if let Some(dir) = global.generate_manpages {
        generate_manpages(&dir)?;
        return Ok(());
    }

    if let Some(dir) = global.generate_completions {
        generate_completions(&dir)?;
        return Ok(());
    }

    let log_config: tracing_common::LogConfig = global.log.parse().map_err(Error::Log)?;
    tracing_common::init_with_config(log_config);

    let settings = settings::load(global.config_dir.as_deref());

    match subcommand {
        Some(Subcommand::Serve(command)) => serve::handle(command, settings).await?,
        Some(Subcommand::Build(command)) => build::handle(command, settings).await?,
        Some(Subcommand::Status(command)) => status::handle(command, settings).await?,
        Some(Subcommand::Search(command)) => search::handle(command, settings).await?,
        Some(Subcommand::Rebuild(command)) => rebuild::handle(command, settings).await?,
        None => {
            Command::command().print_help().map_err(Error::Clap)?;
            println!();
        }
    }

    Ok(())
}

fn generate_manpages(dir: &std::path::Path) -> Result<(), Error> {
    fs::create_dir_all(dir)?;
    let main_cmd = Command::command();

    let main_man = Man::new(main_cmd.clone());
    let mut buffer = File::create(dir.join("pkgdir.1"))?;
    main_man.render(&mut buffer)?;

    for sub in main_cmd.get_subcommands() {
        let sub_man = Man::new(sub.clone());
        let mut buffer = File::create(dir.join(format!("pkgdir-{}.1", sub.get_name())))?;
        sub_man.render(&mut buffer)?;
    }

    Ok(())
}

fn generate_completions(dir: &std::path::Path) -> Result<(), Error> {
    fs::create_dir_all(dir)?;
    let mut cmd = Command::command();
    generate_to(Bash, &mut cmd, "pkgdir", dir)?;
    generate_to(Fish, &mut cmd, "pkgdir", dir)?;
    generate_to(Zsh, &mut cmd, "pkgdir", dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse --log")]
    Log(String),
    #[error("serve")]
    Serve(#[from] serve::Error),
    #[error("build")]
    Build(#[from] build::Error),
    #[error("status")]
    Status(#[from] status::Error),
    #[error("search")]
    Search(#[from] search::Error),
    #[error("rebuild")]
    Rebuild(#[from] rebuild::Error),
    #[error("render clap output")]
    Clap(#[source] std::io::Error),
    #[error("io")]
    Io(#[from] std::io::Error),
}
