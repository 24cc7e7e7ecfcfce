use anyhow::Context;
use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use gantry_conf::Options;

use crate::args::Args;
use crate::commands::resolve_folder;
use crate::commands::Command;
use crate::exit::Exit;

#[derive(Debug, Parser)]
pub struct Config {
    /// Folder whose settings to print. Defaults to the current directory.
    folder: Option<Utf8PathBuf>,
}

impl Command for Config {
    fn execute(&self, args: &Args) -> Result<Exit> {
        let folder = resolve_folder(self.folder.as_deref())?;
        let options = Options::load(folder.as_std_path())
            .with_context(|| format!("Failed to load settings for {folder}"))?;
        let toml = options.to_toml().context("Failed to serialize settings")?;
        if !args.global.quiet {
            print!("{toml}");
        }
        Ok(Exit::success())
    }
}
