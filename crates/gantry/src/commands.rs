mod config;
mod inspect;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use clap::Subcommand;

use crate::args::Args;
use crate::exit::Exit;

pub trait Command {
    fn execute(&self, args: &Args) -> Result<Exit>;
}

#[derive(Debug, Subcommand)]
pub enum GantryCommand {
    /// Load a folder and report how its workspace was resolved
    Inspect(self::inspect::Inspect),
    /// Print the effective settings for a folder
    Config(self::config::Config),
}

impl Command for GantryCommand {
    fn execute(&self, args: &Args) -> Result<Exit> {
        match self {
            GantryCommand::Inspect(command) => command.execute(args),
            GantryCommand::Config(command) => command.execute(args),
        }
    }
}

/// The absolute, symlink-free form of `folder`, or of the current directory.
fn resolve_folder(folder: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    let folder = match folder {
        Some(folder) => folder.to_owned(),
        None => {
            let cwd = std::env::current_dir().context("Failed to read the current directory")?;
            Utf8PathBuf::from_path_buf(cwd)
                .map_err(|path| anyhow::anyhow!("{} is not valid UTF-8", path.display()))?
        }
    };
    folder
        .canonicalize_utf8()
        .with_context(|| format!("Failed to resolve folder {folder}"))
}
