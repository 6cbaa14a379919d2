use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::OptionExt;

#[derive(Parser)]
pub enum Options {
    Start(start::Start),
    Reset(reset::Reset),
}

// One module per top-level subcommand
mod reset;
mod start;

pub trait Run {
    fn run(self) -> impl Future<Output = color_eyre::Result<()>> + Send;
}

impl Run for Options {
    async fn run(self) -> color_eyre::Result<()> {
        match self {
            Self::Start(start) => start.run().await,
            Self::Reset(reset) => reset.run().await,
        }
    }
}

/// The data directory: an explicit --home, or the platform-local default.
pub fn home_dir(home: Option<PathBuf>) -> color_eyre::Result<PathBuf> {
    if let Some(home) = home {
        return Ok(home);
    }
    let directories = directories::ProjectDirs::from("org", "amolabs", "amo")
        .ok_or_eyre("could not determine internal storage directory")?;
    Ok(directories.data_local_dir().to_path_buf())
}
