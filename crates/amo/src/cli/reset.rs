use std::path::PathBuf;

use clap::Parser;

use super::Run;

#[derive(Parser)]
pub struct Reset {
    /// Data directory (defaults to the platform-local app directory)
    #[clap(long)]
    home: Option<PathBuf>,
}

impl Run for Reset {
    async fn run(self) -> color_eyre::Result<()> {
        let home = super::home_dir(self.home)?;
        if home.exists() {
            println!("Removing data directory: {}", home.display());
            tokio::fs::remove_dir_all(&home).await?;
        } else {
            println!("Data directory does not exist: {}", home.display());
        }
        Ok(())
    }
}
