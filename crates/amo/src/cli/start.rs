use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{OptionExt, WrapErr, bail};

use amo_state::abci::Application;
use amo_state::{App, AppDbs};

use super::Run;

#[derive(Parser)]
pub struct Start {
    /// Which port should the ABCI server listen on?
    #[clap(long, default_value = "26658")]
    abci: u16,
    /// Data directory (defaults to the platform-local app directory)
    #[clap(long)]
    home: Option<PathBuf>,
}

impl Run for Start {
    async fn run(self) -> color_eyre::Result<()> {
        let home = super::home_dir(self.home)?;
        tokio::fs::create_dir_all(&home)
            .await
            .wrap_err_with(|| format!("could not create data directory {}", home.display()))?;

        let app = App::new(home.join("state.json"), AppDbs::new())?;
        let (consensus, mempool, info, snapshot) = Application::new(app).split();

        let server = tower_abci::v034::ServerBuilder::default()
            .consensus(consensus)
            .mempool(mempool)
            .info(info)
            .snapshot(snapshot)
            .finish()
            .ok_or_eyre("could not construct ABCI server")?;

        info!(port = self.abci, "serving ABCI");
        server
            .listen_tcp((IpAddr::V4(Ipv4Addr::LOCALHOST), self.abci))
            .await
            .or_else(|e| {
                bail!("could not start ABCI server on port {}: {e}", self.abci);
            })?;
        Ok(())
    }
}
