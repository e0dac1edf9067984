use clap::Parser;

use page_monitor::cli::{self, Cli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    page_monitor::init_logging();

    log::info!("page-monitor starting up...");

    if let Err(err) = cli::run(cli).await {
        log::error!("Fatal: {err:#}");
        return Err(err);
    }
    Ok(())
}
