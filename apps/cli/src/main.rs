//! listingscout CLI: scrape, store, and clean real-estate listings.
//!
//! Walks the listing site's menu pages, scrapes every listing into a
//! versioned libSQL database, and exports a cleaned CSV.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = commands::load_app_config(&cli)?;
    commands::init_tracing(&cli, &config.logging.level);
    commands::run(cli, config).await
}
