//! kbmirror CLI: mirrors knowledge-base articles into a folder of documents.
//!
//! `sync` reconciles documents against the source articles through a
//! persisted ledger; `examples` appends clustered example tickets to them.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
