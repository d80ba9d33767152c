//! Curio CLI — resilient checkpointed enrichment for museum datasets.
//!
//! Fetches object metadata from public collection APIs, generates
//! embeddings for artwork records, and bulk-indexes the results,
//! surviving interruption at any point via durable checkpoints.

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
