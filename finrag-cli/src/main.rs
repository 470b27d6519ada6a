//! `finrag`: ingest financial documents and ask questions about them.

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use finrag::RagError;

use crate::cli::{Cli, Commands};
use crate::commands::Context;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    finrag_telemetry::init_with_format("finrag", cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<RagError>() {
                Some(rag) => {
                    tracing::error!(kind = ?rag.kind(), error = %rag, "command failed");
                    eprintln!("error: {}", rag.user_message());
                }
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.rag_config()?;
    // Health needs the inference backend only.
    if matches!(cli.command, Commands::Health) {
        commands::health().await?;
        return Ok(());
    }
    let embedder = commands::build_embedder(cli.embedder).await?;
    let ctx = Context { config, embedder, index_dir: cli.index_dir };

    match cli.command {
        Commands::Ingest { files } => commands::ingest(&ctx, &files).await?,
        Commands::Query { question, .. } => commands::query(&ctx, question).await?,
        Commands::Stats => commands::stats(&ctx).await?,
        Commands::Reset => commands::reset(&ctx).await?,
        Commands::Health => {}
    }
    Ok(())
}
