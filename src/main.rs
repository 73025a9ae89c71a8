use anyhow::Result;
use bucketguard::cli;
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if let Err(err) = cli::dispatch(args).await {
        error!("{:#}", err);
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
    Ok(())
}
