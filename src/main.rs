use clap::Parser;
use mosmix_processor::cli::{run, Cli};
use mosmix_processor::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
