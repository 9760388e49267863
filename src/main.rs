use clap::Parser;
use ferry::cli::{self, Args};
use ferry::logging;

#[tokio::main]
async fn main() -> ferry::Result<()> {
    let args = Args::parse();
    let _guard = logging::init(&args.command)?;
    cli::run(args).await
}
