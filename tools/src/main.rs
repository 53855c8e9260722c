mod config;
mod logger;
mod run;

use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "reap")]
enum Cli {
    /// run a command with a reaper collecting its children
    Run(run::Run),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init();

    let code = match cli {
        Cli::Run(v) => run::run(v).await?,
    };

    std::process::exit(code);
}
