// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use clap::Parser;
use cli::Cli;

mod cli;
mod commands;
mod logging;
mod notifier;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _logger = logging::init()?;

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    let args = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(commands::dispatch(args))
}
