// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use chatprobe_core::auth::inspect::inspect_token;
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};

mod cli;
mod logging;
mod shell;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    // Optional .env with CHATPROBE_* settings
    dotenvy::dotenv().ok();
    logging::init()?;

    let args = Cli::parse();

    match &args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Commands::InspectToken(token) => {
            let credential = token.resolve()?;
            print!("{}", inspect_token(credential.expose(), Utc::now()));
        }
        Commands::Connect(session) => {
            let credential = session.token.resolve()?;
            let config = session.config();
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(shell::run(config, credential))?;
        }
    }

    Ok(())
}
