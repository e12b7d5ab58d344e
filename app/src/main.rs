mod cli;
mod repl;

use asis_core::error::AppError;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenv::dotenv().ok();

    // Logs go to stderr so they never interleave with the chat transcript.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match cli.overrides.load() {
        Ok(s) => s,
        Err(e) => {
            let details = e.details.as_deref().unwrap_or("");
            error!(code = %e.code, details, "invalid configuration");
            eprintln!("{}", e.user_message());
            return Err(e);
        }
    };

    let result = match cli.command {
        Command::Chat => repl::run_chat(settings).await,
        Command::Imc => repl::run_imc(settings).await,
    };
    if let Err(e) = &result {
        error!(code = %e.code, details = e.details.as_deref().unwrap_or(""), "asistente stopped");
        eprintln!("{}", e.user_message());
    }
    result
}
