use clap::Parser;
use retire_plan::cli::{self, Args};
use std::process::ExitCode;
use tracing::{debug, error};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.log_level();
    cli::init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
