//! lhpc - interactive application launcher for SLURM clusters.

mod commands;
mod console;
mod error;
mod logging;

use clap::Parser;
use lhpc_cli::Args;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match commands::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}
