use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod credentials;
mod envfile;
mod platform;
mod provision;
mod report;
mod resource;
mod tables;
mod util;
mod workflow;

fn main() -> ExitCode {
    let args = cli::RootArgs::parse();
    init_tracing(args.verbose);
    match workflow::run(args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {}", report::error_chain_message(&err));
            ExitCode::from(report::exit_code_for_error(&err))
        }
    }
}

/// Logs go to stderr so reports on stdout stay machine-readable.
fn init_tracing(verbose: bool) {
    let default = if verbose { "envprov=debug" } else { "envprov=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
