use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use weft::cli::{Arguments, ExitStatus};

fn main() -> ExitCode {
    let args = Arguments::parse();

    if args.verbose() {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("weft=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return ExitStatus::Error.into();
        }
    };

    match runtime.block_on(weft::cli::run(args)) {
        Ok(status) => status.into(),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitStatus::Error.into()
        }
    }
}
