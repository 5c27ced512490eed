#![forbid(unsafe_code)]

//! `fdm` command-line entrypoint.

mod cli_app;

use clap::Parser;

fn main() {
    let cli = cli_app::Cli::parse();
    if let Err(err) = cli_app::run(&cli) {
        eprintln!("fdm: {err}");
        std::process::exit(err.exit_code());
    }
}
