#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use clap::Parser as _;
use datum_schema_cli::{Args, run};

fn main() -> std::process::ExitCode {
    pretty_env_logger::init_custom_env("DATUM_LOG");

    let args = Args::parse();

    match run(&args) {
        Ok(output) => {
            print!("{output}");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            eprintln!("Error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
