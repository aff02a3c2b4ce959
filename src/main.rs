//! cssprite - Command-line tool for generating CSS sprite sheets

use std::process::ExitCode;

use cssprite::cli;

fn main() -> ExitCode {
    cli::run()
}
