use std::process::exit;

use colored::Colorize;

fn main() {
    if let Err(err) = clamps::run_program() {
        eprintln!("{}", format!("{err:#}").red());
        exit(1);
    }
}
