//! Command-line interface.

mod commands;

pub use commands::{
    latex_runner, musicsheet_runner, parse_cli, run_with_cli, webpage_runner, Cli, Commands,
};
