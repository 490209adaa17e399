//! Command-line interface definitions and helpers.
//!
//! This module contains argument parsing, request building, and the config
//! subcommand handlers.

mod args;
mod commands;

pub use args::{Args, Command, ConfigAction};
pub use commands::{
    build_request, default_output_name, handle_config_action, read_story, scenes_json_path, write_breakdown,
    CliError,
};
