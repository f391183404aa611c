//! CLI interface for Vigil
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for controlling the Vigil engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vigil project assistant engine
///
/// An autonomous agent that watches a project directory, turns changes
/// into tasks, and executes generated plans inside the project sandbox.
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the default configuration for a project
    Init {
        /// Project root directory (default: current directory)
        #[arg(long, value_name = "PATH", default_value = ".")]
        project_root: PathBuf,
    },

    /// Run the engine in the foreground until interrupted
    Run {
        /// Project root directory (default: current directory)
        #[arg(long, value_name = "PATH", default_value = ".")]
        project_root: PathBuf,
    },

    /// Show task queue statistics for a project
    Status {
        /// Project root directory (default: current directory)
        #[arg(long, value_name = "PATH", default_value = ".")]
        project_root: PathBuf,
    },
}
