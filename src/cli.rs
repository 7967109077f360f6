//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the node binary.

use clap::{Parser, Subcommand};

/// Shepherd - distributed llama.cpp orchestration node
///
/// Runs as standalone, client, master, or hybrid (spec §4.4), hosting local
/// models and/or coordinating a fleet of worker nodes.
#[derive(Parser, Debug)]
#[command(name = "shepherd")]
#[command(author, version, about = "Distributed llama.cpp orchestration node", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the node
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the node (starts the subsystems its configured role activates)
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "SHEPHERD_CONFIG")]
        config: Option<String>,
    },

    /// Scan configured model paths and print the resulting catalog
    Scan {
        /// Path to configuration file
        #[arg(short, long, env = "SHEPHERD_CONFIG")]
        config: Option<String>,

        /// Scan this path instead of the configured model paths
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
