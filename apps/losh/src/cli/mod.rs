//! # losh CLI Module
//!
//! This module implements the CLI interface for the catalog tool.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new database
//! - `import` - Save a JSON entity tree (or a list of trees) into the database
//! - `export` - Write a stored entity and everything it references as JSON
//! - `order` - Show the order in which a JSON tree would be written
//! - `status` - Show record counts per kind
//! - `config` - Show or write the configuration file

mod commands;

use crate::config::LoshConfig;
use clap::{Parser, Subcommand};
use losh_core::{Kind, LoshError, Uid};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// losh - open-hardware catalog tool
///
/// Moves catalog entity graphs between JSON trees and a local database,
/// writing every record after the records it depends on.
#[derive(Parser, Debug)]
#[command(name = "losh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database (overrides the config file)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Path to the config file (default: ./losh.toml if present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Save a JSON entity tree into the database
    Import {
        /// Path to the JSON file (one tree or a list of trees)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Export a stored entity graph as a JSON tree
    Export {
        /// Store identifier of the root entity (0x-hex or decimal)
        #[arg(long, conflicts_with_all = ["kind", "alt"])]
        id: Option<Uid>,

        /// Kind of the root entity, used with --alt
        #[arg(short, long, requires = "alt")]
        kind: Option<Kind>,

        /// Alternate key of the root entity, used with --kind
        #[arg(short, long, requires = "kind")]
        alt: Option<String>,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the write order for a JSON entity tree without saving it
    Order {
        /// Path to the JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show database status
    Status,

    /// Show or write the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `config` subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write the effective configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Configuration with command-line overrides applied.
    pub fn effective_config(&self, mut config: LoshConfig) -> LoshConfig {
        if let Some(database) = &self.database {
            config.database.clone_from(database);
        }
        config
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli, config: LoshConfig) -> Result<(), LoshError> {
    let config = cli.effective_config(config);
    let out = Output {
        json_mode: cli.json_mode,
        quiet: cli.quiet,
    };

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&config, out, force),
        Some(Commands::Import { file }) => cmd_import(&config, out, &file),
        Some(Commands::Export {
            id,
            kind,
            alt,
            output,
        }) => {
            let root = match (id, kind, alt) {
                (Some(uid), _, _) => RootSelector::Id(uid),
                (None, Some(kind), Some(alt)) => RootSelector::Alt(kind, alt),
                _ => {
                    return Err(LoshError::InvalidInput(
                        "export needs --id or both --kind and --alt".to_string(),
                    ));
                }
            };
            cmd_export(&config, out, &root, output.as_deref())
        }
        Some(Commands::Order { file }) => cmd_order(&config, out, &file),
        Some(Commands::Config { action }) => match action {
            ConfigAction::Show => cmd_config_show(&config),
            ConfigAction::Init { force } => {
                let path = cli
                    .config
                    .unwrap_or_else(|| PathBuf::from(crate::config::DEFAULT_CONFIG_FILE));
                cmd_config_init(&config, out, &path, force)
            }
        },
        // No subcommand - show status by default
        Some(Commands::Status) | None => cmd_status(&config, out),
    }
}
