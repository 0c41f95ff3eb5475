//! # Postcoord CLI Module
//!
//! This module implements the CLI interface for the expression repository.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new database
//! - `create` - Create expressions, all or nothing
//! - `check` - Process expressions without persisting them
//! - `lookup` - Find a stored expression
//! - `list` - List stored expressions
//! - `status` - Show repository status

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand};
use postcoord_core::RepositoryError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Postcoord - post-coordinated expression repository
///
/// Canonicalizes SNOMED CT compositional grammar expressions, materializes
/// them as a deduplicated concept graph and stores them all or nothing.
#[derive(Parser, Debug)]
#[command(name = "postcoord")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the expression database
    #[arg(short = 'D', long, global = true, default_value = "postcoord.redb")]
    pub database: PathBuf,

    /// Path to the TOML configuration (defaults to ./postcoord.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Branch to read and write (overrides the configured branch)
    #[arg(short, long, global = true)]
    pub branch: Option<String>,

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

    /// Create expressions; nothing is stored if any of them fails
    Create {
        /// Expressions in compositional grammar
        expressions: Vec<String>,

        /// Read expressions from a file, one per line (# starts a comment)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Process expressions without persisting them
    Check {
        /// Expressions in compositional grammar
        expressions: Vec<String>,

        /// Read expressions from a file, one per line (# starts a comment)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Look up a stored expression by its close-to-user form
    Lookup {
        /// Expression in compositional grammar
        expression: String,
    },

    /// List stored expressions
    List,

    /// Show repository status
    Status,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), RepositoryError> {
    let config = Config::load(cli.config.as_deref())?;
    let context = CommandContext {
        database: cli.database,
        branch: cli
            .branch
            .unwrap_or_else(|| config.repository.branch.clone()),
        json_mode: cli.json_mode,
        config,
    };

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&context, force),
        Some(Commands::Create { expressions, file }) => {
            cmd_create(&context, expressions, file.as_deref())
        }
        Some(Commands::Check { expressions, file }) => {
            cmd_check(&context, expressions, file.as_deref())
        }
        Some(Commands::Lookup { expression }) => cmd_lookup(&context, &expression),
        Some(Commands::List) => cmd_list(&context),
        Some(Commands::Status) => cmd_status(&context),
        None => {
            // No subcommand - show status by default
            cmd_status(&context)
        }
    }
}
