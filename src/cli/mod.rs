//! CLI module for Freshen
//!
//! Provides command-line interface for checking, listing and updating
//! installed applications.

mod commands;
mod output;

use clap::{Parser, Subcommand};

use crate::config::SortOrder;
use commands::apps::ListOptions;

pub use output::OutputFormat;

/// Freshen - keeps installed applications up to date
#[derive(Parser, Debug)]
#[command(name = "freshen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[command(flatten)]
    pub output: OutputOptions,

    /// Without a command, checks for updates (or lists apps when
    /// `scan.check_on_startup` is off)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output formatting options
#[derive(Parser, Debug, Clone)]
pub struct OutputOptions {
    /// Output in JSON format (for machine parsing)
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase output verbosity
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl OutputOptions {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }

    /// Default log filter when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "freshen=debug,info"
        } else if self.quiet {
            "warn"
        } else {
            "freshen=info,warn"
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan installed apps and check them for updates
    Check {
        /// Only show apps whose name contains this text
        #[arg(long)]
        filter: Option<String>,

        /// Also show up-to-date, unsupported and ignored apps
        #[arg(long)]
        all: bool,

        /// Sort apps by `name` or `update_date` (overrides the config)
        #[arg(long)]
        sort: Option<SortOrder>,
    },

    /// List installed apps without checking for updates
    List {
        /// Only show apps whose name contains this text
        #[arg(long)]
        filter: Option<String>,

        /// Also show unsupported and ignored apps
        #[arg(long)]
        all: bool,

        /// Sort apps by `name` or `update_date` (overrides the config)
        #[arg(long)]
        sort: Option<SortOrder>,
    },

    /// Update apps
    Update {
        /// Identifiers of the apps to update
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,

        /// Update every app with an available update
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },

    /// Stop offering updates for an app
    Ignore {
        /// App identifier
        id: String,
    },

    /// Offer updates for a previously ignored app again
    Unignore {
        /// App identifier
        id: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: commands::config::ConfigCommands,
    },
}

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = cli.output.format();
    let quiet = cli.output.quiet;

    let Some(command) = cli.command else {
        let config = crate::config::Config::load()?;
        return if config.scan.check_on_startup {
            commands::apps::check(ListOptions::default(), format, quiet).await
        } else {
            commands::apps::list(ListOptions::default(), format, quiet).await
        };
    };

    match command {
        Commands::Check { filter, all, sort } => {
            commands::apps::check(ListOptions { filter, all, sort }, format, quiet).await
        }
        Commands::List { filter, all, sort } => {
            commands::apps::list(ListOptions { filter, all, sort }, format, quiet).await
        }
        Commands::Update { ids, all } => commands::update::run(ids, all, format, quiet).await,
        Commands::Ignore { id } => commands::apps::set_ignored(&id, true, format, quiet).await,
        Commands::Unignore { id } => commands::apps::set_ignored(&id, false, format, quiet).await,
        Commands::Config { command } => commands::config::run(command, format, quiet).await,
    }
}
