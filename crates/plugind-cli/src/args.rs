use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "plugind")]
#[command(about = "Install and track git-backed CI plugins")]
#[command(version)]
pub struct Cli {
    /// Verbose output (debug logs)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Base directory (default: ~/.plugind)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    /// Plugin catalog (default: <base_dir>/catalog.json)
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List cataloged plugins and their status
    List,

    /// Show one plugin
    Show {
        /// Plugin name
        name: String,
    },

    /// Install or update a plugin to its latest tag
    Install {
        /// Plugin name
        name: String,

        /// Run in the background and follow status events
        /// (Ctrl-C requests a stop)
        #[arg(long)]
        follow: bool,
    },

    /// Install or update every cataloged plugin in the background
    InstallAll,

    /// Request cancellation of a plugin install
    Stop {
        /// Plugin name
        name: String,
    },

    /// Put a plugin back to PENDING (e.g. after ERROR)
    Reset {
        /// Plugin name
        name: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g., install.on_failure)
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key (e.g., install.on_failure)
        key: String,

        /// Value to set (e.g., "pending")
        value: String,
    },

    /// List all config values
    List,

    /// Show config file path
    Path,

    /// Create config file with defaults
    Init,
}
