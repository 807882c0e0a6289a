// src/cli/mod.rs
//! CLI definitions for pipkin
//!
//! Commands:
//! - install: install or upgrade distributions on the target
//! - uninstall: remove distributions from the target
//! - list, show, freeze, check: inspect what the target has
//! - download, wheel: fetch archives through the index proxy
//! - cache: manage pipkin's cache directory

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pipkin")]
#[command(author, version, about = "Install MicroPython and CircuitPython packages onto boards and directories", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Show more details about the process
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Show less details about the process
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/pipkin/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the distributions go; auto-detected when none is given
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Serial port of a board running MicroPython
    #[arg(short, long, global = true, value_name = "PORT")]
    pub port: Option<String>,

    /// Mount point of a CircuitPython volume
    #[arg(short, long, global = true, value_name = "PATH")]
    pub mount: Option<PathBuf>,

    /// Local directory standing in for the board's filesystem
    #[arg(long, global = true, value_name = "PATH")]
    pub dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct IndexArgs {
    /// Base URL of the Python Package Index
    #[arg(short, long, value_name = "URL")]
    pub index_url: Option<String>,

    /// Extra index URLs to use in addition to --index-url
    #[arg(long = "extra-index-url", value_name = "URL")]
    pub extra_index_url: Vec<String>,

    /// Ignore package index, only look at --find-links
    #[arg(long)]
    pub no_index: bool,

    /// Don't consult micropython.org before PyPI
    #[arg(long)]
    pub no_mp_org: bool,

    /// Directory or HTML page with links to archives
    #[arg(short, long, value_name = "URL")]
    pub find_links: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Package specifications
    #[arg(value_name = "SPEC")]
    pub specs: Vec<String>,

    /// Install from the given requirements file
    #[arg(short, long = "requirement", value_name = "FILE")]
    pub requirement: Vec<PathBuf>,

    /// Constrain versions using the given constraints file
    #[arg(short, long = "constraint", value_name = "FILE")]
    pub constraint: Vec<PathBuf>,

    /// Don't install package dependencies
    #[arg(long)]
    pub no_deps: bool,

    /// Include pre-release and development versions
    #[arg(long)]
    pub pre: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpgradeStrategy {
    /// Upgrade dependencies only when they don't satisfy the new requirement
    #[default]
    OnlyIfNeeded,
    /// Upgrade all dependencies
    Eager,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListFormat {
    #[default]
    Columns,
    Freeze,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show the cache directory
    Dir,
    /// Show cache size and file count
    Info,
    /// List cached archives
    List,
    /// Remove everything from the cache
    Purge,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install packages
    Install {
        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        index: IndexArgs,

        /// Upgrade all given packages to the newest available version
        #[arg(short = 'U', long)]
        upgrade: bool,

        /// How dependencies are handled when upgrading
        #[arg(long, value_enum, default_value_t = UpgradeStrategy::OnlyIfNeeded)]
        upgrade_strategy: UpgradeStrategy,

        /// Reinstall all packages even if they are up to date
        #[arg(long)]
        force_reinstall: bool,

        /// Compile sources to .mpy before copying them to the target
        #[arg(long)]
        compile: bool,

        /// mpy-cross executable used with --compile (default: from PATH)
        #[arg(long, value_name = "PATH", requires = "compile")]
        mpy_cross: Option<PathBuf>,
    },

    /// Uninstall packages
    Uninstall {
        /// Names of the distributions to remove
        #[arg(value_name = "NAME")]
        packages: Vec<String>,

        /// Uninstall all packages listed in the given requirements file
        #[arg(short, long = "requirement", value_name = "FILE")]
        requirement: Vec<PathBuf>,

        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List installed packages
    List {
        #[command(flatten)]
        index: IndexArgs,

        /// List outdated packages
        #[arg(short, long, conflicts_with = "uptodate")]
        outdated: bool,

        /// List up to date packages
        #[arg(short, long)]
        uptodate: bool,

        /// List packages that are not dependencies of installed packages
        #[arg(long)]
        not_required: bool,

        /// Include pre-release and development versions
        #[arg(long)]
        pre: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = ListFormat::Columns)]
        format: ListFormat,

        /// Exclude the given distribution from the output
        #[arg(long, value_name = "NAME")]
        exclude: Vec<String>,
    },

    /// Show information about installed packages
    Show {
        #[arg(value_name = "NAME", required = true)]
        packages: Vec<String>,
    },

    /// Output installed packages in requirements format
    Freeze {
        /// Exclude the given distribution from the output
        #[arg(long, value_name = "NAME")]
        exclude: Vec<String>,
    },

    /// Verify installed packages have compatible dependencies
    Check,

    /// Download packages
    Download {
        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        index: IndexArgs,

        /// Directory for downloaded archives
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        dest: PathBuf,
    },

    /// Build wheels from requirements
    Wheel {
        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        index: IndexArgs,

        /// Directory for built wheels
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        wheel_dir: PathBuf,
    },

    /// Inspect and manage pipkin's cache
    Cache {
        #[arg(value_enum)]
        action: CacheAction,
    },
}
