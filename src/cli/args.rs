//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// pack-exec - run buildpack lifecycle phases in containers
///
/// Turns application source into an OCI image by running the lifecycle
/// of a builder image in short-lived containers.
#[derive(Parser, Debug)]
#[command(name = "pack-exec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PACK_EXEC_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an application image
    Build(BuildArgs),

    /// Manage build caches
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Image to produce, e.g. registry.example.com/team/app:1
    pub image: String,

    /// Builder image providing buildpacks and the lifecycle
    #[arg(short = 'B', long, env = "PACK_EXEC_BUILDER")]
    pub builder: String,

    /// Application directory or zip file (defaults to current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Run image (defaults to the builder's)
    #[arg(long)]
    pub run_image: Option<String>,

    /// Lifecycle image for analyze, restore and export
    #[arg(long)]
    pub lifecycle_image: Option<String>,

    /// Publish to the registry instead of the local daemon
    #[arg(long)]
    pub publish: bool,

    /// Trust the builder, allowing the single creator phase when publishing
    #[arg(long)]
    pub trust_builder: bool,

    /// Clear the build cache before building
    #[arg(long)]
    pub clear_cache: bool,

    /// Registry image to use as the build cache (requires --publish)
    #[arg(long, requires = "publish")]
    pub cache_image: Option<String>,

    /// Cache settings, e.g. type=build;format=volume;name=my-cache
    #[arg(long)]
    pub cache: Vec<String>,

    /// Network mode for phase containers
    #[arg(long)]
    pub network: Option<String>,

    /// Additional bind mounts (host:container[:mode]) for detect and build
    #[arg(long)]
    pub volume: Vec<String>,

    /// Additional tags for the produced image
    #[arg(short, long)]
    pub tag: Vec<String>,

    /// Default process type of the produced image
    #[arg(short = 'D', long)]
    pub default_process: Option<String>,

    /// Application directory name inside the containers
    #[arg(long)]
    pub workspace: Option<String>,

    /// Group id for the build (defaults to the builder's)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub gid: i64,

    /// User id for the build (defaults to the builder's)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub uid: i64,

    /// Daemon host mounted into phases; `inherit` uses DOCKER_HOST
    #[arg(long)]
    pub docker_host: Option<String>,

    /// Image to reuse layers from
    #[arg(long)]
    pub previous_image: Option<String>,

    /// Image creation time: `now` or seconds since the epoch
    #[arg(long)]
    pub creation_time: Option<String>,

    /// Paths (relative to the app) left out of the copied source
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Directory receiving the image's SBOM files after export
    #[arg(long)]
    pub sbom_output_dir: Option<PathBuf>,

    /// Directory receiving the export report (report.toml)
    #[arg(long)]
    pub report_output_dir: Option<PathBuf>,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Remove the build cache of an image
    Clear {
        /// Image whose cache is removed
        image: String,

        /// Registry image backing the cache
        #[arg(long)]
        cache_image: Option<String>,

        /// Cache settings, as for build
        #[arg(long)]
        cache: Vec<String>,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}
