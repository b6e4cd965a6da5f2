use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const TSUKU_BEFORE_HELP: &str = concat!(
    "tsuku ",
    env!("CARGO_PKG_VERSION"),
    " – reproducible developer-tool installer\n\n",
    "Recipes resolve to pinned installation plans; plans replay into\n",
    "atomically-promoted tools under $TSUKU_HOME.",
);

#[derive(Parser, Debug)]
#[command(
    name = "tsuku",
    author,
    version,
    before_help = TSUKU_BEFORE_HELP,
    disable_help_subcommand = true
)]
pub struct TsukuCli {
    #[arg(
        short,
        long,
        help = "Only errors on stderr (env: TSUKU_QUIET)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        help = "Informational logging (env: TSUKU_VERBOSE)",
        global = true
    )]
    pub verbose: bool,
    #[arg(
        long,
        help = "Debug logging with timestamps and source locations (env: TSUKU_DEBUG)",
        global = true
    )]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install a tool from a recipe (name in the registry or a .toml path)
    Install(InstallArgs),
    /// Remove an installed tool (one version or all)
    Remove(RemoveArgs),
    /// List installed tools and their versions
    List,
    /// Generate a pinned installation plan without executing it
    Plan(PlanArgs),
    /// Run a recipe inside an isolated container and check verification
    Validate(ValidateArgs),
    /// List versions available upstream for a recipe
    Versions(VersionsArgs),
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Recipe name or path to a recipe .toml
    pub tool: String,
    /// Install this version instead of the latest
    #[arg(long)]
    pub version: Option<String>,
    /// Reinstall even when this version is already installed
    #[arg(long)]
    pub force: bool,
    /// Execute a previously generated plan instead of resolving the recipe
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,
    /// Preserve the staging workspace for debugging
    #[arg(long, hide = true)]
    pub keep_workspace: bool,
    /// Install missing eval-time dependencies without prompting
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub tool: String,
    /// Remove only this version; omitting it removes every version
    #[arg(long)]
    pub version: Option<String>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Recipe name or path to a recipe .toml
    pub tool: String,
    /// Write the plan here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Target OS (defaults to the host)
    #[arg(long)]
    pub os: Option<String>,
    /// Target architecture (defaults to the host)
    #[arg(long)]
    pub arch: Option<String>,
    /// Skip asset downloads; the plan carries no checksums
    #[arg(long)]
    pub no_download: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Recipe name or path to a recipe .toml
    pub tool: String,
    /// Container image to validate in
    #[arg(long)]
    pub image: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionsArgs {
    /// Recipe name or path to a recipe .toml
    pub tool: String,
    /// Show at most this many versions
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
