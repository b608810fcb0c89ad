use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DEFAULT_MANIFEST;

#[derive(Parser)]
#[command(name = "stratum")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative infrastructure provisioning", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Manifest declaring the resources
    #[arg(short, long, global = true, env = "STRATUM_FILE", default_value = DEFAULT_MANIFEST)]
    pub file: PathBuf,

    /// State file (overrides the manifest setting)
    #[arg(long, global = true, env = "STRATUM_STATE")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply (or destroy) would change
    Plan(PlanArgs),

    /// Create and update resources to match the manifest
    Apply(ApplyArgs),

    /// Delete every resource the state knows about, dependents first
    Destroy(DestroyArgs),

    /// Show recorded resources and the last run
    Status(StatusArgs),

    /// Show the dependency graph
    Graph(GraphArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options shared by every run
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Number of parallel provider calls
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Only these resources, with their dependencies (dependents on destroy)
    #[arg(short, long = "target", value_name = "ID")]
    pub targets: Vec<String>,

    /// Per provider call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Plan a destroy instead of an apply
    #[arg(long)]
    pub destroy: bool,

    /// Include removal of resources no longer declared
    #[arg(long)]
    pub prune: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Delete recorded resources that are no longer declared
    #[arg(long)]
    pub prune: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Write the run report as JSON
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[derive(Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Write the run report as JSON
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Print the last run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Layers, one per line
    #[default]
    Text,
    /// Graphviz
    Dot,
}

#[derive(Args)]
pub struct GraphArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: GraphFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "stratum", "-vv", "apply", "-f", "eks.toml", "--target", "crd", "-t", "cluster",
            "--prune", "--yes", "-j", "8",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.file, PathBuf::from("eks.toml"));
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.run.targets, vec!["crd", "cluster"]);
        assert_eq!(args.run.jobs, Some(8));
        assert!(args.prune && args.yes);
    }

    #[test]
    fn test_graph_format() {
        let cli = Cli::try_parse_from(["stratum", "graph", "--format", "dot"]).unwrap();
        let Command::Graph(args) = cli.command else {
            panic!("expected graph");
        };
        assert_eq!(args.format, GraphFormat::Dot);
    }
}
