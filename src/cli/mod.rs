//! CLI argument parsing for muster.
//!
//! Uses clap derive macros for declarative argument definitions. This
//! module defines the command structure; implementations are in the
//! `commands` module.

use clap::{Parser, Subcommand};

/// Muster: layered agent registry and parallel task orchestrator.
///
/// Agents are YAML definitions discovered across a three-tier hierarchy
/// (project, user, system). Tasks dispatch to agents inside isolated git
/// worktrees with bounded concurrency.
#[derive(Parser, Debug)]
#[command(name = "muster")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Default log level when MUSTER_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse CLI arguments from the process environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Available commands for muster.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the project tier in the current repository.
    ///
    /// Creates `.muster/agents/` with a sample definition and a default
    /// `config.yaml`.
    Init,

    /// List discovered agents.
    Agents(AgentsArgs),

    /// Show one agent definition in detail.
    Show(ShowArgs),

    /// Search agents by capability.
    ///
    /// Case-insensitive substring match over capability tags and
    /// descriptions, ranked by validation score.
    Search(SearchArgs),

    /// Show aggregate registry statistics.
    Stats,

    /// Re-run discovery across all tiers.
    Discover(DiscoverArgs),

    /// Submit a task and wait for its result.
    Submit(SubmitArgs),

    /// Watch the tier directories for definition changes.
    ///
    /// Runs until interrupted, applying create/modify/delete events to
    /// the registry and backing up replaced versions.
    Watch,

    /// Remove orphaned isolation worktrees from a crashed prior run.
    Prune,
}

/// Arguments for `muster agents`.
#[derive(clap::Args, Debug)]
pub struct AgentsArgs {
    /// Filter by primary kind (e.g. qa, engineer, documentation).
    #[arg(long)]
    pub kind: Option<String>,

    /// Filter by specialization tag.
    #[arg(long)]
    pub specialization: Option<String>,

    /// Only agents declaring more than one kind.
    #[arg(long)]
    pub hybrid: bool,

    /// Include definitions shadowed by a higher tier.
    #[arg(long)]
    pub shadowed: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `muster show`.
#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Agent name.
    pub name: String,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `muster search`.
#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    /// Capability substring to search for.
    pub query: String,
}

/// Arguments for `muster discover`.
#[derive(clap::Args, Debug)]
pub struct DiscoverArgs {
    /// Bypass the discovery TTL and rescan every tier.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `muster submit`.
#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// Task description.
    pub description: String,

    /// Explicit target agent name.
    #[arg(long)]
    pub agent: Option<String>,

    /// Capability query used when no agent name is given.
    #[arg(long)]
    pub capability: Option<String>,

    /// Structured requirement (repeatable).
    #[arg(long = "requirement")]
    pub requirements: Vec<String>,

    /// Expected deliverable (repeatable).
    #[arg(long = "deliverable")]
    pub deliverables: Vec<String>,

    /// Per-task timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agents_filters() {
        let cli = Cli::try_parse_from([
            "muster",
            "agents",
            "--kind",
            "qa",
            "--hybrid",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Agents(args) => {
                assert_eq!(args.kind.as_deref(), Some("qa"));
                assert!(args.hybrid);
                assert!(args.json);
                assert!(!args.shadowed);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_submit_with_repeats() {
        let cli = Cli::try_parse_from([
            "muster",
            "submit",
            "run the suite",
            "--agent",
            "qa-agent",
            "--requirement",
            "all green",
            "--requirement",
            "no flakes",
            "--timeout",
            "120",
        ])
        .unwrap();
        match cli.command {
            Command::Submit(args) => {
                assert_eq!(args.description, "run the suite");
                assert_eq!(args.agent.as_deref(), Some("qa-agent"));
                assert_eq!(args.requirements.len(), 2);
                assert_eq!(args.timeout, Some(120));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["muster"]).is_err());
    }
}
