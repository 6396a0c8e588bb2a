//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - whoami: check the token
//! - pulls / issues: open work across repositories
//! - my-pulls: pull requests involving the authenticated user
//! - repos / orgs / starred / mine: find repositories to watch
//! - checks / approvals: detail for one pull request
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use ghdash::github::RepoRef;
use std::path::PathBuf;

/// ghdash - GitHub pull request dashboard
#[derive(Parser, Debug)]
#[command(name = "ghdash")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the user the token belongs to
    Whoami,

    /// List open pull requests
    Pulls {
        /// Repositories as owner/name
        #[arg(required = true)]
        repos: Vec<RepoRef>,
    },

    /// List open pull requests you authored, are assigned to, or are asked to review
    MyPulls {
        /// Repositories as owner/name
        #[arg(required = true)]
        repos: Vec<RepoRef>,
    },

    /// List open issues, pull requests excluded
    Issues {
        /// Repositories as owner/name
        #[arg(required = true)]
        repos: Vec<RepoRef>,
    },

    /// List an organization's active repositories
    Repos {
        /// Organization login
        org: String,
    },

    /// List organizations you belong to
    Orgs,

    /// List repositories you have starred
    Starred,

    /// List repositories you own
    Mine,

    /// Show check runs for a pull request
    Checks {
        /// Repository as owner/name
        repo: RepoRef,

        /// Pull request number
        number: u64,

        /// Queue at normal priority instead of ahead of other work
        #[arg(short, long)]
        background: bool,
    },

    /// Show each reviewer's latest review on a pull request
    Approvals {
        /// Repository as owner/name
        repo: RepoRef,

        /// Pull request number
        number: u64,

        /// Queue at normal priority instead of ahead of other work
        #[arg(short, long)]
        background: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}
