//! GitHub REST access
//!
//! `GitHubApi` is the seam between the dashboard and the network; every call
//! it exposes maps to exactly one HTTP request so the scheduler can count it.

mod client;
mod error;
mod models;

pub use client::{GitHubApi, GitHubClient, MockGitHubApi, Page};
pub use error::{ApiError, ErrorCategory};
pub use models::{
    CheckRun, CheckRunList, Issue, Label, Organization, PullRequest, RepoRef, Repository, Review, ReviewAge, User,
    latest_reviews_per_user,
};
