//! Response models for the handful of GitHub endpoints the dashboard reads.
//!
//! Only the fields the dashboard shows are modelled; serde ignores the rest.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GhdashError;

/// A repository addressed as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl FromStr for RepoRef {
    type Err = GhdashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(Self::new(owner, name)),
            _ => Err(GhdashError::InvalidRepo(s.to_string())),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// An organization the authenticated user belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub login: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub html_url: String,
    pub user: User,
    #[serde(default)]
    pub assignee: Option<User>,
    #[serde(default)]
    pub assignees: Vec<User>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub requested_reviewers: Vec<User>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PullRequest {
    /// Whole days since the pull request was opened.
    pub fn days_in_review(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }

    /// Whether `login` authored, is assigned to, or is asked to review this pull request.
    pub fn involves(&self, login: &str) -> bool {
        self.user.login == login
            || self.assignee.as_ref().is_some_and(|u| u.login == login)
            || self.assignees.iter().any(|u| u.login == login)
            || self.requested_reviewers.iter().any(|u| u.login == login)
    }
}

/// Review-age bucket: under 3 days fresh, under 7 aging, otherwise stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAge {
    Fresh,
    Aging,
    Stale,
}

impl ReviewAge {
    pub fn from_days(days: i64) -> Self {
        match days {
            d if d < 3 => ReviewAge::Fresh,
            d if d < 7 => ReviewAge::Aging,
            _ => ReviewAge::Stale,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub html_url: String,
    pub user: User,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub comments: u64,
    /// Present when the "issue" is really a pull request
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub stargazers_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl CheckRun {
    pub fn is_complete(&self) -> bool {
        self.status == "completed"
    }

    pub fn is_success(&self) -> bool {
        matches!(self.conclusion.as_deref(), Some("success") | Some("neutral") | Some("skipped"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunList {
    pub total_count: u64,
    pub check_runs: Vec<CheckRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    /// Null for reviews by deleted accounts
    #[serde(default)]
    pub user: Option<User>,
    pub state: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn is_approval(&self) -> bool {
        self.state == "APPROVED"
    }
}

/// Keep only each reviewer's most recent review, ordered by reviewer login.
pub fn latest_reviews_per_user(reviews: Vec<Review>) -> Vec<Review> {
    let mut latest: HashMap<String, Review> = HashMap::new();
    for review in reviews {
        let Some(login) = review.user.as_ref().map(|u| u.login.clone()) else {
            continue;
        };
        match latest.get(&login) {
            Some(existing) if existing.submitted_at >= review.submitted_at => {}
            _ => {
                latest.insert(login, review);
            }
        }
    }
    let mut reviews: Vec<_> = latest.into_values().collect();
    reviews.sort_by(|a, b| reviewer(a).cmp(reviewer(b)));
    reviews
}

fn reviewer(review: &Review) -> &str {
    review.user.as_ref().map(|u| u.login.as_str()).unwrap_or_default()
}
