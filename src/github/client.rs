//! GitHub REST client: trait seam plus the reqwest implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, LINK, USER_AGENT};
use serde::de::DeserializeOwned;

use super::error::ApiError;
use super::models::{CheckRun, CheckRunList, Issue, Organization, PullRequest, RepoRef, Repository, Review, User};
use crate::config::GitHubConfig;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Page number to request next, if the server advertised one
    pub next: Option<u32>,
}

/// The GitHub endpoints the dashboard reads. Each call is one HTTP request.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn authenticated_user(&self) -> Result<User, ApiError>;

    async fn list_pulls(&self, repo: &RepoRef) -> Result<Vec<PullRequest>, ApiError>;

    async fn list_issues(&self, repo: &RepoRef) -> Result<Vec<Issue>, ApiError>;

    async fn get_repository(&self, repo: &RepoRef) -> Result<Repository, ApiError>;

    async fn org_repos_page(&self, org: &str, page: u32) -> Result<Page<Repository>, ApiError>;

    /// Organizations the authenticated user belongs to
    async fn user_orgs_page(&self, page: u32) -> Result<Page<Organization>, ApiError>;

    /// Repositories the authenticated user has starred
    async fn starred_repos_page(&self, page: u32) -> Result<Page<Repository>, ApiError>;

    /// Repositories owned by the authenticated user
    async fn owned_repos_page(&self, page: u32) -> Result<Page<Repository>, ApiError>;

    async fn list_check_runs(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<CheckRun>, ApiError>;

    async fn list_reviews(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<Review>, ApiError>;
}

/// reqwest-backed GitHub client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    timeout: Duration,
    per_page: u32,
}

impl GitHubClient {
    /// Create a client for `api_url` authenticating with `token`.
    pub fn new(api_url: &str, token: impl Into<String>, timeout: Duration, per_page: u32) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers())
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
            timeout,
            per_page: per_page.clamp(1, 100),
        })
    }

    /// Create a client from config, reading the token from the configured environment variable.
    pub fn from_config(config: &GitHubConfig) -> Result<Self, ApiError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::MissingToken {
                env_var: config.token_env.clone(),
            })?;
        Self::new(&config.api_url, token, config.timeout(), config.per_page)
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// GET `path` and decode the JSON body, returning the advertised next page if any.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<(T, Option<u32>), ApiError> {
        let url = format!("{}{}", self.api_url, path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let next = next_page(response.headers());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_response(status.as_u16(), &body));
        }

        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        let value = serde_json::from_str(&body)?;
        Ok((value, next))
    }

    fn map_send_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(self.timeout)
        } else {
            ApiError::Network(err)
        }
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page: u32,
        extra: &[(&str, String)],
    ) -> Result<Page<T>, ApiError> {
        let mut query = vec![("per_page", self.per_page.to_string()), ("page", page.to_string())];
        query.extend(extra.iter().cloned());
        let (items, next) = self.get_json(path, &query).await?;
        Ok(Page { items, next })
    }

    fn list_query(&self) -> Vec<(&'static str, String)> {
        vec![("state", "open".to_string()), ("per_page", self.per_page.to_string())]
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))),
    );
    headers.insert("x-github-api-version", HeaderValue::from_static(GITHUB_API_VERSION));
    headers
}

/// Extract the `page` number of the `rel="next"` entry of a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<u32> {
    let link = headers.get(LINK)?.to_str().ok()?;
    parse_next_page(link)
}

pub(crate) fn parse_next_page(link: &str) -> Option<u32> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        let url = target.trim().trim_start_matches('<').trim_end_matches('>');
        let query = url.split_once('?')?.1;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("page="))
            .and_then(|n| n.parse().ok())
    })
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn authenticated_user(&self) -> Result<User, ApiError> {
        let (user, _) = self.get_json("/user", &[]).await?;
        Ok(user)
    }

    async fn list_pulls(&self, repo: &RepoRef) -> Result<Vec<PullRequest>, ApiError> {
        let path = format!("/repos/{}/{}/pulls", repo.owner, repo.name);
        let (pulls, _) = self.get_json(&path, &self.list_query()).await?;
        Ok(pulls)
    }

    async fn list_issues(&self, repo: &RepoRef) -> Result<Vec<Issue>, ApiError> {
        let path = format!("/repos/{}/{}/issues", repo.owner, repo.name);
        let (issues, _) = self.get_json(&path, &self.list_query()).await?;
        Ok(issues)
    }

    async fn get_repository(&self, repo: &RepoRef) -> Result<Repository, ApiError> {
        let path = format!("/repos/{}/{}", repo.owner, repo.name);
        let (repository, _) = self.get_json(&path, &[]).await?;
        Ok(repository)
    }

    async fn org_repos_page(&self, org: &str, page: u32) -> Result<Page<Repository>, ApiError> {
        self.get_page(&format!("/orgs/{}/repos", org), page, &[]).await
    }

    async fn user_orgs_page(&self, page: u32) -> Result<Page<Organization>, ApiError> {
        self.get_page("/user/orgs", page, &[]).await
    }

    async fn starred_repos_page(&self, page: u32) -> Result<Page<Repository>, ApiError> {
        self.get_page("/user/starred", page, &[]).await
    }

    async fn owned_repos_page(&self, page: u32) -> Result<Page<Repository>, ApiError> {
        self.get_page("/user/repos", page, &[("type", "owner".to_string())]).await
    }

    async fn list_check_runs(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<CheckRun>, ApiError> {
        let path = format!("/repos/{}/{}/commits/pull/{}/head/check-runs", repo.owner, repo.name, pr_number);
        let query = [("filter", "latest".to_string())];
        let (list, _): (CheckRunList, _) = self.get_json(&path, &query).await?;
        Ok(list.check_runs)
    }

    async fn list_reviews(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<Review>, ApiError> {
        let path = format!("/repos/{}/{}/pulls/{}/reviews", repo.owner, repo.name, pr_number);
        let query = [("per_page", self.per_page.to_string())];
        let (reviews, _) = self.get_json(&path, &query).await?;
        Ok(reviews)
    }
}

/// In-memory GitHub for tests: canned data plus scripted failures.
///
/// Failures are queued per endpoint key (`"pulls:owner/name"`, `"user"`, ...)
/// and consumed one per call before the canned data is returned.
#[derive(Debug, Default)]
pub struct MockGitHubApi {
    pub user: Option<User>,
    pub pulls: HashMap<RepoRef, Vec<PullRequest>>,
    pub issues: HashMap<RepoRef, Vec<Issue>>,
    pub repositories: HashMap<RepoRef, Repository>,
    pub org_pages: HashMap<String, Vec<Vec<Repository>>>,
    pub user_org_pages: Vec<Vec<Organization>>,
    pub starred_pages: Vec<Vec<Repository>>,
    pub owned_pages: Vec<Vec<Repository>>,
    pub check_runs: HashMap<(RepoRef, u64), Vec<CheckRun>>,
    pub reviews: HashMap<(RepoRef, u64), Vec<Review>>,
    failures: Mutex<HashMap<String, VecDeque<u16>>>,
    calls: AtomicUsize,
}

impl MockGitHubApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `key` fail with `status`. Queue several to fail repeatedly.
    pub fn fail_next(&self, key: impl Into<String>, status: u16) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(key.into())
            .or_default()
            .push_back(status);
    }

    /// Total calls made against the mock.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(key)
            .and_then(VecDeque::pop_front);
        match status {
            Some(status) => Err(ApiError::Http {
                status,
                message: format!("scripted failure for {}", key),
            }),
            None => Ok(()),
        }
    }

    /// Serve 1-based `page` out of `pages`; past the end is an empty last page.
    fn page_of<T: Clone>(pages: &[Vec<T>], page: u32) -> Page<T> {
        let index = page.saturating_sub(1) as usize;
        let items = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then_some(page + 1);
        Page { items, next }
    }

    fn not_found(what: impl std::fmt::Display) -> ApiError {
        ApiError::Http {
            status: 404,
            message: format!("{} Not Found", what),
        }
    }
}

#[async_trait]
impl GitHubApi for MockGitHubApi {
    async fn authenticated_user(&self) -> Result<User, ApiError> {
        self.check("user")?;
        self.user.clone().ok_or_else(|| ApiError::Http {
            status: 401,
            message: "Bad credentials".to_string(),
        })
    }

    async fn list_pulls(&self, repo: &RepoRef) -> Result<Vec<PullRequest>, ApiError> {
        self.check(&format!("pulls:{}", repo))?;
        self.pulls.get(repo).cloned().ok_or_else(|| Self::not_found(repo))
    }

    async fn list_issues(&self, repo: &RepoRef) -> Result<Vec<Issue>, ApiError> {
        self.check(&format!("issues:{}", repo))?;
        self.issues.get(repo).cloned().ok_or_else(|| Self::not_found(repo))
    }

    async fn get_repository(&self, repo: &RepoRef) -> Result<Repository, ApiError> {
        self.check(&format!("repo:{}", repo))?;
        self.repositories.get(repo).cloned().ok_or_else(|| Self::not_found(repo))
    }

    async fn org_repos_page(&self, org: &str, page: u32) -> Result<Page<Repository>, ApiError> {
        self.check(&format!("org:{}", org))?;
        let pages = self.org_pages.get(org).ok_or_else(|| Self::not_found(org))?;
        Ok(Self::page_of(pages, page))
    }

    async fn user_orgs_page(&self, page: u32) -> Result<Page<Organization>, ApiError> {
        self.check("orgs")?;
        Ok(Self::page_of(&self.user_org_pages, page))
    }

    async fn starred_repos_page(&self, page: u32) -> Result<Page<Repository>, ApiError> {
        self.check("starred")?;
        Ok(Self::page_of(&self.starred_pages, page))
    }

    async fn owned_repos_page(&self, page: u32) -> Result<Page<Repository>, ApiError> {
        self.check("owned")?;
        Ok(Self::page_of(&self.owned_pages, page))
    }

    async fn list_check_runs(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<CheckRun>, ApiError> {
        self.check(&format!("checks:{}#{}", repo, pr_number))?;
        Ok(self
            .check_runs
            .get(&(repo.clone(), pr_number))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_reviews(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<Review>, ApiError> {
        self.check(&format!("reviews:{}#{}", repo, pr_number))?;
        Ok(self.reviews.get(&(repo.clone(), pr_number)).cloned().unwrap_or_default())
    }
}
