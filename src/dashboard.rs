//! Dashboard data fetching
//!
//! Every GitHub call is routed through the shared [`RequestScheduler`], so the
//! whole process stays inside one per-minute budget no matter how many
//! repositories are being watched.

use std::future::Future;
use std::sync::Arc;

use log::{debug, info};

use crate::github::{
    ApiError, CheckRun, GitHubApi, Issue, Organization, Page, PullRequest, RepoRef, Repository, Review, User,
    latest_reviews_per_user,
};
use crate::scheduler::{Priority, RequestScheduler, SubmitError};

pub type DashResult<T> = Result<T, SubmitError<ApiError>>;

/// Open pull requests of one repository
#[derive(Debug, Clone)]
pub struct RepoPulls {
    pub repo: RepoRef,
    pub pulls: Vec<PullRequest>,
}

/// Open issues of one repository, pull requests excluded
#[derive(Debug, Clone)]
pub struct RepoIssues {
    pub repo: RepoRef,
    pub issues: Vec<Issue>,
}

pub struct Dashboard<A: GitHubApi + 'static> {
    api: Arc<A>,
    scheduler: RequestScheduler,
}

impl<A: GitHubApi + 'static> Dashboard<A> {
    pub fn new(api: Arc<A>, scheduler: RequestScheduler) -> Self {
        Self { api, scheduler }
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    /// Who the token belongs to. Runs ahead of anything already queued.
    pub async fn whoami(&self) -> DashResult<User> {
        let api = Arc::clone(&self.api);
        self.scheduler
            .submit_with_priority(
                move || {
                    let api = Arc::clone(&api);
                    async move { api.authenticated_user().await }
                },
                Priority::High,
            )
            .await
    }

    /// Open pull requests for every repository, in the order given.
    ///
    /// Fails as soon as any repository fails for good.
    pub async fn pull_requests(&self, repos: &[RepoRef]) -> DashResult<Vec<RepoPulls>> {
        debug!("Fetching pull requests for {} repositories", repos.len());
        let operations = repos.iter().cloned().map(|repo| {
            let api = Arc::clone(&self.api);
            move || {
                let api = Arc::clone(&api);
                let repo = repo.clone();
                async move {
                    let pulls = api.list_pulls(&repo).await?;
                    Ok::<_, ApiError>(RepoPulls { repo, pulls })
                }
            }
        });
        self.scheduler.submit_all(operations).await
    }

    /// Open pull requests that `login` authored, is assigned to, or is asked to review.
    ///
    /// Repositories with no such pull request are left out.
    pub async fn my_pull_requests(&self, login: &str, repos: &[RepoRef]) -> DashResult<Vec<RepoPulls>> {
        let mut results = self.pull_requests(repos).await?;
        for entry in &mut results {
            entry.pulls.retain(|pr| pr.involves(login));
        }
        results.retain(|entry| !entry.pulls.is_empty());
        Ok(results)
    }

    /// Open issues for every repository, in the order given.
    pub async fn issues(&self, repos: &[RepoRef]) -> DashResult<Vec<RepoIssues>> {
        let operations = repos.iter().cloned().map(|repo| {
            let api = Arc::clone(&self.api);
            move || {
                let api = Arc::clone(&api);
                let repo = repo.clone();
                async move {
                    let mut issues = api.list_issues(&repo).await?;
                    issues.retain(|issue| !issue.is_pull_request());
                    Ok::<_, ApiError>(RepoIssues { repo, issues })
                }
            }
        });
        self.scheduler.submit_all(operations).await
    }

    pub async fn repository(&self, repo: &RepoRef) -> DashResult<Repository> {
        let api = Arc::clone(&self.api);
        let repo = repo.clone();
        self.scheduler
            .submit(move || {
                let api = Arc::clone(&api);
                let repo = repo.clone();
                async move { api.get_repository(&repo).await }
            })
            .await
    }

    /// All live repositories of an organization, sorted by name.
    ///
    /// Each page is a separate scheduled request.
    pub async fn org_repositories(&self, org: &str) -> DashResult<Vec<Repository>> {
        let org_name = org.to_string();
        let mut repos = self
            .collect_pages(&format!("org {}", org), move |api: Arc<A>, page| {
                let org_name = org_name.clone();
                async move { api.org_repos_page(&org_name, page).await }
            })
            .await?;

        let total = repos.len();
        repos.retain(|repo| !repo.archived);
        repos.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        info!("Org {}: {} repositories ({} archived skipped)", org, repos.len(), total - repos.len());
        Ok(repos)
    }

    /// Organizations the authenticated user belongs to.
    pub async fn organizations(&self) -> DashResult<Vec<Organization>> {
        self.collect_pages("user orgs", |api: Arc<A>, page| async move { api.user_orgs_page(page).await })
            .await
    }

    /// Repositories the authenticated user has starred, in the order GitHub returns them.
    pub async fn starred_repositories(&self) -> DashResult<Vec<Repository>> {
        self.collect_pages("starred", |api: Arc<A>, page| async move { api.starred_repos_page(page).await })
            .await
    }

    /// Repositories the authenticated user owns.
    pub async fn owned_repositories(&self) -> DashResult<Vec<Repository>> {
        self.collect_pages("owned", |api: Arc<A>, page| async move { api.owned_repos_page(page).await })
            .await
    }

    /// Walk a paginated listing, scheduling each page as its own request.
    async fn collect_pages<T, F, Fut>(&self, what: &str, fetch: F) -> DashResult<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<A>, u32) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<Page<T>, ApiError>> + Send + 'static,
    {
        let mut items = Vec::new();
        let mut page = Some(1);

        while let Some(number) = page {
            let api = Arc::clone(&self.api);
            let fetch = fetch.clone();
            let fetched = self
                .scheduler
                .submit(move || fetch(Arc::clone(&api), number))
                .await?;
            debug!("{} page {}: {} items", what, number, fetched.items.len());
            items.extend(fetched.items);
            page = fetched.next;
        }

        Ok(items)
    }

    /// Latest check runs on a pull request's head. `visible` rows jump the queue.
    pub async fn checks(&self, repo: &RepoRef, pr_number: u64, visible: bool) -> DashResult<Vec<CheckRun>> {
        let api = Arc::clone(&self.api);
        let repo = repo.clone();
        self.scheduler
            .submit_with_priority(
                move || {
                    let api = Arc::clone(&api);
                    let repo = repo.clone();
                    async move { api.list_check_runs(&repo, pr_number).await }
                },
                Priority::from(visible),
            )
            .await
    }

    /// Each reviewer's latest review on a pull request.
    pub async fn approvals(&self, repo: &RepoRef, pr_number: u64, visible: bool) -> DashResult<Vec<Review>> {
        let api = Arc::clone(&self.api);
        let repo = repo.clone();
        let reviews = self
            .scheduler
            .submit_with_priority(
                move || {
                    let api = Arc::clone(&api);
                    let repo = repo.clone();
                    async move { api.list_reviews(&repo, pr_number).await }
                },
                Priority::from(visible),
            )
            .await?;
        Ok(latest_reviews_per_user(reviews))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::MockGitHubApi;
    use crate::scheduler::{Retryable, SchedulerConfig};

    fn user(login: &str) -> User {
        User {
            login: login.to_string(),
            name: None,
            avatar_url: None,
            html_url: None,
        }
    }

    fn pull(number: u64) -> PullRequest {
        serde_json::from_value(serde_json::json!({
            "number": number,
            "title": format!("PR {}", number),
            "state": "open",
            "html_url": format!("https://github.com/o/r/pull/{}", number),
            "user": {"login": "octocat"},
            "created_at": "2025-03-01T00:00:00Z",
            "updated_at": "2025-03-01T00:00:00Z"
        }))
        .unwrap()
    }

    fn issue(number: u64, is_pr: bool) -> Issue {
        let mut value = serde_json::json!({
            "number": number,
            "title": "t",
            "state": "open",
            "html_url": "u",
            "user": {"login": "a"},
            "created_at": "2025-03-01T00:00:00Z"
        });
        if is_pr {
            value["pull_request"] = serde_json::json!({"url": "x"});
        }
        serde_json::from_value(value).unwrap()
    }

    fn repository(name: &str, archived: bool) -> Repository {
        Repository {
            name: name.to_string(),
            full_name: format!("acme/{}", name),
            html_url: format!("https://github.com/acme/{}", name),
            description: None,
            language: None,
            archived,
            private: false,
            open_issues_count: 0,
            stargazers_count: 0,
        }
    }

    fn dashboard(mock: MockGitHubApi) -> Dashboard<MockGitHubApi> {
        Dashboard::new(Arc::new(mock), RequestScheduler::new(SchedulerConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_whoami() {
        let mut mock = MockGitHubApi::new();
        mock.user = Some(user("octocat"));
        let dash = dashboard(mock);

        assert_eq!(dash.whoami().await.unwrap().login, "octocat");
        dash.scheduler().destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_whoami_bad_token_is_not_retried() {
        let dash = dashboard(MockGitHubApi::new());

        let err = dash.whoami().await.unwrap_err();
        assert_eq!(err.task_error().and_then(|e| e.status()), Some(401));
        assert_eq!(dash.api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_requests_preserve_repo_order() {
        let a = RepoRef::new("o", "a");
        let b = RepoRef::new("o", "b");
        let mut mock = MockGitHubApi::new();
        mock.pulls.insert(a.clone(), vec![pull(1), pull(2)]);
        mock.pulls.insert(b.clone(), vec![pull(7)]);
        let dash = dashboard(mock);

        let result = dash.pull_requests(&[b.clone(), a.clone()]).await.unwrap();
        assert_eq!(result[0].repo, b);
        assert_eq!(result[1].repo, a);
        assert_eq!(result[1].pulls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_requests_retry_transient_failure() {
        let repo = RepoRef::new("o", "r");
        let mut mock = MockGitHubApi::new();
        mock.pulls.insert(repo.clone(), vec![pull(1)]);
        mock.fail_next("pulls:o/r", 502);
        let dash = dashboard(mock);

        let result = dash.pull_requests(std::slice::from_ref(&repo)).await.unwrap();
        assert_eq!(result[0].pulls.len(), 1);
        assert_eq!(dash.api.calls(), 2);
        assert_eq!(dash.scheduler().stats().total_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_requests_fail_on_forbidden_repo() {
        let ok = RepoRef::new("o", "ok");
        let forbidden = RepoRef::new("o", "secret");
        let mut mock = MockGitHubApi::new();
        mock.pulls.insert(ok.clone(), vec![pull(1)]);
        mock.pulls.insert(forbidden.clone(), Vec::new());
        mock.fail_next("pulls:o/secret", 403);
        let dash = dashboard(mock);

        let err = dash.pull_requests(&[ok, forbidden]).await.unwrap_err();
        assert!(matches!(err, SubmitError::Task(ApiError::Http { status: 403, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_issues_exclude_pull_requests() {
        let repo = RepoRef::new("o", "r");
        let mut mock = MockGitHubApi::new();
        mock.issues
            .insert(repo.clone(), vec![issue(1, false), issue(2, true), issue(3, false)]);
        let dash = dashboard(mock);

        let result = dash.issues(std::slice::from_ref(&repo)).await.unwrap();
        let numbers: Vec<_> = result[0].issues.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_org_repositories_pages_filters_and_sorts() {
        let mut mock = MockGitHubApi::new();
        mock.org_pages.insert(
            "acme".to_string(),
            vec![
                vec![repository("zeta", false), repository("old", true)],
                vec![repository("Alpha", false), repository("beta", false)],
            ],
        );
        let dash = dashboard(mock);

        let repos = dash.org_repositories("acme").await.unwrap();
        let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
        assert_eq!(dash.api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_organizations_walk_every_page() {
        let org = |login: &str| Organization {
            login: login.to_string(),
            description: None,
            avatar_url: None,
        };
        let mut mock = MockGitHubApi::new();
        mock.user_org_pages = vec![vec![org("acme"), org("globex")], vec![org("initech")]];
        let dash = dashboard(mock);

        let orgs = dash.organizations().await.unwrap();
        let logins: Vec<_> = orgs.iter().map(|o| o.login.as_str()).collect();
        assert_eq!(logins, vec!["acme", "globex", "initech"]);
        assert_eq!(dash.scheduler().stats().total_submitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starred_repositories_retry_a_failed_page() {
        let mut mock = MockGitHubApi::new();
        mock.starred_pages = vec![vec![repository("one", false)], vec![repository("two", true)]];
        mock.fail_next("starred", 503);
        let dash = dashboard(mock);

        let repos = dash.starred_repositories().await.unwrap();
        let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(dash.api.calls(), 3);
        assert_eq!(dash.scheduler().stats().total_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owned_repositories_stop_on_forbidden() {
        let mut mock = MockGitHubApi::new();
        mock.owned_pages = vec![vec![repository("mine", false)]];
        mock.fail_next("owned", 403);
        let dash = dashboard(mock);

        let err = dash.owned_repositories().await.unwrap_err();
        assert_eq!(err.task_error().and_then(|e| e.status()), Some(403));
        assert_eq!(dash.api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_my_pull_requests_keep_only_involved() {
        let involved = |number: u64, author: &str, reviewer: Option<&str>, assignee: Option<&str>| -> PullRequest {
            let mut value = serde_json::json!({
                "number": number,
                "title": "t",
                "state": "open",
                "html_url": "u",
                "user": {"login": author},
                "created_at": "2025-03-01T00:00:00Z",
                "updated_at": "2025-03-01T00:00:00Z"
            });
            if let Some(reviewer) = reviewer {
                value["requested_reviewers"] = serde_json::json!([{"login": reviewer}]);
            }
            if let Some(assignee) = assignee {
                value["assignees"] = serde_json::json!([{"login": assignee}]);
            }
            serde_json::from_value(value).unwrap()
        };
        let a = RepoRef::new("o", "a");
        let b = RepoRef::new("o", "b");
        let mut mock = MockGitHubApi::new();
        mock.pulls.insert(
            a.clone(),
            vec![
                involved(1, "me", None, None),
                involved(2, "other", Some("me"), None),
                involved(3, "other", None, Some("me")),
                involved(4, "other", Some("someone"), None),
            ],
        );
        mock.pulls.insert(b.clone(), vec![involved(5, "other", None, None)]);
        let dash = dashboard(mock);

        let mine = dash.my_pull_requests("me", &[a.clone(), b]).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].repo, a);
        let numbers: Vec<_> = mine[0].pulls.iter().map(|pr| pr.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_approvals_reduce_to_latest_per_reviewer() {
        let repo = RepoRef::new("o", "r");
        let reviews: Vec<Review> = serde_json::from_value(serde_json::json!([
            {"id": 1, "user": {"login": "bob"}, "state": "CHANGES_REQUESTED", "submitted_at": "2025-03-01T00:00:00Z"},
            {"id": 2, "user": {"login": "bob"}, "state": "APPROVED", "submitted_at": "2025-03-02T00:00:00Z"},
            {"id": 3, "user": null, "state": "COMMENTED", "submitted_at": "2025-03-02T00:00:00Z"}
        ]))
        .unwrap();
        let mut mock = MockGitHubApi::new();
        mock.reviews.insert((repo.clone(), 5), reviews);
        let dash = dashboard(mock);

        let latest = dash.approvals(&repo, 5, true).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert!(latest[0].is_approval());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checks_after_destroy_are_rejected() {
        let dash = dashboard(MockGitHubApi::new());
        dash.scheduler().destroy();

        let err = dash.checks(&RepoRef::new("o", "r"), 1, false).await.unwrap_err();
        assert!(err.is_shutdown());
        assert_eq!(dash.api.calls(), 0);
    }
}
