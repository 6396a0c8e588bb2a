use chrono::Utc;
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ghdash::GhdashError;
use ghdash::config::Config;
use ghdash::dashboard::{Dashboard, RepoPulls};
use ghdash::github::{CheckRun, GitHubClient, PullRequest, RepoRef, Repository, Review, ReviewAge};
use ghdash::scheduler::RequestScheduler;

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(level: LevelFilter) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ghdash")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("ghdash.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Base log level: --verbose wins, then `log_level` from config, then info.
///
/// RUST_LOG is applied on top by env_logger. Returns `Err` with the
/// unparsable setting so it can be reported once logging is up.
fn resolve_log_level(verbose: bool, configured: Option<&str>) -> std::result::Result<LevelFilter, String> {
    if verbose {
        return Ok(LevelFilter::Debug);
    }
    match configured {
        Some(level) => level.trim().parse::<LevelFilter>().map_err(|_| level.to_string()),
        None => Ok(LevelFilter::Info),
    }
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    if let Commands::Config = &cli.command {
        return handle_config_command(config);
    }

    let client = GitHubClient::from_config(&config.github).context("Failed to create GitHub client")?;
    let scheduler = RequestScheduler::new(config.scheduler.clone());
    let dashboard = Dashboard::new(Arc::new(client), scheduler.clone());

    let result = match &cli.command {
        Commands::Whoami => handle_whoami_command(&dashboard).await,
        Commands::Pulls { repos } => handle_pulls_command(&dashboard, repos).await,
        Commands::MyPulls { repos } => handle_my_pulls_command(&dashboard, repos).await,
        Commands::Issues { repos } => handle_issues_command(&dashboard, repos).await,
        Commands::Repos { org } => handle_repos_command(&dashboard, org).await,
        Commands::Orgs => handle_orgs_command(&dashboard).await,
        Commands::Starred => handle_starred_command(&dashboard).await,
        Commands::Mine => handle_mine_command(&dashboard).await,
        Commands::Checks {
            repo,
            number,
            background,
        } => handle_checks_command(&dashboard, repo, *number, !*background).await,
        Commands::Approvals {
            repo,
            number,
            background,
        } => handle_approvals_command(&dashboard, repo, *number, !*background).await,
        Commands::Config => handle_config_command(config),
    };

    let stats = scheduler.stats();
    info!(
        "Scheduler: {} submitted, {} succeeded, {} failed, {} retries",
        stats.total_submitted, stats.total_succeeded, stats.total_failed, stats.total_retries
    );
    if cli.is_verbose() {
        println!(
            "{} {} requests, {} retries, {} in window",
            "Scheduler:".dimmed(),
            stats.total_submitted,
            stats.total_retries,
            stats.ledger_size
        );
    }
    scheduler.destroy();

    result
}

fn handle_config_command(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    println!("{}", yaml);
    println!("{} {}", "web url:".dimmed(), config.github.web_url());
    Ok(())
}

async fn handle_whoami_command(dashboard: &Dashboard<GitHubClient>) -> Result<()> {
    let user = dashboard
        .whoami()
        .await
        .map_err(GhdashError::from)
        .context("Failed to fetch authenticated user")?;
    match user.name {
        Some(name) => println!("{} {} ({})", "Authenticated as".green(), user.login.bold(), name),
        None => println!("{} {}", "Authenticated as".green(), user.login.bold()),
    }
    Ok(())
}

async fn handle_pulls_command(dashboard: &Dashboard<GitHubClient>, repos: &[RepoRef]) -> Result<()> {
    info!("Listing pull requests for {} repositories", repos.len());
    let results = dashboard
        .pull_requests(repos)
        .await
        .map_err(GhdashError::from)
        .context("Failed to fetch pull requests")?;

    print_pulls(&results);
    Ok(())
}

async fn handle_my_pulls_command(dashboard: &Dashboard<GitHubClient>, repos: &[RepoRef]) -> Result<()> {
    let user = dashboard
        .whoami()
        .await
        .map_err(GhdashError::from)
        .context("Failed to fetch authenticated user")?;
    info!("Listing pull requests involving {} in {} repositories", user.login, repos.len());
    let results = dashboard
        .my_pull_requests(&user.login, repos)
        .await
        .map_err(GhdashError::from)
        .context("Failed to fetch pull requests")?;

    if results.is_empty() {
        println!("{} {}", "No open pull requests involving".dimmed(), user.login.bold());
    }
    print_pulls(&results);
    Ok(())
}

fn print_pulls(results: &[RepoPulls]) {
    let now = Utc::now();
    for repo_pulls in results {
        println!("{} ({})", repo_pulls.repo.to_string().bold(), repo_pulls.pulls.len());
        if repo_pulls.pulls.is_empty() {
            println!("  {}", "no open pull requests".dimmed());
        }
        for pr in &repo_pulls.pulls {
            println!("  {}", format_pull(pr, pr.days_in_review(now)));
        }
    }
}

fn format_pull(pr: &PullRequest, days: i64) -> String {
    let age = format!("{}d", days);
    let age = match ReviewAge::from_days(days) {
        ReviewAge::Fresh => age.green(),
        ReviewAge::Aging => age.yellow(),
        ReviewAge::Stale => age.red(),
    };
    let title = if pr.draft {
        format!("{} {}", "[draft]".dimmed(), pr.title)
    } else {
        pr.title.clone()
    };
    format!("#{:<6} {:>4}  {} {}", pr.number, age, title, format!("@{}", pr.user.login).cyan())
}

async fn handle_issues_command(dashboard: &Dashboard<GitHubClient>, repos: &[RepoRef]) -> Result<()> {
    info!("Listing issues for {} repositories", repos.len());
    let results = dashboard
        .issues(repos)
        .await
        .map_err(GhdashError::from)
        .context("Failed to fetch issues")?;

    for repo_issues in results {
        println!("{} ({})", repo_issues.repo.to_string().bold(), repo_issues.issues.len());
        for issue in &repo_issues.issues {
            let labels: Vec<_> = issue.labels.iter().map(|l| l.name.as_str()).collect();
            print!("  #{:<6} {}", issue.number, issue.title);
            if !labels.is_empty() {
                print!(" {}", format!("[{}]", labels.join(", ")).magenta());
            }
            println!(" {}", format!("({} comments)", issue.comments).dimmed());
        }
    }
    Ok(())
}

async fn handle_repos_command(dashboard: &Dashboard<GitHubClient>, org: &str) -> Result<()> {
    info!("Listing repositories for org: {}", org);
    let repos = dashboard
        .org_repositories(org)
        .await
        .map_err(GhdashError::from)
        .context(format!("Failed to list repositories for {}", org))?;

    print_repositories(&repos);
    Ok(())
}

async fn handle_orgs_command(dashboard: &Dashboard<GitHubClient>) -> Result<()> {
    info!("Listing organizations");
    let orgs = dashboard
        .organizations()
        .await
        .map_err(GhdashError::from)
        .context("Failed to list organizations")?;

    for org in &orgs {
        println!(
            "{:<30} {}",
            org.login.bold(),
            org.description.as_deref().unwrap_or_default().dimmed()
        );
    }
    println!("{} {}", orgs.len(), "organizations".dimmed());
    Ok(())
}

async fn handle_starred_command(dashboard: &Dashboard<GitHubClient>) -> Result<()> {
    info!("Listing starred repositories");
    let repos = dashboard
        .starred_repositories()
        .await
        .map_err(GhdashError::from)
        .context("Failed to list starred repositories")?;
    print_repositories(&repos);
    Ok(())
}

async fn handle_mine_command(dashboard: &Dashboard<GitHubClient>) -> Result<()> {
    info!("Listing owned repositories");
    let repos = dashboard
        .owned_repositories()
        .await
        .map_err(GhdashError::from)
        .context("Failed to list owned repositories")?;
    print_repositories(&repos);
    Ok(())
}

fn print_repositories(repos: &[Repository]) {
    for repo in repos {
        let language = repo.language.as_deref().unwrap_or("-");
        println!(
            "{:<40} {:<12} {:>6}  {}",
            repo.full_name.bold(),
            language.cyan(),
            repo.stargazers_count,
            repo.description.as_deref().unwrap_or_default().dimmed()
        );
    }
    println!("{} {}", repos.len(), "repositories".dimmed());
}

async fn handle_checks_command(
    dashboard: &Dashboard<GitHubClient>,
    repo: &RepoRef,
    number: u64,
    visible: bool,
) -> Result<()> {
    info!("Checks for {}#{} (visible: {})", repo, number, visible);
    let runs = dashboard
        .checks(repo, number, visible)
        .await
        .map_err(GhdashError::from)
        .context(format!("Failed to fetch checks for {}#{}", repo, number))?;

    if runs.is_empty() {
        println!("{}", "No check runs".dimmed());
    }
    for run in &runs {
        println!("  {} {}", check_marker(run), run.name);
    }
    Ok(())
}

fn check_marker(run: &CheckRun) -> ColoredString {
    if !run.is_complete() {
        "●".yellow()
    } else if run.is_success() {
        "✓".green()
    } else {
        "✗".red()
    }
}

async fn handle_approvals_command(
    dashboard: &Dashboard<GitHubClient>,
    repo: &RepoRef,
    number: u64,
    visible: bool,
) -> Result<()> {
    info!("Approvals for {}#{} (visible: {})", repo, number, visible);
    let reviews = dashboard
        .approvals(repo, number, visible)
        .await
        .map_err(GhdashError::from)
        .context(format!("Failed to fetch reviews for {}#{}", repo, number))?;

    if reviews.is_empty() {
        println!("{}", "No reviews".dimmed());
    }
    for review in &reviews {
        println!("  {}", format_review(review));
    }
    let approvals = reviews.iter().filter(|r| r.is_approval()).count();
    println!("{} {}", approvals.to_string().bold(), "approvals".dimmed());
    Ok(())
}

fn format_review(review: &Review) -> String {
    let login = review.user.as_ref().map(|u| u.login.as_str()).unwrap_or("ghost");
    let state = match review.state.as_str() {
        "APPROVED" => review.state.green(),
        "CHANGES_REQUESTED" => review.state.red(),
        _ => review.state.dimmed(),
    };
    format!("{:<20} {}", login, state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration; it decides the log level
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let (level, unknown_level) = match resolve_log_level(cli.is_verbose(), config.log_level.as_deref()) {
        Ok(level) => (level, None),
        Err(unknown) => (LevelFilter::Info, Some(unknown)),
    };
    setup_logging(level).context("Failed to setup logging")?;
    if let Some(unknown) = unknown_level {
        log::warn!("Ignoring unknown log_level {:?}, using info", unknown);
    }

    config.validate().context("Invalid configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
