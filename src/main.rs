//! repo-pulse CLI - Compare GitHub repository activity
//!
//! Fetches weekly commit, contributor and issue statistics for a set of
//! repositories and prints them side by side, as JSON, or as an HTML dashboard.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use repo_pulse::{
    align::AlignMode,
    config::{Config, DEFAULT_API_BASE, DEFAULT_SHARE_BASE},
    credentials::TokenStore,
    dashboard::Dashboard,
    html::{self, DashboardConfig},
    selection::Selection,
    series::Metric,
};

/// repo-pulse: Compare GitHub repository activity week by week
#[derive(Parser, Debug)]
#[command(name = "repo-pulse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and compare weekly activity
    Compare(CompareArgs),

    /// Print a share link for a set of repositories
    Share(ShareArgs),

    /// Manage the stored GitHub token
    Token(TokenArgs),
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// Repositories as owner/repo or GitHub URLs
    repos: Vec<String>,

    /// Load the selection from a share link
    #[arg(long)]
    from_url: Option<String>,

    /// Metrics to compare (all when omitted)
    #[arg(short, long, value_enum)]
    metric: Vec<Metric>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Output directory for the HTML dashboard
    #[arg(short, long, default_value = "repo-pulse")]
    output_dir: PathBuf,

    /// Dashboard title
    #[arg(long, default_value = "Repository Comparison")]
    title: String,

    /// Seconds to wait for statistics before showing what is available
    #[arg(long, default_value = "120")]
    timeout: u64,

    /// Seconds between polls while GitHub computes statistics
    #[arg(long, default_value = "3")]
    poll_interval: u64,

    /// Number of weeks to show
    #[arg(long, default_value = "52")]
    weeks: usize,

    /// How repositories are lined up on the week axis
    #[arg(long, value_enum, default_value = "unified")]
    align: AlignMode,

    /// Maximum pages of issues (100 per page) to read per repository
    #[arg(long, default_value = "10")]
    max_issue_pages: usize,

    /// GitHub token (falls back to the stored token)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitHub API base URL
    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Base URL for share links
    #[arg(long, default_value = DEFAULT_SHARE_BASE)]
    share_base: String,
}

#[derive(Parser, Debug)]
struct ShareArgs {
    /// Repositories as owner/repo or GitHub URLs
    #[arg(required = true)]
    repos: Vec<String>,

    /// Base URL for the link
    #[arg(long, default_value = DEFAULT_SHARE_BASE)]
    base: String,
}

#[derive(Parser, Debug)]
struct TokenArgs {
    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    action: TokenAction,
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Store a token
    Set {
        /// Personal access token
        token: String,
    },

    /// Remove the stored token
    Clear,

    /// Show whether a token is stored
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Html,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compare(args) => compare_command(args).await,
        Commands::Share(args) => share_command(args),
        Commands::Token(args) => token_command(args),
    }
}

/// Fetch every metric for the selection and report
async fn compare_command(args: CompareArgs) -> Result<()> {
    let mut config = Config::default()
        .with_api_base(&args.api_base)
        .with_poll_interval(Duration::from_secs(args.poll_interval.max(1)));
    config.window_weeks = args.weeks.max(1);
    config.issue_lookback_weeks = args.weeks.max(1);
    config.max_issue_pages = args.max_issue_pages;

    let token = match args.token.filter(|t| !t.trim().is_empty()) {
        Some(token) => Some(token),
        None => stored_token(),
    };
    if token.is_none() {
        info!("No GitHub token set; limited to 60 requests per hour");
    }

    let requested = if args.metric.is_empty() {
        Metric::ALL.to_vec()
    } else {
        args.metric
    };
    let mut metrics = Vec::new();
    for metric in requested {
        if !metrics.contains(&metric) {
            metrics.push(metric);
        }
    }

    let mut dashboard = Dashboard::new(config, token, &metrics)
        .context("Failed to create GitHub client")?
        .with_align(args.align);

    if let Some(ref link) = args.from_url {
        let url = Url::parse(link).with_context(|| format!("Invalid share link: {}", link))?;
        dashboard.set_selection(Selection::from_url(&url));
    }
    for input in &args.repos {
        if let Err(e) = dashboard.add(input) {
            warn!("{}", e);
        }
    }

    if dashboard.selection().is_empty() {
        anyhow::bail!("No repositories to compare");
    }

    info!(
        "Fetching {} metrics for {} repositories",
        metrics.len(),
        dashboard.selection().len()
    );
    if !dashboard.wait_settled(Duration::from_secs(args.timeout)).await {
        warn!("Showing partial results; rerun later for repositories GitHub is still computing");
    }

    let charts = dashboard.charts();
    let share_url = dashboard
        .share_url(&args.share_base)
        .with_context(|| format!("Invalid share base URL: {}", args.share_base))?
        .to_string();

    match args.format {
        OutputFormat::Table => {
            for chart in &charts {
                println!("{}", chart);
            }
            println!("Share: {}", share_url);
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "share_url": share_url,
                "repositories": dashboard.selection().repos(),
                "charts": charts,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Html => {
            let dashboard_config = DashboardConfig {
                title: args.title,
                output_dir: args.output_dir.to_string_lossy().to_string(),
            };
            let base_path = std::env::current_dir()?;
            let index = html::write_dashboard(&charts, &dashboard_config, Some(&share_url), &base_path)
                .with_context(|| "Failed to generate dashboard")?;

            info!("Dashboard generated at {:?}", index);
        }
    }

    Ok(())
}

/// Print a share link
fn share_command(args: ShareArgs) -> Result<()> {
    let mut selection = Selection::new();
    for input in &args.repos {
        if let Err(e) = selection.add_input(input) {
            warn!("{}", e);
        }
    }

    let url = selection
        .share_url(&args.base)
        .with_context(|| format!("Invalid base URL: {}", args.base))?;
    println!("{}", url);

    Ok(())
}

/// Manage the stored token
fn token_command(args: TokenArgs) -> Result<()> {
    let store = match args.settings {
        Some(path) => TokenStore::open(path),
        None => TokenStore::default_location()?,
    };

    match args.action {
        TokenAction::Set { token } => {
            store.set(Some(&token))?;
            println!("Token saved to {}", store.path().display());
        }
        TokenAction::Clear => {
            store.set(None)?;
            println!("Token removed");
        }
        TokenAction::Show => match store.get()? {
            Some(token) => {
                let visible: String = token.chars().take(4).collect();
                println!("Token {}… stored in {}", visible, store.path().display());
            }
            None => println!("No token stored"),
        },
    }

    Ok(())
}

fn stored_token() -> Option<String> {
    let store = match TokenStore::default_location() {
        Ok(store) => store,
        Err(e) => {
            debug!("No token store available: {}", e);
            return None;
        }
    };

    match store.get() {
        Ok(token) => token,
        Err(e) => {
            warn!("Could not read stored token: {}", e);
            None
        }
    }
}
