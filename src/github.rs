//! GitHub API integration
//!
//! Fetches the four weekly activity metrics and normalizes them into
//! [`Series`]. The statistics endpoints (`commit_activity`, `contributors`)
//! are computed asynchronously by GitHub: the first request for a cold
//! repository answers `202 Accepted` with no body, which is surfaced as
//! [`Error::StatsComputing`] so callers can poll.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::repo::{RepoKey, RepoRef};
use crate::series::{week_start_of, Metric, Series, WeeklyPoint};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, warn};

const ISSUES_PER_PAGE: usize = 100;

/// How long one issue listing serves both issue metrics
const ISSUE_LISTING_TTL: StdDuration = StdDuration::from_secs(60);

/// Anything that can produce a weekly series for a repository and metric.
///
/// [`GitHubClient`] is the production implementation; the orchestrator only
/// depends on this trait.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(&self, metric: Metric, repo: &RepoRef) -> Result<Series>;
}

/// GitHub API client
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    issue_lookback_weeks: usize,
    max_issue_pages: usize,
    listings: Arc<Mutex<HashMap<RepoKey, CachedListing>>>,
}

/// Issues updated inside the lookback window, newest created first
#[derive(Debug)]
struct IssueListing {
    now: DateTime<Utc>,
    since: DateTime<Utc>,
    issues: Vec<IssueItem>,
    /// The page limit was hit before the listing ran out
    capped: bool,
    oldest_created: Option<DateTime<Utc>>,
}

struct CachedListing {
    started: Instant,
    cell: Arc<OnceCell<Arc<IssueListing>>>,
}

impl GitHubClient {
    /// Create a new GitHub client; an empty token counts as no token
    pub fn new(token: Option<String>, config: &Config) -> Result<Self> {
        let token = token.filter(|t| !t.trim().is_empty());

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|_| Error::ConfigError("Invalid user agent".to_string()))?,
        );

        if let Some(ref t) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", t.trim()))
                .map_err(|_| Error::ConfigError("Invalid token format".to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            token,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            issue_lookback_weeks: config.issue_lookback_weeks.max(1),
            max_issue_pages: config.max_issue_pages.max(1),
            listings: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Check if we have authentication
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Weekly commit totals for the last year
    pub async fn fetch_commit_activity(&self, repo: &RepoRef) -> Result<Series> {
        let weeks: Vec<CommitActivityWeek> = self.get_stats(repo, "commit_activity").await?;
        Ok(commit_activity_series(weeks))
    }

    /// Weekly count of distinct contributors with at least one commit
    pub async fn fetch_contributors(&self, repo: &RepoRef) -> Result<Series> {
        let stats: Vec<ContributorStats> = self.get_stats(repo, "contributors").await?;
        Ok(contributor_series(stats))
    }

    /// Issues opened per week over the lookback window
    pub async fn fetch_issues_opened(&self, repo: &RepoRef) -> Result<Series> {
        let listing = self.issue_listing(repo).await?;
        Ok(listing_series(&listing, IssueEvent::Opened, self.issue_lookback_weeks))
    }

    /// Issues closed per week over the lookback window
    pub async fn fetch_issues_closed(&self, repo: &RepoRef) -> Result<Series> {
        let listing = self.issue_listing(repo).await?;
        Ok(listing_series(&listing, IssueEvent::Closed, self.issue_lookback_weeks))
    }

    async fn get_stats<T>(&self, repo: &RepoRef, endpoint: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let url = format!(
            "{}/repos/{}/{}/stats/{}",
            self.api_base, repo.owner, repo.name, endpoint
        );
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        classify_status(
            response.status(),
            response.headers(),
            true,
            self.is_authenticated(),
        )?;

        // Empty repositories have no stats at all
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }

        let body = response.text().await?;
        if body.trim().is_empty() || body.trim() == "{}" {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// One listing per repository shared by both issue metrics; concurrent
    /// callers wait on the same request.
    async fn issue_listing(&self, repo: &RepoRef) -> Result<Arc<IssueListing>> {
        let cell = {
            let mut listings = self.listings.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            listings.retain(|_, cached| now.duration_since(cached.started) < ISSUE_LISTING_TTL);
            let cached = listings.entry(repo.key()).or_insert_with(|| CachedListing {
                started: now,
                cell: Arc::new(OnceCell::new()),
            });
            Arc::clone(&cached.cell)
        };

        let listing = cell
            .get_or_try_init(|| async { self.list_recent_issues(repo).await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(listing))
    }

    async fn list_recent_issues(&self, repo: &RepoRef) -> Result<IssueListing> {
        let now = Utc::now();
        let since = window_start(now, self.issue_lookback_weeks);
        let url = format!("{}/repos/{}/{}/issues", self.api_base, repo.owner, repo.name);
        let mut issues = Vec::new();
        let mut oldest_created = None;
        let mut capped = false;

        for page in 1..=self.max_issue_pages {
            let response = self
                .client
                .get(&url)
                .query(&[
                    ("state", "all".to_string()),
                    ("since", since.to_rfc3339()),
                    ("sort", "created".to_string()),
                    ("direction", "desc".to_string()),
                    ("per_page", ISSUES_PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await?;
            classify_status(
                response.status(),
                response.headers(),
                false,
                self.is_authenticated(),
            )?;

            let items: Vec<IssueItem> = response.json().await?;
            let fetched = items.len();
            if let Some(last) = items.last() {
                oldest_created = Some(last.created_at);
            }
            issues.extend(items.into_iter().filter(|i| i.pull_request.is_none()));

            if fetched < ISSUES_PER_PAGE {
                break;
            }
            if page == self.max_issue_pages {
                capped = true;
                warn!(
                    "Stopped listing issues for {} after {} pages; older weeks may be undercounted",
                    repo, self.max_issue_pages
                );
            }
        }

        debug!("Listed {} issues for {}", issues.len(), repo);
        Ok(IssueListing {
            now,
            since,
            issues,
            capped,
            oldest_created,
        })
    }
}

#[async_trait]
impl StatsSource for GitHubClient {
    async fn fetch(&self, metric: Metric, repo: &RepoRef) -> Result<Series> {
        match metric {
            Metric::CommitActivity => self.fetch_commit_activity(repo).await,
            Metric::Contributors => self.fetch_contributors(repo).await,
            Metric::IssuesOpened => self.fetch_issues_opened(repo).await,
            Metric::IssuesClosed => self.fetch_issues_closed(repo).await,
        }
    }
}

/// Map an HTTP status to the crate's error taxonomy.
///
/// `stats_endpoint` marks the async-computed endpoints, the only ones where
/// `202 Accepted` means "still computing".
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    stats_endpoint: bool,
    authenticated: bool,
) -> Result<()> {
    if status == StatusCode::ACCEPTED && stats_endpoint {
        return Err(Error::StatsComputing);
    }
    if status.is_success() {
        return Ok(());
    }

    let remaining = header_u64(headers, "x-ratelimit-remaining");
    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && remaining == Some(0))
    {
        let reset = header_u64(headers, "x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
            .map(|at| format!(" Resets at {}.", at.format("%H:%M UTC")))
            .unwrap_or_default();
        let hint = if authenticated {
            "Wait for the limit to reset."
        } else {
            "Add a GitHub personal access token to raise the limit from 60 to 5,000 requests per hour."
        };
        return Err(Error::GitHubError(format!(
            "GitHub API rate limit exceeded.{} {}",
            reset, hint
        )));
    }

    let message = match status {
        StatusCode::NOT_FOUND => "Repository not found (private repositories need a token)".to_string(),
        StatusCode::UNAUTHORIZED => "GitHub rejected the token; update or clear it".to_string(),
        _ => format!("GitHub returned {}", status),
    };
    Err(Error::GitHubError(message))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// First week start of a lookback window ending with the current week
fn window_start(now: DateTime<Utc>, weeks: usize) -> DateTime<Utc> {
    week_start_of(now) - Duration::weeks(weeks.saturating_sub(1) as i64)
}

// GitHub API response types

#[derive(Debug, Deserialize)]
struct CommitActivityWeek {
    week: i64,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ContributorStats {
    author: Option<GitHubUser>,
    #[serde(default)]
    weeks: Vec<ContributorWeek>,
}

#[derive(Debug, Deserialize)]
struct ContributorWeek {
    w: i64,
    #[serde(default)]
    c: u64,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct IssueItem {
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IssueEvent {
    Opened,
    Closed,
}

fn commit_activity_series(weeks: Vec<CommitActivityWeek>) -> Series {
    let points = weeks
        .into_iter()
        .filter_map(|w| from_unix(w.week).map(|at| WeeklyPoint::new(at, w.total)))
        .collect();
    truncate_to_client_window(Series::new(points), Metric::CommitActivity)
}

fn truncate_to_client_window(series: Series, metric: Metric) -> Series {
    match metric.client_window() {
        Some(weeks) => series.truncate_recent(weeks),
        None => series,
    }
}

/// Reduce per-contributor weekly buckets to a per-week distinct contributor
/// count. Every week seen in any bucket gets a point.
fn contributor_series(stats: Vec<ContributorStats>) -> Series {
    let mut weeks: BTreeMap<i64, HashSet<String>> = BTreeMap::new();

    for (index, contributor) in stats.iter().enumerate() {
        let id = contributor
            .author
            .as_ref()
            .map(|a| a.login.to_lowercase())
            .unwrap_or_else(|| format!("#anonymous-{}", index));

        for week in &contributor.weeks {
            let active = weeks.entry(week.w).or_default();
            if week.c > 0 {
                active.insert(id.clone());
            }
        }
    }

    let points = weeks
        .into_iter()
        .filter_map(|(w, active)| from_unix(w).map(|at| WeeklyPoint::new(at, active.len() as u64)))
        .collect();
    truncate_to_client_window(Series::new(points), Metric::Contributors)
}

/// Series for one issue metric, marked incomplete when the listing was cut
/// short.
///
/// Issues are listed newest created first, so a capped listing still holds
/// every issue created after the oldest one seen. Closed counts have no such
/// bound and the whole window is flagged.
fn listing_series(listing: &IssueListing, event: IssueEvent, weeks: usize) -> Series {
    let series = issue_series(&listing.issues, event, listing.now, weeks);
    if !listing.capped {
        return series;
    }

    match (event, listing.oldest_created) {
        (IssueEvent::Opened, Some(oldest)) if oldest < listing.since => series,
        (IssueEvent::Opened, Some(oldest)) => {
            series.incomplete_before(week_start_of(oldest) + Duration::weeks(1))
        }
        _ => series.incomplete_before(week_start_of(listing.now) + Duration::weeks(1)),
    }
}

/// Bucket issues into every week of the lookback window, zero-filled
fn issue_series(issues: &[IssueItem], event: IssueEvent, now: DateTime<Utc>, weeks: usize) -> Series {
    let start = window_start(now, weeks);
    let mut buckets: BTreeMap<DateTime<Utc>, u64> = (0..weeks.max(1) as i64)
        .map(|i| (start + Duration::weeks(i), 0))
        .collect();

    for issue in issues {
        let at = match event {
            IssueEvent::Opened => Some(issue.created_at),
            IssueEvent::Closed => issue.closed_at,
        };
        if let Some(count) = at.and_then(|at| buckets.get_mut(&week_start_of(at))) {
            *count += 1;
        }
    }

    Series::new(
        buckets
            .into_iter()
            .map(|(week_start, value)| WeeklyPoint::new(week_start, value))
            .collect(),
    )
}
