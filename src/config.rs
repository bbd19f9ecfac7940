//! Runtime configuration shared by the client, orchestrators and dashboard

use crate::series::YEAR_WEEKS;
use std::time::Duration;

/// Default GitHub REST API root
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default share link target
pub const DEFAULT_SHARE_BASE: &str = "https://repo-pulse.example/";

/// Configuration for a comparison session
#[derive(Debug, Clone)]
pub struct Config {
    /// GitHub API root, without trailing slash
    pub api_base: String,
    /// User-Agent sent with every request
    pub user_agent: String,
    /// Delay before re-requesting stats GitHub is still computing
    pub poll_interval: Duration,
    /// Weeks shown per chart
    pub window_weeks: usize,
    /// How far back the issue metrics look
    pub issue_lookback_weeks: usize,
    /// Upper bound on issue listing pages (100 issues each) per fetch
    pub max_issue_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: concat!("repo-pulse/", env!("CARGO_PKG_VERSION")).to_string(),
            poll_interval: Duration::from_secs(3),
            window_weeks: YEAR_WEEKS,
            issue_lookback_weeks: YEAR_WEEKS,
            max_issue_pages: 10,
        }
    }
}

impl Config {
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}
