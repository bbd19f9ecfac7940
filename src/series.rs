//! Weekly time series and the metrics they describe

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of weeks shown for the async-computed stats metrics
pub const YEAR_WEEKS: usize = 52;

/// One week of a metric for one repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyPoint {
    /// Start of the week as reported upstream (Sunday 00:00 UTC on GitHub)
    pub week_start: DateTime<Utc>,
    pub value: u64,
}

impl WeeklyPoint {
    pub fn new(week_start: DateTime<Utc>, value: u64) -> Self {
        Self { week_start, value }
    }
}

/// Weekly points ordered by `week_start`, one per week
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series {
    points: Vec<WeeklyPoint>,
    /// Weeks before this one may be undercounted
    #[serde(skip)]
    incomplete_before: Option<DateTime<Utc>>,
}

impl Series {
    /// Build a series, sorting points by week
    pub fn new(mut points: Vec<WeeklyPoint>) -> Self {
        points.sort_by_key(|p| p.week_start);
        Self {
            points,
            incomplete_before: None,
        }
    }

    /// Mark every week before `week_start` as possibly undercounted
    pub fn incomplete_before(mut self, week_start: DateTime<Utc>) -> Self {
        self.incomplete_before = Some(week_start);
        self
    }

    /// First week known to be complete, when the source was cut short
    pub fn complete_from(&self) -> Option<DateTime<Utc>> {
        self.incomplete_before
    }

    pub fn points(&self) -> &[WeeklyPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&WeeklyPoint> {
        self.points.last()
    }

    /// Keep only the most recent `weeks` points
    pub fn truncate_recent(mut self, weeks: usize) -> Self {
        if self.points.len() > weeks {
            self.points.drain(..self.points.len() - weeks);
        }
        self
    }

    /// The most recent `weeks` points, without copying
    pub fn recent(&self, weeks: usize) -> &[WeeklyPoint] {
        &self.points[self.points.len().saturating_sub(weeks)..]
    }

    /// Exact-match lookup by week start
    pub fn value_at(&self, week_start: DateTime<Utc>) -> Option<u64> {
        self.points
            .binary_search_by_key(&week_start, |p| p.week_start)
            .ok()
            .map(|i| self.points[i].value)
    }
}

/// The activity metrics that can be compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    /// Weekly commit totals
    #[value(name = "commits")]
    CommitActivity,
    /// Distinct contributors with at least one commit per week
    Contributors,
    /// Issues opened per week
    IssuesOpened,
    /// Issues closed per week
    IssuesClosed,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::CommitActivity,
        Metric::Contributors,
        Metric::IssuesOpened,
        Metric::IssuesClosed,
    ];

    /// Chart title
    pub fn title(&self) -> &'static str {
        match self {
            Metric::CommitActivity => "Commit Activity",
            Metric::Contributors => "Active Contributors",
            Metric::IssuesOpened => "Issues Opened",
            Metric::IssuesClosed => "Issues Closed",
        }
    }

    /// Stable identifier used in HTML ids and JSON output
    pub fn slug(&self) -> &'static str {
        match self {
            Metric::CommitActivity => "commits",
            Metric::Contributors => "contributors",
            Metric::IssuesOpened => "issues-opened",
            Metric::IssuesClosed => "issues-closed",
        }
    }

    /// Whether GitHub computes this metric asynchronously and may answer 202
    pub fn is_async_computed(&self) -> bool {
        matches!(self, Metric::CommitActivity | Metric::Contributors)
    }

    /// How many recent weeks the client keeps; `None` keeps the native window
    pub fn client_window(&self) -> Option<usize> {
        if self.is_async_computed() {
            Some(YEAR_WEEKS)
        } else {
            None
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Sunday 00:00 UTC of the week containing `at`, matching GitHub's stats weeks
pub fn week_start_of(at: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_sunday = at.weekday().num_days_from_sunday() as i64;
    let day = at.date_naive() - Duration::days(days_from_sunday);
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// Week label for chart axes, e.g. `Jan 5`
pub fn week_label(week_start: DateTime<Utc>) -> String {
    week_start.format("%b %-d").to_string()
}
