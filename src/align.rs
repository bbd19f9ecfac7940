//! Merge per-repository series onto one shared week axis
//!
//! The axis comes from a single base series: the first repository, in
//! selection order, whose state is `Ready` with at least one point. Other
//! repositories contribute values by exact week match against their own
//! series; there is no interpolation.

use crate::orchestrator::FetchState;
use crate::repo::RepoRef;
use crate::series::{week_label, Metric, Series, YEAR_WEEKS};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How the base axis is cut and how gaps are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignPolicy {
    /// Keep only the last `window` weeks of the base series
    pub window: Option<usize>,
    /// Report a missing week as zero instead of leaving the cell empty
    pub fill_missing: bool,
}

impl AlignPolicy {
    /// Same rule for every metric: a fixed window and zero-filled gaps
    pub fn unified(window: usize) -> Self {
        Self {
            window: Some(window),
            fill_missing: true,
        }
    }

    /// The historical per-metric rules: stats metrics are cut to a year and
    /// leave gaps empty, issue metrics keep their full window and fill gaps
    /// with zero.
    pub fn source_compatible(metric: Metric) -> Self {
        if metric.is_async_computed() {
            Self {
                window: Some(YEAR_WEEKS),
                fill_missing: false,
            }
        } else {
            Self {
                window: None,
                fill_missing: true,
            }
        }
    }
}

impl Default for AlignPolicy {
    fn default() -> Self {
        Self::unified(YEAR_WEEKS)
    }
}

/// Which alignment rules a dashboard applies to its charts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum AlignMode {
    /// One window and zero-filled gaps for every metric
    #[default]
    Unified,
    /// Stats metrics cut to a year with blank gaps, issue metrics kept whole
    PerMetric,
}

impl AlignMode {
    /// Concrete policy for `metric`; `window` applies to the unified mode only
    pub fn policy(self, metric: Metric, window: usize) -> AlignPolicy {
        match self {
            AlignMode::Unified => AlignPolicy::unified(window),
            AlignMode::PerMetric => AlignPolicy::source_compatible(metric),
        }
    }
}

/// One week of the merged dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartRow {
    /// Axis label, e.g. `Jan 7`
    pub label: String,
    pub week_start: DateTime<Utc>,
    /// One value per column; `None` when the repository has no such week
    pub values: Vec<Option<u64>>,
}

/// Rows keyed by week with one column per ready repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedDataset {
    pub columns: Vec<RepoRef>,
    pub rows: Vec<ChartRow>,
}

impl MergedDataset {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column across all rows
    pub fn column(&self, repo: &RepoRef) -> Option<Vec<Option<u64>>> {
        let index = self.columns.iter().position(|c| c.same_repo(repo))?;
        Some(self.rows.iter().map(|row| row.values[index]).collect())
    }
}

/// Build the merged dataset from an orchestrator snapshot in selection order
pub fn align(snapshot: &[(RepoRef, FetchState)], policy: AlignPolicy) -> MergedDataset {
    let ready: Vec<(&RepoRef, &Series)> = snapshot
        .iter()
        .filter_map(|(repo, state)| state.series().map(|series| (repo, series)))
        .collect();

    let Some((_, base)) = ready.iter().find(|(_, series)| !series.is_empty()) else {
        return MergedDataset::default();
    };

    let axis = match policy.window {
        Some(window) => base.recent(window),
        None => base.points(),
    };

    let rows = axis
        .iter()
        .map(|point| ChartRow {
            label: week_label(point.week_start),
            week_start: point.week_start,
            values: ready
                .iter()
                .map(|(_, series)| {
                    let value = series.value_at(point.week_start);
                    if policy.fill_missing {
                        Some(value.unwrap_or(0))
                    } else {
                        value
                    }
                })
                .collect(),
        })
        .collect();

    MergedDataset {
        columns: ready.iter().map(|(repo, _)| (*repo).clone()).collect(),
        rows,
    }
}
