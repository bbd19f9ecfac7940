//! Chart view models
//!
//! A [`ChartView`] is everything a renderer needs for one metric: the merged
//! dataset, a stable color per repository, and a status per repository so
//! loading, computing, error and empty states can be shown distinctly.

use crate::align::{align, AlignPolicy, MergedDataset};
use crate::orchestrator::FetchState;
use crate::repo::RepoRef;
use crate::series::{week_label, Metric};
use serde::Serialize;
use std::fmt;

/// Line colors, assigned by selection index
pub const PALETTE: [&str; 10] = [
    "#58a6ff", "#3fb950", "#f85149", "#a371f7", "#d29922",
    "#79c0ff", "#56d364", "#ff7b72", "#bc8cff", "#e3b341",
];

/// Color for the repository at `index` in the selection
pub fn color_for(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

/// What a chart shows for one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepoStatus {
    Loading,
    Computing { message: String },
    Failed { message: String },
    /// Drawn, but older weeks may be undercounted
    Partial { message: String },
    Ready,
}

impl RepoStatus {
    fn from_state(repo: &RepoRef, state: &FetchState) -> Self {
        match state {
            FetchState::Idle | FetchState::Loading => RepoStatus::Loading,
            FetchState::Computing => RepoStatus::Computing {
                message: format!(
                    "GitHub is computing statistics for {}. Checking again shortly...",
                    repo
                ),
            },
            FetchState::Failed(message) => RepoStatus::Failed {
                message: format!("{}: {}", repo, message),
            },
            FetchState::Ready(series) => match series.complete_from() {
                Some(week) => RepoStatus::Partial {
                    message: format!(
                        "{}: the issue list was cut off at the page limit; counts before {} may be low",
                        repo,
                        week_label(week)
                    ),
                },
                None => RepoStatus::Ready,
            },
        }
    }
}

/// Legend entry for one selected repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegendEntry {
    pub repo: RepoRef,
    pub color: &'static str,
    pub status: RepoStatus,
}

/// Everything needed to render one metric's chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartView {
    pub metric: Metric,
    pub title: &'static str,
    pub legend: Vec<LegendEntry>,
    pub dataset: MergedDataset,
}

impl ChartView {
    /// Build a view from an orchestrator snapshot in selection order
    pub fn build(metric: Metric, snapshot: &[(RepoRef, FetchState)], policy: AlignPolicy) -> Self {
        let legend = snapshot
            .iter()
            .enumerate()
            .map(|(index, (repo, state))| LegendEntry {
                repo: repo.clone(),
                color: color_for(index),
                status: RepoStatus::from_state(repo, state),
            })
            .collect();

        Self {
            metric,
            title: metric.title(),
            legend,
            dataset: align(snapshot, policy),
        }
    }

    /// No repository selected
    pub fn is_empty(&self) -> bool {
        self.legend.is_empty()
    }

    /// Nothing to draw yet, but some repository is still on its way
    pub fn is_loading(&self) -> bool {
        self.dataset.is_empty()
            && self
                .legend
                .iter()
                .any(|e| matches!(e.status, RepoStatus::Loading | RepoStatus::Computing { .. }))
    }

    /// "Computing" notices, one per repository GitHub is still working on
    pub fn computing_messages(&self) -> Vec<&str> {
        self.legend
            .iter()
            .filter_map(|e| match &e.status {
                RepoStatus::Computing { message } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Inline error messages, one per failed repository
    pub fn errors(&self) -> Vec<&str> {
        self.legend
            .iter()
            .filter_map(|e| match &e.status {
                RepoStatus::Failed { message } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Warnings for repositories whose data is drawn but incomplete
    pub fn warnings(&self) -> Vec<&str> {
        self.legend
            .iter()
            .filter_map(|e| match &e.status {
                RepoStatus::Partial { message } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Plain-text table for terminals
impl fmt::Display for ChartView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## {}", self.title)?;

        if self.is_empty() {
            return writeln!(f, "Add a repository to start comparing.");
        }

        for message in self.computing_messages() {
            writeln!(f, "… {}", message)?;
        }
        for message in self.errors() {
            writeln!(f, "✗ {}", message)?;
        }
        for message in self.warnings() {
            writeln!(f, "! {}", message)?;
        }

        if self.dataset.is_empty() {
            let status = if self.is_loading() { "Loading..." } else { "No data available." };
            return writeln!(f, "{}", status);
        }

        let names: Vec<String> = self.dataset.columns.iter().map(RepoRef::full_name).collect();
        let widths: Vec<usize> = names.iter().map(|n| n.len().max(5)).collect();

        write!(f, "{:<8}", "Week")?;
        for (name, width) in names.iter().zip(&widths) {
            write!(f, " | {:>width$}", name, width = width)?;
        }
        writeln!(f)?;

        for row in &self.dataset.rows {
            write!(f, "{:<8}", row.label)?;
            for (value, width) in row.values.iter().zip(&widths) {
                let cell = value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
                write!(f, " | {:>width$}", cell, width = width)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
