//! repo-pulse - Compare GitHub repository activity week by week
//!
//! This library fetches weekly activity statistics for a set of GitHub
//! repositories, keeps each repository's fetch lifecycle in check (including
//! polling while GitHub computes statistics in the background), and merges
//! the results onto a shared week axis for charting.
//!
//! # Features
//!
//! - Four metrics: commit activity, active contributors, issues opened, issues closed
//! - One generic fetch orchestrator per metric with cancellable polling
//! - Week-aligned datasets for any number of repositories
//! - Shareable selection links and a persisted GitHub token
//! - Static HTML dashboards with Chart.js
//!
//! # Example
//!
//! ```no_run
//! use repo_pulse::{config::Config, dashboard::Dashboard, series::Metric};
//! use std::time::Duration;
//!
//! # async fn run() -> repo_pulse::Result<()> {
//! let mut dashboard = Dashboard::new(Config::default(), None, &Metric::ALL)?;
//! dashboard.add("vercel/next.js")?;
//! dashboard.add("https://github.com/facebook/react")?;
//!
//! dashboard.wait_settled(Duration::from_secs(60)).await;
//! for chart in dashboard.charts() {
//!     println!("{}", chart);
//! }
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod chart;
pub mod config;
pub mod credentials;
pub mod dashboard;
pub mod error;
pub mod github;
pub mod html;
pub mod orchestrator;
pub mod repo;
pub mod selection;
pub mod series;

pub use error::{Error, Result};
