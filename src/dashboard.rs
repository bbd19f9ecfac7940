//! A comparison session: selection, token and one orchestrator per metric
//!
//! The selection is the root state. Every change to it is followed by an
//! explicit reconcile of each orchestrator. A token change tears every
//! orchestrator down and builds fresh ones on a new client, so nothing
//! fetched with the old credential survives.

use crate::align::{AlignMode, AlignPolicy};
use crate::chart::ChartView;
use crate::config::Config;
use crate::error::Result;
use crate::github::{GitHubClient, StatsSource};
use crate::orchestrator::FetchOrchestrator;
use crate::repo::RepoRef;
use crate::selection::Selection;
use crate::series::Metric;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Builds the stats source for a given token
pub type SourceFactory =
    Arc<dyn Fn(Option<&str>) -> Result<Arc<dyn StatsSource>> + Send + Sync>;

pub struct Dashboard {
    config: Config,
    align: AlignMode,
    metrics: Vec<Metric>,
    selection: Selection,
    token: Option<String>,
    factory: SourceFactory,
    orchestrators: Vec<FetchOrchestrator>,
}

impl Dashboard {
    /// Dashboard backed by the GitHub API
    pub fn new(config: Config, token: Option<String>, metrics: &[Metric]) -> Result<Self> {
        let client_config = config.clone();
        let factory: SourceFactory = Arc::new(move |token: Option<&str>| {
            let client = GitHubClient::new(token.map(str::to_string), &client_config)?;
            Ok(Arc::new(client) as Arc<dyn StatsSource>)
        });
        Self::with_factory(config, token, metrics, factory)
    }

    /// Dashboard backed by any stats source
    pub fn with_factory(
        config: Config,
        token: Option<String>,
        metrics: &[Metric],
        factory: SourceFactory,
    ) -> Result<Self> {
        let token = token.filter(|t| !t.trim().is_empty());
        let source = factory(token.as_deref())?;
        let mut dashboard = Self {
            config,
            align: AlignMode::default(),
            metrics: metrics.to_vec(),
            selection: Selection::new(),
            token,
            factory,
            orchestrators: Vec::new(),
        };
        dashboard.mount(source);
        Ok(dashboard)
    }

    pub fn with_align(mut self, align: AlignMode) -> Self {
        self.align = align;
        self
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Parse and add a repository; duplicates and bad input are rejected
    /// before anything is fetched.
    pub fn add(&mut self, input: &str) -> Result<RepoRef> {
        let repo = self.selection.add_input(input)?;
        info!("Comparing {}", repo);
        self.reconcile();
        Ok(repo)
    }

    /// Remove the repository at `index`
    pub fn remove(&mut self, index: usize) -> Option<RepoRef> {
        let removed = self.selection.remove(index)?;
        info!("Stopped comparing {}", removed);
        self.reconcile();
        Some(removed)
    }

    /// Replace the whole selection, e.g. from a share URL
    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
        self.reconcile();
    }

    /// Switch credentials and restart every fetch with them.
    ///
    /// If no client can be built for the new token, the error is returned
    /// and the current token and fetches stay in place.
    pub fn set_token(&mut self, token: Option<String>) -> Result<()> {
        let token = token.filter(|t| !t.trim().is_empty());
        let source = (self.factory)(token.as_deref())?;

        self.token = token;
        info!(
            "GitHub token {}; restarting all fetches",
            if self.token.is_some() { "set" } else { "cleared" }
        );
        self.mount(source);
        Ok(())
    }

    fn mount(&mut self, source: Arc<dyn StatsSource>) {
        for orchestrator in &self.orchestrators {
            orchestrator.shutdown();
        }
        self.orchestrators = self
            .metrics
            .iter()
            .map(|metric| {
                FetchOrchestrator::new(*metric, Arc::clone(&source), self.config.poll_interval)
            })
            .collect();

        if !self.selection.is_empty() {
            self.reconcile();
        }
    }

    fn reconcile(&self) {
        for orchestrator in &self.orchestrators {
            orchestrator.reconcile(self.selection.repos());
        }
    }

    /// Wait until every metric has settled. Returns `false` on timeout.
    pub async fn wait_settled(&self, timeout: Duration) -> bool {
        let all = async {
            for orchestrator in &self.orchestrators {
                orchestrator.wait_settled().await;
            }
        };
        match tokio::time::timeout(timeout, all).await {
            Ok(()) => true,
            Err(_) => {
                warn!("Some statistics were still loading after {:?}", timeout);
                false
            }
        }
    }

    /// Chart view for one metric, if the dashboard tracks it
    pub fn chart(&self, metric: Metric) -> Option<ChartView> {
        self.orchestrators
            .iter()
            .find(|o| o.metric() == metric)
            .map(|o| ChartView::build(metric, &o.snapshot(), self.policy(metric)))
    }

    /// Chart views for every tracked metric
    pub fn charts(&self) -> Vec<ChartView> {
        self.orchestrators
            .iter()
            .map(|o| ChartView::build(o.metric(), &o.snapshot(), self.policy(o.metric())))
            .collect()
    }

    fn policy(&self, metric: Metric) -> AlignPolicy {
        self.align.policy(metric, self.config.window_weeks)
    }

    /// Share link for the current selection
    pub fn share_url(&self, base: &str) -> Result<Url> {
        self.selection.share_url(base)
    }
}
