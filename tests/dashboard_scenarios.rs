use async_trait::async_trait;
use chrono::{DateTime, Duration as WeekDuration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use repo_pulse::config::Config;
use repo_pulse::dashboard::{Dashboard, SourceFactory};
use repo_pulse::github::StatsSource;
use repo_pulse::repo::RepoRef;
use repo_pulse::selection::Selection;
use repo_pulse::series::{week_label, Metric, Series, WeeklyPoint};
use repo_pulse::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const POLL: Duration = Duration::from_secs(3);

#[derive(Clone)]
enum Reply {
    Data(Series),
    Computing,
    Fail(&'static str),
}

/// Per-repository replies; the last one repeats
#[derive(Default)]
struct FakeGitHub {
    replies: Mutex<HashMap<String, Vec<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeGitHub {
    fn script(&self, repo: &str, replies: Vec<Reply>) {
        self.replies.lock().unwrap().insert(repo.to_lowercase(), replies);
    }

    fn calls(&self, repo: &str) -> usize {
        self.calls.lock().unwrap().get(&repo.to_lowercase()).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StatsSource for FakeGitHub {
    async fn fetch(&self, _metric: Metric, repo: &RepoRef) -> Result<Series> {
        let name = repo.full_name().to_lowercase();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(name.clone()).or_default();
            *count += 1;
            *count
        };
        let reply = {
            let replies = self.replies.lock().unwrap();
            let script = replies.get(&name).expect("unscripted repository");
            script[(call - 1).min(script.len() - 1)].clone()
        };
        match reply {
            Reply::Data(series) => Ok(series),
            Reply::Computing => Err(Error::StatsComputing),
            Reply::Fail(message) => Err(Error::GitHubError(message.to_string())),
        }
    }
}

fn weeks(first: DateTime<Utc>, count: usize) -> Series {
    Series::new(
        (0..count)
            .map(|i| WeeklyPoint::new(first + WeekDuration::weeks(i as i64), (i * 3 % 17) as u64))
            .collect(),
    )
}

fn sunday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0).unwrap()
}

fn dashboard_with(fake: &Arc<FakeGitHub>, metrics: &[Metric]) -> (Dashboard, Arc<Mutex<Vec<Option<String>>>>) {
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&tokens);
    let source: Arc<dyn StatsSource> = fake.clone();
    let factory: SourceFactory = Arc::new(move |token: Option<&str>| {
        if token.is_some_and(|t| t.contains('\n')) {
            return Err(Error::ConfigError("Invalid token format".to_string()));
        }
        seen.lock().unwrap().push(token.map(str::to_string));
        Ok(Arc::clone(&source))
    });

    let config = Config::default().with_poll_interval(POLL);
    let dashboard = Dashboard::with_factory(config, None, metrics, factory).unwrap();
    (dashboard, tokens)
}

async fn until(dashboard: &Dashboard, metric: Metric, done: impl Fn(&repo_pulse::chart::ChartView) -> bool) {
    for _ in 0..1000 {
        if done(&dashboard.chart(metric).unwrap()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition never reached");
}

#[tokio::test(start_paused = true)]
async fn computing_then_ready_renders_a_year_of_weeks() {
    let fake = Arc::new(FakeGitHub::default());
    fake.script(
        "vercel/next.js",
        vec![Reply::Computing, Reply::Data(weeks(sunday(), 52))],
    );
    let (mut dashboard, _) = dashboard_with(&fake, &[Metric::CommitActivity]);

    dashboard.add("vercel/next.js").unwrap();
    until(&dashboard, Metric::CommitActivity, |chart| !chart.computing_messages().is_empty()).await;

    let chart = dashboard.chart(Metric::CommitActivity).unwrap();
    assert!(chart.computing_messages()[0].contains("vercel/next.js"));
    assert!(chart.is_loading());
    assert!(chart.dataset.is_empty());

    assert!(dashboard.wait_settled(POLL * 4).await);
    let chart = dashboard.chart(Metric::CommitActivity).unwrap();
    assert_eq!(chart.dataset.rows.len(), 52);
    assert!(chart.computing_messages().is_empty());

    let last = chart.dataset.rows.last().unwrap();
    assert_eq!(last.week_start, sunday() + WeekDuration::weeks(51));
    for row in &chart.dataset.rows {
        assert_eq!(row.label, week_label(row.week_start));
    }
    assert_eq!(fake.calls("vercel/next.js"), 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_add_with_other_case_is_rejected() {
    let fake = Arc::new(FakeGitHub::default());
    fake.script("a/b", vec![Reply::Data(weeks(sunday(), 4))]);
    let (mut dashboard, _) = dashboard_with(&fake, &[Metric::IssuesOpened]);

    dashboard.add("A/B").unwrap();
    assert!(matches!(dashboard.add("a/b"), Err(Error::Validation(_))));
    assert_eq!(dashboard.selection().len(), 1);

    assert!(dashboard.wait_settled(Duration::from_secs(10)).await);
    assert_eq!(fake.calls("a/b"), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_repository_does_not_block_the_other() {
    let fake = Arc::new(FakeGitHub::default());
    fake.script("broken/repo", vec![Reply::Fail("error sending request")]);
    fake.script("fine/repo", vec![Reply::Data(weeks(sunday(), 10))]);
    let (mut dashboard, _) = dashboard_with(&fake, &[Metric::CommitActivity, Metric::Contributors]);

    dashboard.add("broken/repo").unwrap();
    dashboard.add("fine/repo").unwrap();
    assert!(dashboard.wait_settled(Duration::from_secs(10)).await);

    for chart in dashboard.charts() {
        assert_eq!(chart.dataset.columns, vec![RepoRef::parse("fine/repo").unwrap()]);
        assert_eq!(chart.dataset.rows.len(), 10);
        let errors = chart.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("broken/repo"));
        assert!(errors[0].contains("error sending request"));
    }
}

#[tokio::test(start_paused = true)]
async fn removing_the_base_repository_moves_the_axis() {
    let fake = Arc::new(FakeGitHub::default());
    fake.script("a/base", vec![Reply::Data(weeks(sunday(), 6))]);
    fake.script("b/next", vec![Reply::Data(weeks(sunday() + WeekDuration::weeks(2), 3))]);
    let (mut dashboard, _) = dashboard_with(&fake, &[Metric::IssuesClosed]);

    dashboard.add("a/base").unwrap();
    dashboard.add("b/next").unwrap();
    assert!(dashboard.wait_settled(Duration::from_secs(10)).await);
    assert_eq!(dashboard.chart(Metric::IssuesClosed).unwrap().dataset.rows.len(), 6);

    dashboard.remove(0).unwrap();
    let chart = dashboard.chart(Metric::IssuesClosed).unwrap();
    assert_eq!(chart.dataset.rows.len(), 3);
    assert_eq!(chart.dataset.rows[0].week_start, sunday() + WeekDuration::weeks(2));
    assert_eq!(chart.legend[0].color, repo_pulse::chart::PALETTE[0]);

    dashboard.remove(0).unwrap();
    let chart = dashboard.chart(Metric::IssuesClosed).unwrap();
    assert!(chart.is_empty());
    assert!(chart.dataset.is_empty());
}

#[tokio::test(start_paused = true)]
async fn removal_while_computing_stops_polling() {
    let fake = Arc::new(FakeGitHub::default());
    fake.script("slow/stats", vec![Reply::Computing]);
    let (mut dashboard, _) = dashboard_with(&fake, &[Metric::CommitActivity]);

    dashboard.add("slow/stats").unwrap();
    until(&dashboard, Metric::CommitActivity, |chart| !chart.computing_messages().is_empty()).await;
    let before = fake.calls("slow/stats");

    dashboard.remove(0);
    tokio::time::sleep(POLL * 6).await;
    assert_eq!(fake.calls("slow/stats"), before);
}

#[tokio::test(start_paused = true)]
async fn token_change_restarts_every_fetch() {
    let fake = Arc::new(FakeGitHub::default());
    fake.script("a/repo", vec![Reply::Fail("rate limit"), Reply::Data(weeks(sunday(), 2))]);
    let (mut dashboard, tokens) = dashboard_with(&fake, &[Metric::IssuesOpened]);

    dashboard.add("a/repo").unwrap();
    assert!(dashboard.wait_settled(Duration::from_secs(10)).await);
    assert_eq!(dashboard.chart(Metric::IssuesOpened).unwrap().errors().len(), 1);

    dashboard.set_token(Some("ghp_fresh".to_string())).unwrap();
    assert!(dashboard.has_token());
    assert!(dashboard.wait_settled(Duration::from_secs(10)).await);

    let chart = dashboard.chart(Metric::IssuesOpened).unwrap();
    assert!(chart.errors().is_empty());
    assert_eq!(chart.dataset.rows.len(), 2);
    assert_eq!(fake.calls("a/repo"), 2);
    assert_eq!(
        *tokens.lock().unwrap(),
        vec![None, Some("ghp_fresh".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn shared_link_restores_the_selection() {
    let fake = Arc::new(FakeGitHub::default());
    fake.script("vercel/next.js", vec![Reply::Data(weeks(sunday(), 3))]);
    fake.script("facebook/react", vec![Reply::Data(weeks(sunday(), 3))]);
    let (mut first, _) = dashboard_with(&fake, &[Metric::CommitActivity]);
    first.add("vercel/next.js").unwrap();
    first.add("https://github.com/facebook/react").unwrap();

    let link = first.share_url("https://example.com/").unwrap();
    let (mut second, _) = dashboard_with(&fake, &[Metric::CommitActivity]);
    second.set_selection(Selection::from_url(&link));

    assert_eq!(second.selection(), first.selection());
    assert!(second.wait_settled(Duration::from_secs(10)).await);
    let columns = second.chart(Metric::CommitActivity).unwrap().dataset.columns;
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].full_name(), "vercel/next.js");
}

#[tokio::test(start_paused = true)]
async fn rejected_token_keeps_current_fetches() {
    let fake = Arc::new(FakeGitHub::default());
    fake.script("a/b", vec![Reply::Data(weeks(sunday(), 5))]);
    fake.script("c/d", vec![Reply::Data(weeks(sunday(), 5))]);
    let (mut dashboard, tokens) = dashboard_with(&fake, &[Metric::IssuesOpened]);

    dashboard.add("a/b").unwrap();
    assert!(dashboard.wait_settled(Duration::from_secs(10)).await);

    let err = dashboard.set_token(Some("bad\ntoken".to_string())).unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
    assert!(!dashboard.has_token());
    assert_eq!(*tokens.lock().unwrap(), vec![None]);
    assert_eq!(dashboard.chart(Metric::IssuesOpened).unwrap().dataset.rows.len(), 5);

    dashboard.add("c/d").unwrap();
    assert!(dashboard.wait_settled(Duration::from_secs(10)).await);
    let chart = dashboard.chart(Metric::IssuesOpened).unwrap();
    assert_eq!(chart.dataset.columns.len(), 2);
    assert_eq!(fake.calls("a/b"), 1);
    assert_eq!(fake.calls("c/d"), 1);
}
