//! HTML dashboard generator with Chart.js

use crate::chart::ChartView;
use crate::error::{Error, Result};
use chrono::Utc;
use minijinja::{context, Environment};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// HTML template for the comparison dashboard
const DASHBOARD_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{ title }}</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js@4.4.1/dist/chart.umd.min.js"></script>
    <style>
        :root {
            --page: #0d1117; --panel: #161b22; --panel-head: #21262d; --line: #30363d;
            --fg: #c9d1d9; --fg-dim: #8b949e; --fg-faint: #6e7681;
            --warn: #d29922; --bad: #f85149; --link: #58a6ff;
        }
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body { font: 15px/1.5 system-ui, -apple-system, 'Segoe UI', sans-serif; background: var(--page); color: var(--fg); }
        main { max-width: 1200px; margin: 0 auto; padding: 1.5rem; }
        .masthead { display: flex; flex-wrap: wrap; align-items: baseline; justify-content: space-between; gap: 0.5rem; margin-bottom: 1.5rem; padding-bottom: 1rem; border-bottom: 1px solid var(--line); }
        .masthead h1 { font-size: 1.8rem; font-weight: 600; }
        .meta { color: var(--fg-faint); font-size: 0.85rem; }
        .meta a { color: var(--link); word-break: break-all; }
        .panel { background: var(--panel); border: 1px solid var(--line); border-radius: 10px; margin-bottom: 1.5rem; }
        .panel-head { display: flex; justify-content: space-between; align-items: center; padding: 0.9rem 1.25rem; background: var(--panel-head); border-radius: 10px 10px 0 0; }
        .panel-head h2 { font-size: 1.1rem; }
        .counts { color: var(--fg-dim); font-size: 0.85rem; }
        .repos { list-style: none; display: flex; flex-wrap: wrap; gap: 0.5rem 1.25rem; padding: 0.9rem 1.25rem 0; font-family: ui-monospace, 'Fira Code', monospace; font-size: 0.85rem; }
        .swatch { display: inline-block; width: 10px; height: 10px; margin-right: 0.4rem; border-radius: 2px; }
        .note { margin: 0.75rem 1.25rem 0; padding: 0.5rem 0.9rem; border-left: 3px solid; font-size: 0.85rem; }
        .note.computing { border-color: var(--warn); color: var(--warn); }
        .note.failed { border-color: var(--bad); color: var(--bad); }
        .note.partial { border-color: var(--warn); color: var(--fg-dim); }
        .repos a { color: inherit; text-decoration: none; }
        .plot { position: relative; height: 360px; padding: 1.25rem; }
        .placeholder { padding: 2.5rem; text-align: center; color: var(--fg-faint); }
        footer { padding: 1.5rem 0; text-align: center; color: var(--fg-faint); font-size: 0.8rem; }
        footer a { color: var(--link); }
        @media (max-width: 700px) { main { padding: 0.75rem; } .plot { height: 260px; } }
    </style>
</head>
<body>
    <main>
        <div class="masthead">
            <h1>{{ title }}</h1>
            <div class="meta">
                Generated {{ generated_at }}
                {% if share_url %}<br>Share: <a href="{{ share_url }}">{{ share_url }}</a>{% endif %}
            </div>
        </div>

        {% for chart in charts %}
        <section class="panel">
            <div class="panel-head">
                <h2>{{ chart.title }}</h2>
                <span class="counts">{{ chart.repo_count }} repositories &middot; {{ chart.week_count }} weeks</span>
            </div>
            <ul class="repos">
                {% for entry in chart.legend %}
                <li><span class="swatch" style="background: {{ entry.color }}"></span><a href="{{ entry.url }}">{{ entry.name }}</a></li>
                {% endfor %}
            </ul>
            {% for message in chart.computing %}<p class="note computing">{{ message }}</p>{% endfor %}
            {% for message in chart.errors %}<p class="note failed">{{ message }}</p>{% endfor %}
            {% for message in chart.warnings %}<p class="note partial">{{ message }}</p>{% endfor %}
            {% if chart.has_data %}
            <div class="plot"><canvas id="chart-{{ loop.index0 }}"></canvas></div>
            {% elif chart.loading %}
            <p class="placeholder">Loading...</p>
            {% else %}
            <p class="placeholder">No data available for the selected repositories.</p>
            {% endif %}
        </section>
        {% else %}
        <p class="placeholder">No repositories selected. Add one with <code>repo-pulse compare owner/repo</code>.</p>
        {% endfor %}

        <footer>Data from the <a href="https://docs.github.com/en/rest/metrics/statistics">GitHub statistics API</a></footer>
    </main>

    <script>
        const CHARTS = {{ chart_data_json | safe }};
        const GRID = '#30363d';
        const TICK = '#8b949e';
        const nameOf = repo => repo.owner + '/' + repo.name;

        document.addEventListener('DOMContentLoaded', () => {
            CHARTS.forEach((chart, i) => {
                const canvas = document.getElementById('chart-' + i);
                if (!canvas || chart.dataset.rows.length === 0) return;

                const colorOf = new Map(chart.legend.map(e => [nameOf(e.repo).toLowerCase(), e.color]));
                const datasets = chart.dataset.columns.map((repo, col) => ({
                    label: nameOf(repo),
                    data: chart.dataset.rows.map(row => row.values[col]),
                    borderColor: colorOf.get(nameOf(repo).toLowerCase()),
                    spanGaps: false,
                    tension: 0.25,
                    pointRadius: 1.5
                }));

                new Chart(canvas, {
                    type: 'line',
                    data: { labels: chart.dataset.rows.map(row => row.label), datasets },
                    options: {
                        maintainAspectRatio: false,
                        interaction: { mode: 'index', intersect: false },
                        plugins: { legend: { display: false } },
                        scales: {
                            x: { grid: { color: GRID }, ticks: { color: TICK } },
                            y: {
                                beginAtZero: true,
                                grid: { color: GRID },
                                ticks: { color: TICK, precision: 0 },
                                title: { display: true, text: chart.title, color: TICK }
                            }
                        }
                    }
                });
            });
        });
    </script>
</body>
</html>
"#;

/// Dashboard configuration
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Title for the dashboard
    pub title: String,
    /// Path to output directory
    pub output_dir: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            title: "Repository Comparison".to_string(),
            output_dir: "repo-pulse".to_string(),
        }
    }
}

/// One chart section for template rendering
#[derive(Debug, Clone, Serialize)]
struct ChartSection {
    title: &'static str,
    repo_count: usize,
    week_count: usize,
    legend: Vec<LegendItem>,
    computing: Vec<String>,
    errors: Vec<String>,
    warnings: Vec<String>,
    has_data: bool,
    loading: bool,
}

#[derive(Debug, Clone, Serialize)]
struct LegendItem {
    name: String,
    url: String,
    color: &'static str,
}

impl From<&ChartView> for ChartSection {
    fn from(view: &ChartView) -> Self {
        Self {
            title: view.title,
            repo_count: view.legend.len(),
            week_count: view.dataset.rows.len(),
            legend: view
                .legend
                .iter()
                .map(|entry| LegendItem {
                    name: entry.repo.full_name(),
                    url: entry.repo.html_url(),
                    color: entry.color,
                })
                .collect(),
            computing: view.computing_messages().into_iter().map(str::to_string).collect(),
            errors: view.errors().into_iter().map(str::to_string).collect(),
            warnings: view.warnings().into_iter().map(str::to_string).collect(),
            has_data: !view.dataset.is_empty(),
            loading: view.is_loading(),
        }
    }
}

/// Generate the HTML dashboard
pub fn generate_dashboard(
    views: &[ChartView],
    config: &DashboardConfig,
    share_url: Option<&str>,
) -> Result<String> {
    let mut env = Environment::new();
    // The .html suffix turns on auto-escaping
    env.add_template("dashboard.html", DASHBOARD_TEMPLATE)?;

    let template = env.get_template("dashboard.html")?;

    let charts: Vec<ChartSection> = if views.iter().all(ChartView::is_empty) {
        Vec::new()
    } else {
        views.iter().map(ChartSection::from).collect()
    };

    // Keep error text from closing the inline script
    let chart_data_json = serde_json::to_string(views)?.replace("</", "<\\/");

    let html = template.render(context! {
        title => &config.title,
        generated_at => Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        share_url => share_url,
        charts => charts,
        chart_data_json => chart_data_json,
    })?;

    Ok(html)
}

/// Write `index.html` and `data.json` into the configured output directory
pub fn write_dashboard(
    views: &[ChartView],
    config: &DashboardConfig,
    share_url: Option<&str>,
    base_path: &Path,
) -> Result<PathBuf> {
    let output_dir = base_path.join(&config.output_dir);
    std::fs::create_dir_all(&output_dir).map_err(|e| Error::FileWriteError {
        path: output_dir.display().to_string(),
        source: e,
    })?;

    let html = generate_dashboard(views, config, share_url)?;
    let index_path = output_dir.join("index.html");
    std::fs::write(&index_path, html)?;

    // Also write the raw data as JSON
    let data_path = output_dir.join("data.json");
    let json = serde_json::to_string_pretty(views)?;
    std::fs::write(&data_path, json)?;

    Ok(index_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignPolicy;
    use crate::orchestrator::FetchState;
    use crate::repo::RepoRef;
    use crate::series::{Metric, Series, WeeklyPoint};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn repo(s: &str) -> RepoRef {
        RepoRef::parse(s).unwrap()
    }

    fn ready(values: &[u64]) -> FetchState {
        let start = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap();
        FetchState::Ready(Series::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| WeeklyPoint::new(start + Duration::weeks(i as i64), *v))
                .collect(),
        ))
    }

    #[test]
    fn test_generate_dashboard_empty() {
        let views = vec![ChartView::build(Metric::CommitActivity, &[], AlignPolicy::default())];
        let html = generate_dashboard(&views, &DashboardConfig::default(), None).unwrap();
        assert!(html.contains("No repositories selected"));
    }

    #[test]
    fn test_generate_dashboard_with_data() {
        let snapshot = vec![
            (repo("tokio-rs/tokio"), ready(&[12, 15, 9])),
            (repo("a/broken"), FetchState::Failed("GitHub API error: <b>nope</b>".to_string())),
            (repo("vercel/next.js"), FetchState::Computing),
        ];
        let views = vec![ChartView::build(Metric::CommitActivity, &snapshot, AlignPolicy::default())];
        let config = DashboardConfig {
            title: "Test Comparison".to_string(),
            ..Default::default()
        };

        let html = generate_dashboard(&views, &config, Some("https://example.com/?repos=tokio-rs%2Ftokio")).unwrap();
        assert!(html.contains("Test Comparison"));
        assert!(html.contains("Commit Activity"));
        // Slashes are entity-escaped in text
        assert!(html.contains("tokio-rs&#x2f;tokio"));
        assert!(html.contains("chart-0"));
        assert!(html.contains("GitHub is computing statistics for vercel"));
        assert!(html.contains("&lt;b&gt;nope"));
        assert!(!html.contains("<b>nope</b>"));
        assert!(html.contains("github.com&#x2f;tokio-rs&#x2f;tokio"));
    }

    #[test]
    fn test_write_dashboard_creates_files() {
        let dir = TempDir::new().unwrap();
        let snapshot = vec![(repo("a/one"), ready(&[1]))];
        let views = vec![ChartView::build(Metric::IssuesClosed, &snapshot, AlignPolicy::default())];

        let index = write_dashboard(&views, &DashboardConfig::default(), None, dir.path()).unwrap();
        assert!(index.exists());
        assert!(index.with_file_name("data.json").exists());
    }
}
