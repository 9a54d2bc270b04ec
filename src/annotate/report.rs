use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{correlate, Correlation, FailedAnnotation, NumberedViolationEntry, PageDrift};
use crate::scan::{ensure_scheme, ScanOrchestrator};
use crate::violations::canonical::canonicalize;
use crate::violations::types::Violation;

const SNIPPET_CHARS: usize = 200;
const TEXT_WIDTH: usize = 100;
const LINES_PER_PAGE: usize = 60;

/// Badge and card colour for an impact tag.
pub fn impact_color(impact: &str) -> &'static str {
    match impact {
        "critical" => "#dc3545",
        "serious" => "#fd7e14",
        "moderate" => "#ffc107",
        "minor" => "#28a745",
        _ => "#6c757d",
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub url: String,
    pub generated_at: DateTime<Utc>,
    /// Rule failures, counting a rule once per source that reported it.
    pub violation_count: usize,
    /// Nodes across all violations.
    pub instance_count: usize,
    pub by_rule: BTreeMap<String, usize>,
    pub by_impact: BTreeMap<String, usize>,
}

impl ReportSummary {
    pub fn new(url: &str, generated_at: DateTime<Utc>, violations: &[Violation]) -> Self {
        let mut by_rule = BTreeMap::new();
        let mut by_impact = BTreeMap::new();
        for v in violations {
            *by_rule.entry(v.id.clone()).or_insert(0) += v.nodes.len();
            *by_impact.entry(v.impact_or_unknown().to_string()).or_insert(0) += 1;
        }
        Self {
            url: url.to_string(),
            generated_at,
            violation_count: violations.len(),
            instance_count: violations.iter().map(|v| v.nodes.len()).sum(),
            by_rule,
            by_impact,
        }
    }
}

/// `{host}_{digest}_{YYYYmmdd_HHMMSS}_comprehensive.html`; the digest keeps
/// different pages of one host apart.
pub fn report_filename(url: &str, at: DateTime<Utc>) -> String {
    let canonical = canonicalize(url);
    let host = reqwest::Url::parse(canonical.as_str())
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "site".to_string());
    let host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let digest = blake3::hash(canonical.as_str().as_bytes()).to_hex();
    format!(
        "{}_{}_{}_comprehensive.html",
        host,
        &digest.as_str()[..8],
        at.format("%Y%m%d_%H%M%S")
    )
}

fn snippet(html: &str) -> String {
    if html.chars().count() > SNIPPET_CHARS {
        let cut: String = html.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", cut)
    } else {
        html.to_string()
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn render_entry(out: &mut String, entry: &NumberedViolationEntry) {
    let color = impact_color(&entry.impact);
    let _ = write!(
        out,
        r#"<div class="violation-detail" style="border-left: 4px solid {color};">
<h4>#{number} - {rule}</h4>
<p><strong>Impact:</strong> <span style="color: {color}; font-weight: bold;">{impact}</span></p>
<p><strong>Description:</strong> {description}</p>
<p><strong>Target Element:</strong> <code>{target}</code>"#,
        color = color,
        number = entry.number,
        rule = escape_html(&entry.rule_id),
        impact = escape_html(&title_case(&entry.impact)),
        description = escape_html(&entry.description),
        target = escape_html(&entry.target),
    );
    if entry.total_elements > 1 {
        let _ = write!(
            out,
            " <em>({} of {})</em>",
            entry.element_index, entry.total_elements
        );
    }
    out.push_str("</p>\n");

    let summary = entry
        .failure_summary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("No failure summary available");
    let _ = writeln!(
        out,
        r#"<div class="failure-summary"><strong>Issue:</strong> {}</div>"#,
        escape_html(summary)
    );
    if !entry.html.is_empty() {
        let _ = writeln!(
            out,
            r#"<div class="html-snippet"><strong>HTML:</strong><br><code>{}</code></div>"#,
            escape_html(&snippet(&entry.html))
        );
    }
    out.push_str("</div>\n");
}

fn render_failures(out: &mut String, failures: &[FailedAnnotation]) {
    if failures.is_empty() {
        return;
    }
    out.push_str("<div class=\"failed-annotations\">\n<h3>Elements that could not be highlighted</h3>\n<ul>\n");
    for f in failures {
        let _ = writeln!(
            out,
            "<li><code>{}</code>: {}</li>",
            escape_html(&f.selector),
            escape_html(&f.error)
        );
    }
    out.push_str("</ul>\n</div>\n");
}

fn render_drift(out: &mut String, drift: &PageDrift) {
    let _ = writeln!(
        out,
        "<div class=\"page-drift\"><strong>Note:</strong> the page changed while it was being annotated. \
         {} elements were highlighted, a second walk found {}, first difference at #{}. \
         Entries below follow the badges on the screenshot.</div>",
        drift.rendered, drift.described, drift.first_mismatch
    );
}

const REPORT_CSS: &str = r#"
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; line-height: 1.6; }
.report-header { background: linear-gradient(135deg, #ff6b6b, #ee5a52); color: white; padding: 30px; }
.report-summary { background: #f8f9fa; padding: 25px; margin: 30px; border-radius: 8px; border-left: 5px solid #ff6b6b; }
.website-content { margin: 20px; padding: 20px; border: 2px dashed #007bff; border-radius: 8px; text-align: center; }
.website-content img { max-width: 100%; height: auto; border: 1px solid #ddd; }
.violation-details-section, .failed-annotations { padding: 30px; margin: 30px; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); }
.violation-detail { padding: 20px; margin: 15px 0; border-radius: 8px; border: 1px solid #e9ecef; }
.violation-detail h4 { color: #dc3545; margin-top: 0; }
.page-drift { background: #fff3cd; padding: 15px 25px; margin: 30px; border-radius: 8px; border-left: 5px solid #fd7e14; }
.failure-summary { background: #fff3cd; padding: 10px; border-radius: 4px; border-left: 3px solid #ffc107; }
.html-snippet { background: #f8f9fa; padding: 10px; border-radius: 4px; font-family: 'Courier New', monospace; font-size: 0.9em; }
code { background: #e9ecef; padding: 2px 4px; border-radius: 3px; }
"#;

/// Self-contained HTML report: summary, annotated screenshot, one card per badge.
pub fn render_html(summary: &ReportSummary, correlation: &Correlation) -> String {
    let url = escape_html(&summary.url);
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Accessibility Report - {url}</title>
<style>{css}</style>
</head>
<body>
<div class="report-header">
<h1>Comprehensive Accessibility Report</h1>
<p><strong>Website:</strong> {url}</p>
<p><strong>Generated:</strong> {generated}</p>
<p><strong>Total Violations:</strong> {violations}</p>
<p><strong>Violation Instances:</strong> {instances}</p>
</div>
<div class="report-summary">
<h2>Summary</h2>
<p><strong>Found {entries} highlighted violation instances</strong> on the page.</p>
"#,
        url = url,
        css = REPORT_CSS,
        generated = summary.generated_at.to_rfc3339(),
        violations = summary.violation_count,
        instances = summary.instance_count,
        entries = correlation.entries.len(),
    );

    out.push_str("<h3>By impact</h3>\n<ul>\n");
    for (impact, count) in &summary.by_impact {
        let _ = writeln!(
            out,
            r#"<li><span style="color: {};">{}</span>: {}</li>"#,
            impact_color(impact),
            escape_html(&title_case(impact)),
            count
        );
    }
    out.push_str("</ul>\n<h3>By rule</h3>\n<ul>\n");
    for (rule, count) in &summary.by_rule {
        let _ = writeln!(out, "<li><code>{}</code>: {}</li>", escape_html(rule), count);
    }
    out.push_str("</ul>\n</div>\n");
    if let Some(drift) = &correlation.drift {
        render_drift(&mut out, drift);
    }

    let _ = writeln!(
        out,
        r#"<div class="website-content"><img src="data:image/png;base64,{}" alt="Annotated screenshot of {}"></div>"#,
        STANDARD.encode(&correlation.screenshot),
        url
    );

    out.push_str("<div class=\"violation-details-section\">\n<h2>Detailed Violation Analysis</h2>\n");
    if correlation.entries.is_empty() {
        out.push_str("<p>No violations found.</p>\n");
    }
    for entry in &correlation.entries {
        render_entry(&mut out, entry);
    }
    out.push_str("</div>\n");
    render_failures(&mut out, &correlation.failed_annotations);
    out.push_str("</body>\n</html>\n");
    out
}

/// Fixed-width text rendering of `html`, split into pages of whole lines.
pub fn render_text_pages(html: &str) -> Vec<String> {
    let text = html2text::from_read(html.as_bytes(), TEXT_WIDTH).unwrap_or_else(|e| {
        warn!(error = %e, "text rendering failed, using raw HTML");
        html.to_string()
    });
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return vec![String::new()];
    }
    lines
        .chunks(LINES_PER_PAGE)
        .map(|chunk| chunk.join("\n"))
        .collect()
}

/// A generated report, already written to disk.
pub struct Report {
    pub path: PathBuf,
    pub html: String,
    pub text_pages: Vec<String>,
    pub summary: ReportSummary,
    pub entries: usize,
    pub badges: usize,
    pub failed_annotations: Vec<FailedAnnotation>,
    pub drift: Option<PageDrift>,
}

pub struct ReportGenerator {
    orchestrator: Arc<ScanOrchestrator>,
    reports_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, reports_dir: &Path) -> Self {
        Self {
            orchestrator,
            reports_dir: reports_dir.to_path_buf(),
        }
    }

    /// Annotate `url` with its cached violations (scanning first when there
    /// are none, they are stale, or `refresh` is set) and write the report.
    pub async fn generate(
        &self,
        url: &str,
        model: Option<&str>,
        refresh: bool,
        max_age: Option<chrono::Duration>,
    ) -> Result<Report> {
        let url = ensure_scheme(url);
        let cached = if refresh {
            None
        } else {
            self.orchestrator.store().get_fresh(&url, max_age).await?
        };
        let violations = match cached {
            Some(record) => {
                info!(url = %url, violations = record.violations.len(), "reporting cached violations");
                record.violations
            }
            None => self.orchestrator.scan(&url, model).await?,
        };

        let snapshot = self
            .orchestrator
            .capture()
            .capture(&url, false)
            .await
            .context("Failed to open page for annotation")?;
        let mut page = snapshot.page;
        let correlation = correlate(page.as_mut(), &violations).await;
        if let Err(e) = page.close().await {
            warn!(url = %url, error = %e, "failed to close annotation session");
        }
        let correlation = correlation.context("Failed to annotate page")?;

        let now = Utc::now();
        let summary = ReportSummary::new(&url, now, &violations);
        let html = render_html(&summary, &correlation);
        let text_pages = render_text_pages(&html);

        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .with_context(|| format!("create reports directory {:?}", self.reports_dir))?;
        let path = self.reports_dir.join(report_filename(&url, now));
        tokio::fs::write(&path, &html)
            .await
            .with_context(|| format!("write report {:?}", path))?;

        info!(
            url = %url,
            path = ?path,
            entries = correlation.entries.len(),
            badges = correlation.badges,
            failed = correlation.failed_annotations.len(),
            page_changed = correlation.drift.is_some(),
            "report generated"
        );
        Ok(Report {
            path,
            html,
            text_pages,
            summary,
            entries: correlation.entries.len(),
            badges: correlation.badges,
            failed_annotations: correlation.failed_annotations,
            drift: correlation.drift,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{violation, FakeCapture, FakePage, FakeResolver, FakeRuleScanner, MockAuditor};
    use crate::violations::types::NodeResult;
    use crate::violations::ViolationStore;
    use chrono::TimeZone;

    fn entry(number: usize, impact: &str, html: &str) -> NumberedViolationEntry {
        NumberedViolationEntry {
            number,
            rule_id: "image-alt".into(),
            description: "Images need <alt> text".into(),
            impact: impact.into(),
            target: "img.hero".into(),
            element_index: 2,
            total_elements: 3,
            html: html.into(),
            failure_summary: None,
        }
    }

    #[test]
    fn test_impact_colors() {
        assert_eq!(impact_color("critical"), "#dc3545");
        assert_eq!(impact_color("serious"), "#fd7e14");
        assert_eq!(impact_color("moderate"), "#ffc107");
        assert_eq!(impact_color("minor"), "#28a745");
        assert_eq!(impact_color("unknown"), "#6c757d");
    }

    #[test]
    fn test_filename_has_host_digest_and_time() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let name = report_filename("http://www.example.com/a/?b=1", at);
        assert!(name.starts_with("example.com_"));
        assert!(name.ends_with("_20240501_120000_comprehensive.html"));
        // Same canonical URL, same digest.
        assert_eq!(name, report_filename("https://example.com/a?b=1", at));
        assert_ne!(name, report_filename("https://example.com/b", at));
    }

    #[test]
    fn test_summary_groups_by_rule_and_impact() {
        let violations = vec![
            violation("image-alt", "critical", &[&["img"], &["img.b"]]),
            violation("color-contrast", "serious", &[&["p"]]),
            violation("image-alt", "critical", &[&["img.c"]]),
        ];
        let summary = ReportSummary::new("https://a.com", Utc::now(), &violations);
        assert_eq!(summary.violation_count, 3);
        assert_eq!(summary.instance_count, 4);
        assert_eq!(
            summary.by_rule.keys().collect::<Vec<_>>(),
            vec!["color-contrast", "image-alt"]
        );
        assert_eq!(summary.by_rule["image-alt"], 3);
        assert_eq!(summary.by_impact["critical"], 2);
    }

    #[test]
    fn test_cards_are_escaped_and_snippets_cut() {
        let long_html = format!("<div>{}</div>", "x".repeat(300));
        let correlation = Correlation {
            entries: vec![entry(1, "critical", &long_html)],
            badges: 1,
            failed_annotations: vec![FailedAnnotation {
                selector: "div:has(>".into(),
                error: "bad <selector>".into(),
            }],
            drift: None,
            screenshot: b"png".to_vec(),
        };
        let summary = ReportSummary::new("https://a.com/?q=<script>", Utc::now(), &[]);

        let html = render_html(&summary, &correlation);

        assert!(html.contains("#1 - image-alt"));
        assert!(html.contains("Images need &lt;alt&gt; text"));
        assert!(html.contains("(2 of 3)"));
        assert!(html.contains("No failure summary available"));
        assert!(html.contains("&lt;div&gt;xxx"));
        assert!(html.contains("x..."));
        assert!(!html.contains("<script>"));
        assert!(html.contains("data:image/png;base64,cG5n"));
        assert!(html.contains("bad &lt;selector&gt;"));
    }

    #[test]
    fn test_text_pages_cover_the_report() {
        let correlation = Correlation {
            entries: (1..=40).map(|n| entry(n, "minor", "<img>")).collect(),
            badges: 40,
            failed_annotations: vec![],
            drift: None,
            screenshot: vec![],
        };
        let summary = ReportSummary::new("https://a.com", Utc::now(), &[]);
        let pages = render_text_pages(&render_html(&summary, &correlation));
        assert!(pages.len() > 1);
        assert!(pages.iter().any(|p| p.contains("#40 - image-alt")));
    }

    #[test]
    fn test_page_drift_is_shown_in_report() {
        let mut correlation = Correlation {
            entries: vec![entry(1, "critical", "<img>"), entry(2, "moderate", "<div>")],
            badges: 2,
            failed_annotations: vec![],
            drift: None,
            screenshot: vec![],
        };
        let summary = ReportSummary::new("https://a.com", Utc::now(), &[]);
        assert!(!render_html(&summary, &correlation).contains("page-drift\""));

        correlation.drift = Some(PageDrift {
            rendered: 2,
            described: 1,
            first_mismatch: 2,
        });
        let html = render_html(&summary, &correlation);
        assert!(html.contains("the page changed while it was being annotated"));
        assert!(html.contains("first difference at #2"));
    }

    #[tokio::test]
    async fn test_generate_uses_cache_and_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ViolationStore::open(&dir.path().join("v.json")).await.unwrap());
        let mut cached = violation("image-alt", "critical", &[&["img"]]);
        cached.nodes[0] = NodeResult::new("<img src=\"a.png\">", vec!["img".into()], Some("Add alt".into()));
        store.put("https://a.com", vec![cached]).await.unwrap();

        let page = FakePage::new().with_matches("img", &[1, 2]);
        let log = page.log();
        let rules = Arc::new(FakeRuleScanner::new(vec![]));
        let orchestrator = Arc::new(ScanOrchestrator::new(
            rules.clone(),
            Arc::new(FakeCapture::new(page)),
            Arc::new(FakeResolver::new(Arc::new(MockAuditor::new("gpt-4o", vec![])))),
            store,
            String::new(),
        ));
        let generator = ReportGenerator::new(orchestrator, &dir.path().join("reports"));

        let report = generator.generate("a.com", None, false, None).await.unwrap();

        assert_eq!(rules.call_count(), 0);
        assert_eq!(report.entries, 2);
        assert_eq!(report.badges, 2);
        assert!(report.path.exists());
        assert!(report.html.contains("#2 - image-alt"));
        assert!(report.html.contains("Add alt"));
        assert!(log.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_generate_refresh_rescans() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ViolationStore::open(&dir.path().join("v.json")).await.unwrap());
        store.put("https://a.com", vec![]).await.unwrap();
        let rules = Arc::new(FakeRuleScanner::new(vec![violation("label", "serious", &[&["input"]])]));
        let orchestrator = Arc::new(ScanOrchestrator::new(
            rules.clone(),
            Arc::new(FakeCapture::new(FakePage::new().with_matches("input", &[3]))),
            Arc::new(FakeResolver::new(Arc::new(MockAuditor::new("gpt-4o", vec![])))),
            store.clone(),
            String::new(),
        ));
        let generator = ReportGenerator::new(orchestrator, dir.path());

        let report = generator.generate("https://a.com", None, true, None).await.unwrap();

        assert_eq!(rules.call_count(), 1);
        assert_eq!(report.entries, 1);
        assert_eq!(store.get("https://a.com").await.unwrap().unwrap().violations.len(), 1);
    }
}
