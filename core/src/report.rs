//! Report rendering for scan results.
//!
//! Every renderer is a pure function of the ordered result list and the
//! options: no clock, no environment, no I/O. [`write_report`] is the only
//! part that touches the disk.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::core::result_aggregator::ScanResult;
use crate::error::{Result, ScanError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Html,
    Csv,
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }

    /// Format implied by the file extension, if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()?.to_str()?.parse().ok()
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ReportFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "html" | "htm" => Ok(ReportFormat::Html),
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            other => Err(ScanError::Config(format!("unknown report format '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub title: String,
    /// Rendered rows are cut off after this many results.
    pub max_rows: Option<usize>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            title: "Sondar Scan Report".to_string(),
            max_rows: None,
        }
    }
}

/// Counts shared by all formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total: usize,
    pub test_cases: usize,
    pub findings: usize,
    pub errors: usize,
    pub rendered: usize,
    pub omitted: usize,
}

impl ReportSummary {
    pub fn new(results: &[ScanResult], options: &ReportOptions) -> Self {
        let rendered = options.max_rows.map_or(results.len(), |max| results.len().min(max));
        Self {
            total: results.len(),
            test_cases: results.iter().filter(|r| !r.is_baseline()).count(),
            findings: results.iter().filter(|r| r.found).count(),
            errors: results.iter().filter(|r| r.error.is_some()).count(),
            rendered,
            omitted: results.len() - rendered,
        }
    }
}

pub fn render(results: &[ScanResult], format: ReportFormat, options: &ReportOptions) -> Result<String> {
    match format {
        ReportFormat::Html => Ok(render_html(results, options)),
        ReportFormat::Csv => Ok(render_csv(results, options)),
        ReportFormat::Json => render_json(results, options),
    }
}

/// Renders and writes the report; returns the number of rendered rows.
pub fn write_report(path: &Path, results: &[ScanResult], format: ReportFormat, options: &ReportOptions) -> Result<usize> {
    let body = render(results, format, options)?;
    std::fs::write(path, body).map_err(|e| ScanError::io(path, e))?;
    Ok(ReportSummary::new(results, options).rendered)
}

fn section_label(result: &ScanResult) -> &'static str {
    result.section.map_or("baseline", |s| s.label())
}

fn status_label(result: &ScanResult) -> String {
    result.status_code().map_or_else(|| "-".to_string(), |s| s.to_string())
}

/// Self-contained HTML page with embedded CSS and a client-side row filter.
pub fn render_html(results: &[ScanResult], options: &ReportOptions) -> String {
    let summary = ReportSummary::new(results, options);
    let target = results.first().map(|r| r.request.url.as_str()).unwrap_or("-");

    let mut rows = String::new();
    for (i, r) in results.iter().take(summary.rendered).enumerate() {
        let (row_class, verdict) = match (r.found, &r.error) {
            (true, _) => ("found", "Found"),
            (false, Some(_)) => ("failed", "Error"),
            (false, None) => ("clean", "-"),
        };
        rows.push_str(&format!(
            r#"<tr class="{}">
                <td>{}</td>
                <td>{}</td>
                <td class="mono">{}</td>
                <td class="mono">{}</td>
                <td class="mono">{}</td>
                <td>{}</td>
                <td>{}</td>
                <td>{}ms</td>
                <td><span class="verdict">{}</span></td>
                <td class="mono curl-cell">{}</td>
            </tr>"#,
            row_class,
            i + 1,
            section_label(r),
            html_escape(&r.target),
            html_escape(&r.vector.payload),
            html_escape(&r.request.url),
            status_label(r),
            r.response_body_length,
            r.duration_ms,
            verdict,
            html_escape(r.error.as_deref().unwrap_or(&r.to_curl())),
        ));
    }

    let omitted_note = if summary.omitted > 0 {
        format!(r#"<div class="empty">{} more result(s) omitted.</div>"#, summary.omitted)
    } else {
        String::new()
    };

    format!(r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<style>
* {{ margin: 0; padding: 0; box-sizing: border-box; }}
body {{ background: #0a0a0c; color: #e1e1e6; font-family: 'Inter', system-ui, sans-serif; padding: 2rem; }}
.header h1 {{ font-size: 1.5rem; font-weight: 700; margin-bottom: 2rem; }}
.meta {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(200px, 1fr)); gap: 1rem; margin-bottom: 2rem; }}
.meta-card {{ background: rgba(255,255,255,0.035); border: 1px solid rgba(255,255,255,0.08); border-radius: 12px; padding: 1.25rem; }}
.meta-card .label {{ font-size: 0.7rem; text-transform: uppercase; letter-spacing: 0.08em; color: #64647a; margin-bottom: 0.5rem; }}
.meta-card .value {{ font-size: 1.75rem; font-weight: 700; font-family: 'JetBrains Mono', monospace; word-break: break-all; }}
.value.critical {{ color: #f43f5e; }}
.value.medium {{ color: #eab308; }}
.value.accent {{ color: #00d5be; font-size: 1rem; }}
table {{ width: 100%; border-collapse: collapse; font-size: 0.85rem; }}
thead th {{ text-align: left; padding: 0.75rem 1rem; border-bottom: 1px solid rgba(255,255,255,0.08); color: #64647a; font-size: 0.7rem; text-transform: uppercase; letter-spacing: 0.08em; }}
tbody td {{ padding: 0.75rem 1rem; border-bottom: 1px solid rgba(255,255,255,0.04); }}
tbody tr:hover {{ background: rgba(255,255,255,0.03); }}
tr.found .verdict {{ color: #f43f5e; font-weight: 700; }}
tr.failed .verdict {{ color: #eab308; }}
.mono {{ font-family: 'JetBrains Mono', monospace; font-size: 0.8rem; }}
.curl-cell {{ max-width: 300px; overflow: hidden; text-overflow: ellipsis; white-space: nowrap; color: #94949e; }}
.panel {{ background: rgba(255,255,255,0.02); border: 1px solid rgba(255,255,255,0.08); border-radius: 12px; overflow: hidden; margin-bottom: 2rem; }}
.panel-header {{ padding: 1rem 1.25rem; border-bottom: 1px solid rgba(255,255,255,0.08); font-weight: 600; font-size: 0.85rem; }}
.filter-bar {{ padding: 0.75rem 1.25rem; border-bottom: 1px solid rgba(255,255,255,0.04); }}
.filter-bar input {{ background: #151518; border: 1px solid rgba(255,255,255,0.08); border-radius: 8px; padding: 0.5rem 0.75rem; color: #e1e1e6; font-size: 0.85rem; width: 300px; outline: none; }}
.empty {{ padding: 3rem; text-align: center; color: #64647a; }}
</style>
</head>
<body>
<div class="header"><h1>{title}</h1></div>

<div class="meta">
    <div class="meta-card"><div class="label">Baseline</div><div class="value accent">{target}</div></div>
    <div class="meta-card"><div class="label">Test Cases</div><div class="value">{cases}</div></div>
    <div class="meta-card"><div class="label">Findings</div><div class="value critical">{findings}</div></div>
    <div class="meta-card"><div class="label">Errors</div><div class="value medium">{errors}</div></div>
</div>

<div class="panel">
    <div class="panel-header">Results</div>
    <div class="filter-bar"><input type="text" id="filter" placeholder="Filter by target, payload, or URL..." oninput="filterTable()"></div>
    {table_or_empty}
    {omitted_note}
</div>

<script>
function filterTable() {{
    const q = document.getElementById('filter').value.toLowerCase();
    document.querySelectorAll('tbody tr').forEach(r => {{
        r.style.display = r.textContent.toLowerCase().includes(q) ? '' : 'none';
    }});
}}
</script>
</body>
</html>"#,
        title = html_escape(&options.title),
        target = html_escape(target),
        cases = summary.test_cases,
        findings = summary.findings,
        errors = summary.errors,
        table_or_empty = if summary.rendered == 0 {
            r#"<div class="empty">No results to display.</div>"#.to_string()
        } else {
            format!(r#"<table><thead><tr><th>#</th><th>Section</th><th>Target</th><th>Payload</th><th>URL</th><th>Status</th><th>Length</th><th>Timing</th><th>Verdict</th><th>Reproduce</th></tr></thead><tbody>{}</tbody></table>"#, rows)
        },
        omitted_note = omitted_note,
    )
}

pub fn render_csv(results: &[ScanResult], options: &ReportOptions) -> String {
    let summary = ReportSummary::new(results, options);
    let mut csv = String::new();

    csv.push_str("ID,Section,Target,Payload,Marker,Method,URL,Status,Length,DurationMs,Found,Error,SavedBody\n");

    for (idx, r) in results.iter().take(summary.rendered).enumerate() {
        let row = vec![
            (idx + 1).to_string(),
            section_label(r).to_string(),
            csv_escape(&r.target),
            csv_escape(&r.vector.payload),
            csv_escape(r.vector.marker()),
            r.request.method.clone(),
            csv_escape(&r.request.url),
            status_label(r),
            r.response_body_length.to_string(),
            r.duration_ms.to_string(),
            r.found.to_string(),
            csv_escape(r.error.as_deref().unwrap_or("")),
            csv_escape(&r.saved_body_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()),
        ];

        csv.push_str(&row.join(","));
        csv.push('\n');
    }

    csv
}

#[derive(Serialize)]
struct JsonReport<'a> {
    title: &'a str,
    summary: ReportSummary,
    results: &'a [ScanResult],
}

pub fn render_json(results: &[ScanResult], options: &ReportOptions) -> Result<String> {
    let summary = ReportSummary::new(results, options);
    let report = JsonReport {
        title: &options.title,
        summary,
        results: &results[..summary.rendered],
    };
    serde_json::to_string_pretty(&report).map_err(|e| ScanError::Config(format!("cannot serialize report: {}", e)))
}

/// Escape a value for CSV (handle commas, quotes, newlines)
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
