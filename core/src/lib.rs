pub mod core;
pub mod error;
pub mod fuzzer;
pub mod http;
pub mod report;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use crate::core::engine::{ScanEngine, ScanOptions, BASELINE_TARGET};
pub use crate::core::mutator::{
    AllowAll, CaseFilter, Decision, InjectionPoint, MutationStrategy, SkipTargets, TestCase,
};
pub use crate::core::result_aggregator::{ResultAggregator, ScanResult};
pub use crate::core::vectors::{AttackVector, Section, VectorCatalog};
pub use crate::error::{Result, ScanError};
pub use crate::http::{HttpClient, HttpRequest};
pub use crate::report::{ReportFormat, ReportOptions};

/// Shared scan configuration, loadable from JSON and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    /// Saved raw HTTP request used as the baseline.
    pub input: String,
    /// Baseline URL when no request file is given.
    pub url: String,
    pub host: String,
    pub scheme: String,
    /// Attack-vector JSON file.
    pub vectors: String,
    /// Plain wordlist, one payload per line.
    pub payloads: String,
    pub scan_headers: bool,
    pub output_dir: String,
    pub report: String,
    pub format: String,
    /// JSONL file every result is appended to.
    pub results: String,
    pub timeout: u64,
    pub proxy: String,
    /// `Name: value` lines added to the baseline.
    pub headers: Vec<String>,
    /// Target descriptors never executed, e.g. `header cookie`.
    pub skip: Vec<String>,
    /// 0 means unlimited.
    pub max_test_cases: usize,
    /// 0 means unlimited.
    pub max_rows: usize,
    pub verbose: bool,
    pub dry_run: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            url: String::new(),
            host: String::new(),
            scheme: String::new(),
            vectors: String::new(),
            payloads: String::new(),
            scan_headers: false,
            output_dir: String::new(),
            report: String::new(),
            format: String::new(),
            results: String::new(),
            timeout: 5,
            proxy: String::new(),
            headers: Vec::new(),
            skip: Vec::new(),
            max_test_cases: 0,
            max_rows: 0,
            verbose: false,
            dry_run: false,
        }
    }
}

impl ScanConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
        serde_json::from_str(&data).map_err(|e| ScanError::json("config file", e))
    }

    /// Rejects configurations that cannot start a scan.
    pub fn validate(&self) -> Result<()> {
        match (self.input.is_empty(), self.url.is_empty()) {
            (true, true) => return Err(ScanError::Config("either a request file or a URL is required".into())),
            (false, false) => return Err(ScanError::Config("a request file and a URL are mutually exclusive".into())),
            _ => {}
        }
        if self.vectors.is_empty() && self.payloads.is_empty() {
            return Err(ScanError::Config("a vector file or a payload list is required".into()));
        }
        if self.timeout == 0 {
            return Err(ScanError::Config("timeout must be at least one second".into()));
        }
        if !self.scheme.is_empty() && self.scheme != "http" && self.scheme != "https" {
            return Err(ScanError::Config(format!("unsupported scheme '{}'", self.scheme)));
        }
        self.report_format()?;
        Ok(())
    }

    pub fn parsed_headers(&self) -> Vec<(String, String)> {
        parse_custom_headers(&self.headers)
    }

    pub fn proxy_ref(&self) -> Option<&str> {
        if self.proxy.is_empty() { None } else { Some(&self.proxy) }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            scan_headers: self.scan_headers,
            output_dir: non_empty(&self.output_dir).map(PathBuf::from),
            max_test_cases: (self.max_test_cases > 0).then_some(self.max_test_cases),
        }
    }

    pub fn case_filter(&self) -> SkipTargets {
        SkipTargets::new(self.skip.clone())
    }

    /// Explicit format first, then the report file's extension, then HTML.
    pub fn report_format(&self) -> Result<Option<ReportFormat>> {
        if self.report.is_empty() {
            return Ok(None);
        }
        if !self.format.is_empty() {
            return self.format.parse().map(Some);
        }
        Ok(Some(ReportFormat::from_path(Path::new(&self.report)).unwrap_or(ReportFormat::Html)))
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            max_rows: (self.max_rows > 0).then_some(self.max_rows),
            ..ReportOptions::default()
        }
    }

    /// Loads or synthesizes the baseline, then applies overrides and custom headers.
    pub fn load_baseline(&self) -> Result<HttpRequest> {
        let mut request = if self.input.is_empty() {
            HttpRequest::get(&self.url)?
        } else {
            http::wire::load_request_file(&self.input)?
        };
        request.apply_overrides(non_empty(&self.host), non_empty(&self.scheme))?;
        request.set_headers(&self.parsed_headers())?;
        Ok(request)
    }

    /// Vector file entries first, then wordlist payloads.
    pub fn load_catalog(&self) -> Result<VectorCatalog> {
        let mut catalog = match non_empty(&self.vectors) {
            Some(path) => VectorCatalog::load(path)?,
            None => VectorCatalog::default(),
        };
        if let Some(path) = non_empty(&self.payloads) {
            catalog.extend(VectorCatalog::load_wordlist(path)?);
        }
        Ok(catalog)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter().filter_map(|h| {
        let mut parts = h.splitn(2, ':');
        let key = parts.next()?.trim().to_string();
        let val = parts.next().unwrap_or("").trim().to_string();
        if key.is_empty() { return None; }
        Some((key, val))
    }).collect()
}

/// Output abstraction for the scan pipeline.
pub trait ScanEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, result: &ScanResult);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn ScanEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl ScanEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        use std::io::Write;
        let colored = match level {
            "success" => message.green().to_string(),
            "error"   => message.red().to_string(),
            "warn"    => message.yellow().to_string(),
            "phase"   => message.bright_cyan().bold().to_string(),
            _         => message.to_string(),
        };
        print!("{}\r\n", colored);
        std::io::stdout().flush().ok();
    }

    fn on_finding(&self, result: &ScanResult) {
        use colored::*;
        use std::io::Write;
        let out = |text: &str| {
            print!("{}\r\n", text);
            std::io::stdout().flush().ok();
        };
        let kind = if result.vector.sql_injection { "SQL injection" } else { "Reflection" };
        out(&format!("\n{} {} detected!", "[+]".green().bold(), kind.red().bold()));
        out(&format!("    Target:  {}", result.target.white()));
        out(&format!("    URL:     {}", result.request.url.white()));
        out(&format!("    Payload: {}", result.vector.payload.bright_yellow()));
        out(&format!(
            "    Info:    Status [{}] | Length [{}] | Time [{}ms]",
            result.status_code().map_or("N/A".to_string(), |s| s.to_string()).cyan(),
            result.response_body_length.to_string().blue(),
            result.duration_ms.to_string().dimmed()
        ));
        out(&format!("    curl:    {}", result.to_curl().dimmed()));
        out(&"──────────────────────────────────────────".dimmed().to_string());
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        use std::io::Write;
        if total > 0 {
            print!("{}\r\n", format!("[*] {} ({}/{})", phase, current, total).bright_cyan());
        } else {
            print!("{}\r\n", format!("[*] {}", phase).bright_cyan());
        }
        std::io::stdout().flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn url_config() -> ScanConfig {
        ScanConfig {
            url: "http://example.test/search?q=1".to_string(),
            vectors: "vectors.json".to_string(),
            ..ScanConfig::default()
        }
    }

    #[test]
    fn test_config_from_partial_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"url": "http://a.test/", "scanHeaders": true, "maxTestCases": 10, "skip": ["header cookie"]}}"#).unwrap();

        let config = ScanConfig::load(file.path()).unwrap();
        assert_eq!(config.url, "http://a.test/");
        assert!(config.scan_headers);
        assert_eq!(config.timeout, 5);
        assert_eq!(config.scan_options().max_test_cases, Some(10));
        assert_eq!(config.skip, vec!["header cookie".to_string()]);
    }

    #[test]
    fn test_validate() {
        assert!(url_config().validate().is_ok());

        let neither = ScanConfig { url: String::new(), ..url_config() };
        assert!(matches!(neither.validate(), Err(ScanError::Config(_))));

        let both = ScanConfig { input: "req.txt".to_string(), ..url_config() };
        assert!(both.validate().is_err());

        let no_vectors = ScanConfig { vectors: String::new(), ..url_config() };
        assert!(no_vectors.validate().is_err());

        let bad_format = ScanConfig {
            report: "out.txt".to_string(),
            format: "pdf".to_string(),
            ..url_config()
        };
        assert!(bad_format.validate().is_err());
    }

    #[test]
    fn test_report_format_resolution() {
        let mut config = url_config();
        assert_eq!(config.report_format().unwrap(), None);

        config.report = "scan.csv".to_string();
        assert_eq!(config.report_format().unwrap(), Some(ReportFormat::Csv));

        config.report = "scan.out".to_string();
        assert_eq!(config.report_format().unwrap(), Some(ReportFormat::Html));

        config.format = "json".to_string();
        assert_eq!(config.report_format().unwrap(), Some(ReportFormat::Json));
    }

    #[test]
    fn test_load_baseline_applies_overrides_and_headers() {
        let config = ScanConfig {
            url: "http://example.test/a?x=1".to_string(),
            host: "target.test:8443".to_string(),
            scheme: "https".to_string(),
            headers: vec!["Cookie: sid=1; theme=dark".to_string(), "X-Api-Key: k".to_string()],
            ..url_config()
        };
        let request = config.load_baseline().unwrap();
        assert_eq!(request.url.as_str(), "https://target.test:8443/a?x=1");
        assert_eq!(request.headers.get("cookie").unwrap(), "sid=1; theme=dark");
        assert_eq!(request.headers.get("x-api-key").unwrap(), "k");
    }

    #[test]
    fn test_load_catalog_merges_sources() {
        let mut vectors = NamedTempFile::new().unwrap();
        write!(vectors, r#"[{{"Vector": "'", "Test": "SQL syntax"}}]"#).unwrap();
        let mut payloads = NamedTempFile::new().unwrap();
        writeln!(payloads, "<x>").unwrap();

        let config = ScanConfig {
            vectors: vectors.path().to_string_lossy().into_owned(),
            payloads: payloads.path().to_string_lossy().into_owned(),
            ..url_config()
        };
        let catalog = config.load_catalog().unwrap();
        let payloads: Vec<_> = catalog.iter().map(|v| v.payload.as_str()).collect();
        assert_eq!(payloads, vec!["'", "<x>"]);
    }

    #[test]
    fn test_parse_custom_headers() {
        let raw = vec!["Authorization: Bearer a:b".to_string(), ": nothing".to_string(), "X-Empty".to_string()];
        assert_eq!(
            parse_custom_headers(&raw),
            vec![
                ("Authorization".to_string(), "Bearer a:b".to_string()),
                ("X-Empty".to_string(), String::new()),
            ]
        );
    }
}
