use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::vectors::{AttackVector, Section};
use crate::error::ScanError;
use crate::SinkRef;

/// What was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
    pub protocol: String,
}

/// What came back, minus the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub content_length: Option<u64>,
    pub protocol: String,
}

/// Outcome of one executed test case, or of the baseline request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub vector: Arc<AttackVector>,
    /// `None` for the baseline.
    pub section: Option<Section>,
    pub target: String,
    pub duration_ms: u128,
    pub request: RequestSnapshot,
    pub response: Option<ResponseSnapshot>,
    pub error: Option<String>,
    pub found: bool,
    pub response_body_length: usize,
    pub saved_body_path: Option<PathBuf>,
}

impl ScanResult {
    pub fn is_baseline(&self) -> bool {
        self.section.is_none()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status_code)
    }

    /// Builds a curl command that reproduces this request.
    pub fn to_curl(&self) -> String {
        let mut parts = vec![format!("curl -X {} '{}'", self.request.method, self.request.url)];
        for (k, v) in &self.request.headers {
            parts.push(format!("-H '{}: {}'", k, v));
        }
        parts.push("--insecure".to_string());
        if self.section == Some(Section::PathSegment) {
            parts.push("--path-as-is".to_string());
        }
        parts.join(" ")
    }
}

/// Collects results into the reporting order: baseline first, then query,
/// header and path results, each group in generation order.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    baseline: Vec<ScanResult>,
    query: Vec<ScanResult>,
    header: Vec<ScanResult>,
    path: Vec<ScanResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ScanResult) {
        match result.section {
            None => self.baseline.push(result),
            Some(Section::Query) => self.query.push(result),
            Some(Section::Header) => self.header.push(result),
            Some(Section::PathSegment) => self.path.push(result),
        }
    }

    pub fn len(&self) -> usize {
        self.baseline.len() + self.query.len() + self.header.len() + self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_results(self) -> Vec<ScanResult> {
        let mut ordered = self.baseline;
        ordered.extend(self.query);
        ordered.extend(self.header);
        ordered.extend(self.path);
        ordered
    }

    /// Drains the engine's channel.
    ///
    /// Findings are announced on `sink` as they arrive. With `jsonl_path`
    /// set, every result is also appended there as one JSON line; a failing
    /// log file is reported once and never costs a result.
    pub async fn run(mut receiver: mpsc::Receiver<ScanResult>, jsonl_path: Option<&Path>, sink: SinkRef) -> Vec<ScanResult> {
        let mut file = jsonl_path.and_then(|path| match open_log(path) {
            Ok(f) => Some(f),
            Err(e) => {
                sink.on_log("error", &format!("[!] {}", e));
                None
            }
        });

        let mut aggregator = Self::new();

        while let Some(result) = receiver.recv().await {
            if result.found {
                sink.on_finding(&result);
            }

            if let Some(f) = file.as_mut() {
                let written = serde_json::to_string(&result)
                    .map_err(std::io::Error::from)
                    .and_then(|line| writeln!(f, "{}", line));
                if let Err(e) = written {
                    warn!("Dropping results log after write failure: {}", e);
                    file = None;
                }
            }

            aggregator.push(result);
        }

        aggregator.into_results()
    }

    pub fn report_summary(results: &[ScanResult], sink: &SinkRef) {
        let executed = results.iter().filter(|r| !r.is_baseline()).count();
        let errors = results.iter().filter(|r| r.error.is_some()).count();
        let findings: Vec<&ScanResult> = results.iter().filter(|r| r.found && !r.is_baseline()).collect();

        sink.on_log(
            "phase",
            &format!("[*] {} test case(s) executed, {} transport error(s)", executed, errors),
        );

        if findings.is_empty() {
            sink.on_log("success", "[+] No reflections found.");
        } else {
            sink.on_log("warn", &format!("[+] {} finding(s) discovered:", findings.len()));
            for (i, r) in findings.iter().enumerate() {
                sink.on_log(
                    "error",
                    &format!("  #{} {} → {} (payload: {})", i + 1, r.target, r.request.url, r.vector.payload),
                );
            }
        }
    }
}

fn open_log(path: &Path) -> Result<File, ScanError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ScanError::io(path, e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{ScanEventSink, SinkRef};
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub logs: Mutex<Vec<String>>,
        pub findings: Mutex<Vec<String>>,
    }

    impl ScanEventSink for RecordingSink {
        fn on_log(&self, _level: &str, message: &str) {
            self.logs.lock().unwrap().push(message.to_string());
        }
        fn on_finding(&self, result: &ScanResult) {
            self.findings.lock().unwrap().push(result.target.clone());
        }
        fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
    }

    pub(crate) fn result(section: Option<Section>, target: &str, found: bool) -> ScanResult {
        ScanResult {
            vector: Arc::new(AttackVector::new("'")),
            section,
            target: target.to_string(),
            duration_ms: 12,
            request: RequestSnapshot {
                method: "GET".to_string(),
                url: format!("http://example.test/?{}", target.replace(' ', "=")),
                headers: vec![("user-agent".to_string(), "sondar-test".to_string())],
                content_length: 0,
                protocol: "HTTP/1.1".to_string(),
            },
            response: Some(ResponseSnapshot {
                status_code: 200,
                headers: vec![("content-type".to_string(), "text/html".to_string())],
                content_length: Some(42),
                protocol: "HTTP/1.1".to_string(),
            }),
            error: None,
            found,
            response_body_length: 42,
            saved_body_path: None,
        }
    }

    #[test]
    fn test_order_is_baseline_query_header_path() {
        let mut aggregator = ResultAggregator::new();
        aggregator.push(result(Some(Section::PathSegment), "urlsegment a", false));
        aggregator.push(result(Some(Section::Header), "header x", false));
        aggregator.push(result(Some(Section::Query), "urlquery q", false));
        aggregator.push(result(None, "BaseRequest", false));
        aggregator.push(result(Some(Section::Query), "urlquery q", true));

        let targets: Vec<String> = aggregator.into_results().into_iter().map(|r| r.target).collect();
        assert_eq!(
            targets,
            vec!["BaseRequest", "urlquery q", "urlquery q", "header x", "urlsegment a"]
        );
    }

    #[test]
    fn test_to_curl() {
        let r = result(Some(Section::Query), "urlquery q", true);
        assert_eq!(
            r.to_curl(),
            "curl -X GET 'http://example.test/?urlquery=q' -H 'user-agent: sondar-test' --insecure"
        );
    }

    #[test]
    fn test_to_curl_keeps_path_segments() {
        let mut r = result(Some(Section::PathSegment), "urlsegment 42", true);
        r.request.url = "http://example.test/user/../../etc/passwd/edit".to_string();
        assert!(r
            .to_curl()
            .ends_with("'http://example.test/user/../../etc/passwd/edit' -H 'user-agent: sondar-test' --insecure --path-as-is"));
    }

    #[tokio::test]
    async fn test_run_writes_jsonl_and_announces_findings() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("results.jsonl");
        let sink = Arc::new(RecordingSink::default());
        let sink_ref: SinkRef = sink.clone();

        let (tx, rx) = mpsc::channel(8);
        tx.send(result(None, "BaseRequest", false)).await.unwrap();
        tx.send(result(Some(Section::Query), "urlquery q", true)).await.unwrap();
        tx.send(result(Some(Section::Query), "urlquery lang", false)).await.unwrap();
        drop(tx);

        let results = ResultAggregator::run(rx, Some(&log_path), sink_ref).await;
        assert_eq!(results.len(), 3);
        assert_eq!(*sink.findings.lock().unwrap(), vec!["urlquery q".to_string()]);

        let lines: Vec<String> = std::fs::read_to_string(&log_path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines.len(), 3);
        let parsed: ScanResult = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(parsed.target, "urlquery q");
        assert!(parsed.found);
    }

    #[tokio::test]
    async fn test_run_keeps_results_when_log_cannot_open() {
        let sink = Arc::new(RecordingSink::default());
        let sink_ref: SinkRef = sink.clone();
        let (tx, rx) = mpsc::channel(2);
        tx.send(result(None, "BaseRequest", false)).await.unwrap();
        drop(tx);

        let bad = Path::new("/nonexistent-dir/results.jsonl");
        let results = ResultAggregator::run(rx, Some(bad), sink_ref).await;
        assert_eq!(results.len(), 1);
        assert_eq!(sink.logs.lock().unwrap().len(), 1);
    }
}
