use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::core::mutator::{
    AllowAll, CaseFilter, CaseOutcome, Decision, HeaderMutator, MutationFailure, MutationStrategy,
    PathSegmentMutator, QueryMutator, TestCase, TestCases,
};
use crate::core::result_aggregator::{RequestSnapshot, ResponseSnapshot, ResultAggregator, ScanResult};
use crate::core::vectors::{AttackVector, Section, VectorCatalog};
use crate::error::{Result, ScanError};
use crate::http::client::version_label;
use crate::http::{headers_to_vec, HttpClient, HttpRequest};
use crate::utils::detector::ReflectionDetector;
use crate::SinkRef;

/// Target descriptor of the unmutated baseline result.
pub const BASELINE_TARGET: &str = "BaseRequest";

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Also inject into request headers.
    pub scan_headers: bool,
    /// Where raw response bodies are saved, one file per call.
    pub output_dir: Option<PathBuf>,
    /// Upper bound on executed test cases; the baseline is not counted.
    pub max_test_cases: Option<usize>,
}

/// Mutation-based injection scanner.
///
/// The engine:
/// 1. Sends the unmutated baseline
/// 2. Enumerates test cases from the query, header and path strategies, in that order
/// 3. Passes each case through the case filter
/// 4. Sends the surviving cases one at a time with wall-clock timing
/// 5. Checks each response body for the vector's marker
pub struct ScanEngine {
    client: Arc<HttpClient>,
    detector: ReflectionDetector,
    filter: Box<dyn CaseFilter>,
    options: ScanOptions,
    sink: SinkRef,
}

impl ScanEngine {
    pub fn new(client: Arc<HttpClient>, options: ScanOptions, sink: SinkRef) -> Self {
        Self {
            client,
            detector: ReflectionDetector::new(),
            filter: Box::new(AllowAll),
            options,
            sink,
        }
    }

    pub fn with_filter(mut self, filter: impl CaseFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    /// Strategies in execution order.
    pub fn strategies(&self) -> Vec<Box<dyn MutationStrategy>> {
        let mut strategies: Vec<Box<dyn MutationStrategy>> = vec![Box::new(QueryMutator)];
        if self.options.scan_headers {
            strategies.push(Box::new(HeaderMutator));
        }
        strategies.push(Box::new(PathSegmentMutator));
        strategies
    }

    /// Every test case the scan would execute, filtered and capped.
    pub fn plan<'a>(
        &'a self,
        strategies: &'a [Box<dyn MutationStrategy>],
        base: &'a HttpRequest,
        catalog: &VectorCatalog,
    ) -> Plan<'a> {
        let sources = strategies
            .iter()
            .map(|s| TestCases::new(s.as_ref(), base, catalog))
            .collect();
        Plan {
            sources,
            filter: self.filter.as_ref(),
            limit: self.options.max_test_cases,
            emitted: 0,
            capped: false,
        }
    }

    /// Runs the whole scan, sending results in order to `result_tx`.
    pub async fn run(&self, base: &HttpRequest, catalog: &VectorCatalog, result_tx: mpsc::Sender<ScanResult>) {
        let strategies = self.strategies();
        let total: usize = strategies
            .iter()
            .map(|s| TestCases::new(s.as_ref(), base, catalog).total())
            .sum();
        let total = self.options.max_test_cases.map_or(total, |max| total.min(max));

        self.sink.on_progress("Baseline request", 0, 0);
        let baseline = self.baseline(base).await;
        if result_tx.send(baseline).await.is_err() {
            warn!("Result receiver closed before the baseline was delivered");
            return;
        }

        let mut current: Option<Section> = None;
        for (done, outcome) in self.plan(&strategies, base, catalog).enumerate() {
            let section = match &outcome {
                Ok(case) => case.point.section(),
                Err(failure) => failure.point.section(),
            };
            if current != Some(section) {
                current = Some(section);
                self.sink.on_progress(&format!("Injecting into {}", section), done, total);
            }

            let result = match outcome {
                Ok(case) => self.execute(case).await,
                Err(failure) => failure_result(base, failure),
            };

            if result_tx.send(result).await.is_err() {
                warn!("Result receiver closed; stopping scan");
                return;
            }
        }
    }

    /// Runs the scan and returns the ordered results.
    pub async fn scan(&self, base: &HttpRequest, catalog: &VectorCatalog) -> Vec<ScanResult> {
        let (tx, rx) = mpsc::channel::<ScanResult>(100);
        let (_, results) = tokio::join!(
            self.run(base, catalog, tx),
            ResultAggregator::run(rx, None, Arc::clone(&self.sink))
        );
        results
    }

    /// Sends the unmutated baseline under the sentinel vector.
    pub async fn baseline(&self, base: &HttpRequest) -> ScanResult {
        self.send(base, Arc::new(AttackVector::sentinel()), None, BASELINE_TARGET.to_string())
            .await
    }

    /// Executes one test case. Never fails: transport errors land on the result.
    pub async fn execute(&self, case: TestCase) -> ScanResult {
        let target = case.target();
        let section = case.point.section();
        self.send(&case.request, case.vector, Some(section), target).await
    }

    async fn send(
        &self,
        request: &HttpRequest,
        vector: Arc<AttackVector>,
        section: Option<Section>,
        target: String,
    ) -> ScanResult {
        let snapshot = request_snapshot(request);
        let captured_at = SystemTime::now();

        let start = Instant::now();
        let outcome = self.client.execute(request).await;
        let duration_ms = start.elapsed().as_millis();

        match outcome {
            Ok(response) => {
                let found = self.detector.detect(&response.body, &vector);
                debug!(
                    "{} {} -> {} ({} bytes, {}ms, found={})",
                    target,
                    snapshot.url,
                    response.status,
                    response.body.len(),
                    duration_ms,
                    found
                );

                let saved_body_path = self.options.output_dir.as_deref().and_then(|dir| {
                    match save_body(dir, captured_at, &response.body) {
                        Ok(path) => Some(path),
                        Err(e) => {
                            self.sink.on_log("error", &format!("[!] {}", e));
                            None
                        }
                    }
                });

                ScanResult {
                    vector,
                    section,
                    target,
                    duration_ms,
                    request: snapshot,
                    response: Some(ResponseSnapshot {
                        status_code: response.status.as_u16(),
                        headers: headers_to_vec(&response.headers),
                        content_length: response.content_length,
                        protocol: version_label(response.version).to_string(),
                    }),
                    error: None,
                    found,
                    response_body_length: response.body.len(),
                    saved_body_path,
                }
            }
            Err(e) => {
                let error = error_chain(e.as_ref());
                warn!("{} {} failed: {}", target, snapshot.url, error);
                ScanResult {
                    vector,
                    section,
                    target,
                    duration_ms,
                    request: snapshot,
                    response: None,
                    error: Some(error),
                    found: false,
                    response_body_length: 0,
                    saved_body_path: None,
                }
            }
        }
    }
}

/// Lazy, filtered, capped concatenation of every strategy's test cases.
pub struct Plan<'a> {
    sources: VecDeque<TestCases<'a>>,
    filter: &'a dyn CaseFilter,
    limit: Option<usize>,
    emitted: usize,
    capped: bool,
}

impl<'a> Plan<'a> {
    fn at_limit(&mut self) -> bool {
        match self.limit {
            Some(max) if self.emitted >= max => {
                if !self.capped {
                    self.capped = true;
                    info!("Test case limit of {} reached; remaining cases skipped", max);
                }
                true
            }
            _ => false,
        }
    }
}

impl<'a> Iterator for Plan<'a> {
    type Item = CaseOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.at_limit() {
                return None;
            }

            let source = self.sources.front_mut()?;
            let outcome = match source.next() {
                Some(outcome) => outcome,
                None => {
                    self.sources.pop_front();
                    continue;
                }
            };

            let outcome = match outcome {
                Ok(case) => match self.filter.decide(&case) {
                    Decision::Keep => Ok(case),
                    Decision::Rewrite(rewritten) => Ok(rewritten),
                    Decision::Drop => {
                        debug!("Filter dropped {}", case.target());
                        continue;
                    }
                },
                Err(failure) => Err(failure),
            };

            self.emitted += 1;
            return Some(outcome);
        }
    }
}

fn request_snapshot(request: &HttpRequest) -> RequestSnapshot {
    RequestSnapshot {
        method: request.method.to_string(),
        url: request.display_url(),
        headers: request.header_pairs(),
        content_length: request.body.len(),
        protocol: "HTTP/1.1".to_string(),
    }
}

/// Result for a case whose request could not be built.
fn failure_result(base: &HttpRequest, failure: MutationFailure) -> ScanResult {
    warn!("{}: {}", failure.point, failure.error);
    let mut request = request_snapshot(base);
    request.headers.clear();
    ScanResult {
        vector: failure.vector,
        section: Some(failure.point.section()),
        target: failure.point.to_string(),
        duration_ms: 0,
        request,
        response: None,
        error: Some(failure.error.to_string()),
        found: false,
        response_body_length: 0,
        saved_body_path: None,
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Writes `body` to `dir/<unix-nanos>`, bumping the stamp on collision.
fn save_body(dir: &Path, captured_at: SystemTime, body: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| ScanError::io(dir, e))?;
    let mut stamp = captured_at.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    loop {
        let path = dir.join(stamp.to_string());
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(body).map_err(|e| ScanError::io(&path, e))?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp += 1,
            Err(e) => return Err(ScanError::io(&path, e)),
        }
    }
}
