use std::fmt;
use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use url::Url;

use crate::core::vectors::{AttackVector, Section, VectorCatalog};
use crate::error::{Result, ScanError};
use crate::http::HttpRequest;

/// Headers never offered as injection points: they frame the message
/// rather than carry application data.
const FRAMING_HEADERS: [HeaderName; 3] = [HOST, CONTENT_LENGTH, TRANSFER_ENCODING];

/// A location in a request where payloads can be injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionPoint {
    /// Query parameter, by key.
    UrlQuery(String),
    /// Header, by name.
    Header(String),
    /// Path segment, by index into the `/`-split escaped path.
    UrlSegment { index: usize, original: String },
}

impl InjectionPoint {
    pub fn section(&self) -> Section {
        match self {
            InjectionPoint::UrlQuery(_) => Section::Query,
            InjectionPoint::Header(_) => Section::Header,
            InjectionPoint::UrlSegment { .. } => Section::PathSegment,
        }
    }
}

/// Renders the target descriptor used in results ("urlquery id", "header X-Foo", "urlsegment 42").
impl fmt::Display for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectionPoint::UrlQuery(key) => write!(f, "urlquery {}", key),
            InjectionPoint::Header(name) => write!(f, "header {}", name),
            InjectionPoint::UrlSegment { original, .. } => write!(f, "urlsegment {}", original),
        }
    }
}

/// One isolated request variant, consumed exactly once by the engine.
#[derive(Debug)]
pub struct TestCase {
    pub request: HttpRequest,
    pub vector: Arc<AttackVector>,
    pub point: InjectionPoint,
}

impl TestCase {
    pub fn target(&self) -> String {
        self.point.to_string()
    }
}

/// A test case whose request could not be built. The engine still turns it
/// into a result so the result count stays one per enumerated case.
#[derive(Debug)]
pub struct MutationFailure {
    pub vector: Arc<AttackVector>,
    pub point: InjectionPoint,
    pub error: ScanError,
}

pub type CaseOutcome = std::result::Result<TestCase, MutationFailure>;

/// Verdict of a [`CaseFilter`] on one enumerated test case.
#[derive(Debug)]
pub enum Decision {
    Keep,
    Drop,
    Rewrite(TestCase),
}

/// Hook applied to every test case between enumeration and execution.
pub trait CaseFilter: Send + Sync {
    fn decide(&self, candidate: &TestCase) -> Decision;
}

/// Keeps everything.
pub struct AllowAll;

impl CaseFilter for AllowAll {
    fn decide(&self, _candidate: &TestCase) -> Decision {
        Decision::Keep
    }
}

/// Drops test cases whose target descriptor is listed, e.g. "urlquery csrf_token".
pub struct SkipTargets {
    targets: Vec<String>,
}

impl SkipTargets {
    pub fn new(targets: Vec<String>) -> Self {
        Self { targets }
    }
}

impl CaseFilter for SkipTargets {
    fn decide(&self, candidate: &TestCase) -> Decision {
        let target = candidate.target();
        if self.targets.iter().any(|t| t.eq_ignore_ascii_case(&target)) {
            Decision::Drop
        } else {
            Decision::Keep
        }
    }
}

/// Enumerates injection points of one kind and applies payloads to them.
pub trait MutationStrategy: Send + Sync {
    fn section(&self) -> Section;

    /// Injection points of `base`, in enumeration order.
    fn injection_points(&self, base: &HttpRequest) -> Vec<InjectionPoint>;

    /// Writes `payload` into `request` at `point`.
    fn apply(&self, request: &mut HttpRequest, point: &InjectionPoint, payload: &str) -> Result<()>;

    /// Lazy sequence of test cases: points outer, applicable vectors inner.
    /// Each call starts a fresh enumeration.
    fn test_cases<'a>(&'a self, base: &'a HttpRequest, catalog: &VectorCatalog) -> TestCases<'a>
    where
        Self: Sized,
    {
        TestCases::new(self, base, catalog)
    }
}

/// Iterator behind [`MutationStrategy::test_cases`]. Requests are cloned
/// only when a case is pulled.
pub struct TestCases<'a> {
    strategy: &'a dyn MutationStrategy,
    base: &'a HttpRequest,
    points: Vec<InjectionPoint>,
    vectors: Vec<Arc<AttackVector>>,
    point_idx: usize,
    vector_idx: usize,
}

impl<'a> TestCases<'a> {
    pub fn new(strategy: &'a dyn MutationStrategy, base: &'a HttpRequest, catalog: &VectorCatalog) -> Self {
        Self {
            strategy,
            base,
            points: strategy.injection_points(base),
            vectors: catalog.applicable(strategy.section()),
            point_idx: 0,
            vector_idx: 0,
        }
    }

    /// Number of cases this enumeration yields in total.
    pub fn total(&self) -> usize {
        self.points.len() * self.vectors.len()
    }
}

impl<'a> Iterator for TestCases<'a> {
    type Item = CaseOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        if self.vectors.is_empty() || self.point_idx >= self.points.len() {
            return None;
        }

        let point = self.points[self.point_idx].clone();
        let vector = Arc::clone(&self.vectors[self.vector_idx]);

        self.vector_idx += 1;
        if self.vector_idx >= self.vectors.len() {
            self.vector_idx = 0;
            self.point_idx += 1;
        }

        let built = self.base.deep_clone().and_then(|mut request| {
            self.strategy.apply(&mut request, &point, &vector.payload)?;
            Ok(request)
        });

        Some(match built {
            Ok(request) => Ok(TestCase { request, vector, point }),
            Err(error) => Err(MutationFailure { vector, point, error }),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.vectors.is_empty() || self.point_idx >= self.points.len() {
            0
        } else {
            (self.points.len() - self.point_idx) * self.vectors.len() - self.vector_idx
        };
        (remaining, Some(remaining))
    }
}

/// Replaces the value of one query key with the payload.
pub struct QueryMutator;

impl MutationStrategy for QueryMutator {
    fn section(&self) -> Section {
        Section::Query
    }

    /// Distinct keys, sorted lexically.
    fn injection_points(&self, base: &HttpRequest) -> Vec<InjectionPoint> {
        let mut keys: Vec<String> = base.url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        keys.sort();
        keys.dedup();
        keys.into_iter().map(InjectionPoint::UrlQuery).collect()
    }

    fn apply(&self, request: &mut HttpRequest, point: &InjectionPoint, payload: &str) -> Result<()> {
        let InjectionPoint::UrlQuery(param_name) = point else {
            return Err(ScanError::Mutation(format!("query mutator cannot target '{}'", point)));
        };
        mutate_url_param(&mut request.url, param_name, payload);
        Ok(())
    }
}

/// Sets the first occurrence of `param_name` to `payload` and drops repeats
/// of that key; other pairs keep their order and values.
fn mutate_url_param(url: &mut Url, param_name: &str, payload: &str) {
    let mut replaced = false;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(k, v)| {
            if k == param_name {
                if replaced {
                    return None;
                }
                replaced = true;
                Some((k.into_owned(), payload.to_string()))
            } else {
                Some((k.into_owned(), v.into_owned()))
            }
        })
        .collect();

    let mut query = url.query_pairs_mut();
    query.clear();
    for (k, v) in pairs {
        query.append_pair(&k, &v);
    }
}

/// Appends the payload to the current value of one header.
pub struct HeaderMutator;

impl MutationStrategy for HeaderMutator {
    fn section(&self) -> Section {
        Section::Header
    }

    /// Distinct header names, sorted lexically, minus framing headers.
    fn injection_points(&self, base: &HttpRequest) -> Vec<InjectionPoint> {
        let mut names: Vec<String> = base
            .headers
            .keys()
            .filter(|name| !FRAMING_HEADERS.contains(name))
            .map(|name| name.as_str().to_string())
            .collect();
        names.sort();
        names.dedup();
        names.into_iter().map(InjectionPoint::Header).collect()
    }

    fn apply(&self, request: &mut HttpRequest, point: &InjectionPoint, payload: &str) -> Result<()> {
        let InjectionPoint::Header(header_name) = point else {
            return Err(ScanError::Mutation(format!("header mutator cannot target '{}'", point)));
        };
        let name = HeaderName::try_from(header_name.as_str())
            .map_err(|e| ScanError::Mutation(format!("invalid header name '{}': {}", header_name, e)))?;

        let mut value = request
            .headers
            .get(&name)
            .map(|v| v.as_bytes().to_vec())
            .unwrap_or_default();
        value.extend_from_slice(payload.as_bytes());

        let value = HeaderValue::from_bytes(&value)
            .map_err(|_| ScanError::Mutation(format!("payload is not a legal value for header '{}'", header_name)))?;
        request.headers.insert(name, value);
        Ok(())
    }
}

/// Replaces one path segment with the raw, unescaped payload.
pub struct PathSegmentMutator;

impl MutationStrategy for PathSegmentMutator {
    fn section(&self) -> Section {
        Section::PathSegment
    }

    fn injection_points(&self, base: &HttpRequest) -> Vec<InjectionPoint> {
        base.path()
            .split('/')
            .enumerate()
            .filter(|(_, segment)| !segment.is_empty())
            .map(|(index, segment)| InjectionPoint::UrlSegment {
                index,
                original: segment.to_string(),
            })
            .collect()
    }

    fn apply(&self, request: &mut HttpRequest, point: &InjectionPoint, payload: &str) -> Result<()> {
        let InjectionPoint::UrlSegment { index, .. } = point else {
            return Err(ScanError::Mutation(format!("path mutator cannot target '{}'", point)));
        };
        let path = replace_segment(request.path(), *index, payload)
            .ok_or_else(|| ScanError::Mutation(format!("path has no segment {}", index)))?;
        request.set_path(&path);
        Ok(())
    }
}

/// Swaps segment `index` of the `/`-split `path` for `payload`, verbatim.
pub fn replace_segment(path: &str, index: usize, payload: &str) -> Option<String> {
    let mut segments: Vec<&str> = path.split('/').collect();
    let slot = segments.get_mut(index)?;
    *slot = payload;
    Some(segments.join("/"))
}
