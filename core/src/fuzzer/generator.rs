use std::borrow::Cow;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::encoding::Encoding;
use super::spec::FuzzingSpec;
use crate::error::Result;

/// Returned by a sink after each payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Receives generated payloads, one call per iteration.
pub trait PayloadSink {
    fn accept(&mut self, payload: &[u8]) -> Flow;
}

impl<F> PayloadSink for F
where
    F: FnMut(&[u8]) -> Flow,
{
    fn accept(&mut self, payload: &[u8]) -> Flow {
        self(payload)
    }
}

/// Runs the generator and returns how many payloads reached the sink.
///
/// Output is fully determined by `spec` (seed included) and `encodings`.
/// An empty `encodings` slice means identity only.
pub fn generate<S>(spec: &FuzzingSpec, encodings: &[Encoding], sink: &mut S) -> Result<u64>
where
    S: PayloadSink + ?Sized,
{
    spec.validate()?;

    let encodings: &[Encoding] = if encodings.is_empty() {
        &[Encoding::Identity]
    } else {
        encodings
    };
    let keys = spec.class_keys();
    let grammar: Vec<char> = spec.build_logic.chars().collect();
    let segments = grammar.len().max(1);

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let mut delivered = 0;

    for _ in 0..spec.iterations {
        let mut payload = Vec::new();
        for y in 0..segments {
            let key = if grammar.is_empty() {
                keys[rng.random_range(0..keys.len())]
            } else {
                grammar[y % grammar.len()]
            };

            // Unknown keys are literal text.
            let text: Cow<'_, str> = match spec.class(key) {
                Some(candidates) => Cow::Borrowed(candidates[rng.random_range(0..candidates.len())].as_str()),
                None => Cow::Owned(key.to_string()),
            };

            let encoding = encodings[rng.random_range(0..encodings.len())];
            payload.extend_from_slice(&encoding.encode(&text));
        }

        delivered += 1;
        if sink.accept(&payload) == Flow::Stop {
            debug!("Sink stopped generation after {} payload(s)", delivered);
            break;
        }
    }

    Ok(delivered)
}

/// Collects every payload of a run.
pub fn collect(spec: &FuzzingSpec, encodings: &[Encoding]) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    generate(spec, encodings, &mut |payload: &[u8]| {
        out.push(payload.to_vec());
        Flow::Continue
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;

    fn spec(json: &str) -> FuzzingSpec {
        FuzzingSpec::from_json(json).unwrap()
    }

    #[test]
    fn test_single_class_grammar() {
        let s = spec(r#"{"Vectors": {"a": ["FOO"]}, "Iterations": 3, "BuildLogic": "a", "Seed": 42}"#);
        let out = collect(&s, &[Encoding::Identity]).unwrap();
        assert_eq!(out, vec![b"FOO".to_vec(), b"FOO".to_vec(), b"FOO".to_vec()]);
    }

    #[test]
    fn test_same_seed_same_output() {
        let s = spec(
            r#"{"Vectors": {"a": ["1", "2", "3", "4"], "b": ["<", ">", "\""]}, "Iterations": 50, "BuildLogic": "abxab", "Seed": 7}"#,
        );
        let encodings = [Encoding::Identity, Encoding::Url, Encoding::Html];
        assert_eq!(collect(&s, &encodings).unwrap(), collect(&s, &encodings).unwrap());
    }

    #[test]
    fn test_different_seed_differs() {
        let mut s = spec(r#"{"Vectors": {"a": ["1", "2", "3", "4", "5", "6", "7", "8"]}, "Iterations": 20, "BuildLogic": "aaaa", "Seed": 1}"#);
        let first = collect(&s, &[]).unwrap();
        s.seed = 2;
        assert_ne!(first, collect(&s, &[]).unwrap());
    }

    #[test]
    fn test_grammar_shapes_segments() {
        let s = spec(r#"{"Vectors": {"a": ["A"], "b": ["B"]}, "Iterations": 2, "BuildLogic": "ab-ba", "Seed": 3}"#);
        let out = collect(&s, &[]).unwrap();
        assert_eq!(out, vec![b"AB-BA".to_vec(), b"AB-BA".to_vec()]);
    }

    #[test]
    fn test_no_grammar_draws_one_segment_from_classes() {
        let s = spec(r#"{"Vectors": {"a": ["A"], "b": ["B"]}, "Iterations": 40, "Seed": 9}"#);
        let out = collect(&s, &[]).unwrap();
        assert_eq!(out.len(), 40);
        assert!(out.iter().all(|p| p == b"A" || p == b"B"));
        assert!(out.iter().any(|p| p == b"A"));
        assert!(out.iter().any(|p| p == b"B"));
    }

    #[test]
    fn test_zero_iterations_never_calls_sink() {
        let s = spec(r#"{"Vectors": {"a": ["FOO"]}, "Iterations": 0, "BuildLogic": "a"}"#);
        let mut calls = 0;
        let delivered = generate(&s, &[], &mut |_: &[u8]| {
            calls += 1;
            Flow::Continue
        })
        .unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_stop_halts_immediately() {
        let s = spec(r#"{"Vectors": {"a": ["FOO"]}, "Iterations": 100, "BuildLogic": "a"}"#);
        let mut calls = 0;
        let delivered = generate(&s, &[], &mut |_: &[u8]| {
            calls += 1;
            if calls == 2 { Flow::Stop } else { Flow::Continue }
        })
        .unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_encoding_applied_per_segment() {
        let s = spec(r#"{"Vectors": {"a": ["<x y>"]}, "Iterations": 1, "BuildLogic": "a", "Seed": 5}"#);
        assert_eq!(collect(&s, &[Encoding::Html]).unwrap(), vec![b"&lt;x y&gt;".to_vec()]);
        assert_eq!(collect(&s, &[Encoding::Url]).unwrap(), vec![b"%3Cx+y%3E".to_vec()]);
    }

    #[test]
    fn test_invalid_spec_fails_before_sink() {
        let s = FuzzingSpec { iterations: 3, ..FuzzingSpec::default() };
        let mut called = false;
        let err = generate(&s, &[], &mut |_: &[u8]| {
            called = true;
            Flow::Continue
        })
        .unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
        assert!(!called);
    }
}
