use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn vector_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", json).unwrap();
    file
}

/// Dry run enumerates both query keys, sorted, without touching the network.
#[test]
fn test_scan_dry_run_lists_query_cases() {
    let vectors = vector_file(r#"[{"Vector": "'", "Test": "SQL syntax"}]"#);
    let path = vectors.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("sondar")
        .args(["scan", "http://example.test/search?q=1&lang=en", "--vectors", &path, "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] urlquery lang http://example.test/search?q=1&lang=%27"))
        .stdout(predicate::str::contains("[DRY RUN] urlquery q http://example.test/search?q=%27&lang=en"))
        .stdout(predicate::str::contains("[DRY RUN] urlsegment search"))
        .stdout(predicate::str::contains("[DRY RUN] 3 test case(s) would be sent"))
        .stdout(predicate::str::contains("header").not());
}

/// Path cases are listed with the traversal payload left in place.
#[test]
fn test_scan_dry_run_keeps_traversal_path() {
    let vectors = vector_file(r#"[{"Vector": "../../etc/passwd", "Section": "urlsegment"}]"#);
    let path = vectors.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("sondar")
        .args(["scan", "http://example.test/user/42/edit", "--vectors", &path, "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[DRY RUN] urlsegment 42 http://example.test/user/../../etc/passwd/edit",
        ))
        .stdout(predicate::str::contains("[DRY RUN] 3 test case(s) would be sent"));
}

/// Header injection points only appear with --scan-headers; --skip drops one.
#[test]
fn test_scan_dry_run_headers_and_skip() {
    let vectors = vector_file(r#"[{"Vector": "X", "Section": "header"}]"#);
    let path = vectors.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("sondar")
        .args([
            "scan",
            "http://example.test/",
            "--vectors",
            &path,
            "--scan-headers",
            "-H",
            "X-Api-Key: k",
            "--skip",
            "header user-agent",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] header x-api-key"))
        .stdout(predicate::str::contains("[DRY RUN] header user-agent").not())
        .stdout(predicate::str::contains("[DRY RUN] 1 test case(s) would be sent"));
}

/// A single-class grammar yields the same literal every time.
#[test]
fn test_fuzz_print_repeats_single_class() {
    let spec = vector_file(r#"{"Vectors": {"a": ["FOO"]}, "Iterations": 3, "BuildLogic": "a", "Seed": 42}"#);
    let path = spec.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("sondar")
        .args(["fuzz", "-i", &path, "--print"])
        .assert()
        .success()
        .stdout("FOO\nFOO\nFOO\n");
}

/// An empty class set without build logic is rejected before generating.
#[test]
fn test_fuzz_rejects_empty_spec() {
    let spec = vector_file(r#"{"Vectors": {}, "Iterations": 3}"#);
    let path = spec.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("sondar")
        .args(["fuzz", "-i", &path])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
}

/// Malformed vector JSON is fatal before any request.
#[test]
fn test_scan_malformed_vectors_fails() {
    let vectors = vector_file("[{\"Vector\": ");
    let path = vectors.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("sondar")
        .args(["scan", "http://example.test/?a=1", "--vectors", &path, "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid vector file"));
}

/// A scan needs a baseline.
#[test]
fn test_scan_without_target_fails() {
    let vectors = vector_file(r#"[{"Vector": "x"}]"#);
    let path = vectors.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("sondar")
        .args(["scan", "--vectors", &path])
        .assert()
        .failure()
        .stderr(predicate::str::contains("either a request file or a URL is required"));
}

/// Running with no arguments should fail (clap requires a subcommand).
#[test]
fn test_no_args_shows_error() {
    cargo_bin_cmd!("sondar")
        .assert()
        .failure();
}
