use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use which::which;

use super::encoding::Encoding;
use super::generator::{Flow, PayloadSink};
use crate::error::{Result, ScanError};

/// Settings of the `fuzz` subcommand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FuzzConfig {
    /// Fuzzing spec JSON.
    pub input: String,
    /// File overwritten with each payload before the command runs.
    pub output: String,
    /// Text replaced by the payload in the program name and every argument.
    pub placeholder: String,
    /// Comma-separated encoding names; empty means identity.
    pub encodings: String,
    /// Program and arguments run once per payload.
    pub command: Vec<String>,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            input: "./config/fuzzinginput.json".to_string(),
            output: String::new(),
            placeholder: String::new(),
            encodings: String::new(),
            command: Vec::new(),
        }
    }
}

impl FuzzConfig {
    pub fn encoding_list(&self) -> Result<Vec<Encoding>> {
        Encoding::parse_list(&self.encodings)
    }

    pub fn runs_command(&self) -> bool {
        !self.command.is_empty()
    }
}

/// Sink that writes each payload to the output file and runs the command.
///
/// Any failed write, spawn or non-zero exit stops generation.
pub struct CommandRunner {
    output: Option<PathBuf>,
    placeholder: String,
    command: Vec<String>,
    runs: usize,
}

impl CommandRunner {
    /// Checks the program up front so a missing tool fails before the first
    /// payload. A program name built from the payload is only found at run time.
    pub fn new(config: &FuzzConfig) -> Result<Self> {
        if let Some(name) = config.command.first() {
            let templated = !config.placeholder.is_empty() && name.contains(&config.placeholder);
            if !templated {
                which(name).map_err(|e| ScanError::Config(format!("command '{}' not found: {}", name, e)))?;
            }
        }

        Ok(Self {
            output: (!config.output.is_empty()).then(|| PathBuf::from(&config.output)),
            placeholder: config.placeholder.clone(),
            command: config.command.clone(),
            runs: 0,
        })
    }

    /// Number of command executions so far.
    pub fn runs(&self) -> usize {
        self.runs
    }

    fn substituted_command(&self, payload: &str) -> Vec<String> {
        if self.placeholder.is_empty() {
            return self.command.clone();
        }
        self.command
            .iter()
            .map(|arg| arg.replace(&self.placeholder, payload))
            .collect()
    }
}

impl PayloadSink for CommandRunner {
    fn accept(&mut self, payload: &[u8]) -> Flow {
        if let Some(path) = &self.output {
            if let Err(e) = fs::write(path, payload) {
                warn!("{}", ScanError::io(path, e));
                return Flow::Stop;
            }
        }

        let argv = self.substituted_command(&String::from_utf8_lossy(payload));
        let Some((program, args)) = argv.split_first() else {
            return Flow::Continue;
        };
        debug!("{:?} {:?}", program, args);

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .status();
        self.runs += 1;

        match status {
            Ok(status) if status.success() => Flow::Continue,
            Ok(status) => {
                warn!("{} exited with {}", program, status);
                Flow::Stop
            }
            Err(e) => {
                warn!("Failed to run {}: {}", program, e);
                Flow::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzer::{generate, FuzzingSpec};
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults() {
        let config: FuzzConfig = serde_json::from_str(r#"{"placeholder": "FUZZ"}"#).unwrap();
        assert_eq!(config.input, "./config/fuzzinginput.json");
        assert_eq!(config.placeholder, "FUZZ");
        assert!(!config.runs_command());
        assert!(config.encoding_list().unwrap().is_empty());
    }

    #[test]
    fn test_writes_each_payload_to_output() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("payload.txt");
        let config = FuzzConfig {
            output: out.to_string_lossy().into_owned(),
            ..FuzzConfig::default()
        };
        let mut runner = CommandRunner::new(&config).unwrap();
        assert_eq!(runner.accept(b"first"), Flow::Continue);
        assert_eq!(runner.accept(b"second"), Flow::Continue);
        assert_eq!(fs::read(&out).unwrap(), b"second");
        assert_eq!(runner.runs(), 0);
    }

    #[test]
    fn test_unwritable_output_stops() {
        let config = FuzzConfig {
            output: "/nonexistent-dir/payload.txt".to_string(),
            ..FuzzConfig::default()
        };
        let mut runner = CommandRunner::new(&config).unwrap();
        assert_eq!(runner.accept(b"x"), Flow::Stop);
    }

    #[test]
    fn test_missing_program_is_config_error() {
        let config = FuzzConfig {
            command: vec!["definitely-not-a-real-tool-7f3a".to_string()],
            ..FuzzConfig::default()
        };
        assert!(matches!(CommandRunner::new(&config), Err(ScanError::Config(_))));
    }

    #[test]
    fn test_placeholder_substitution() {
        let runner = CommandRunner {
            output: None,
            placeholder: "FUZZ".to_string(),
            command: vec!["tool-FUZZ".to_string(), "-d".to_string(), "q=FUZZ&r=FUZZ".to_string()],
            runs: 0,
        };
        assert_eq!(runner.substituted_command("<x>"), vec!["tool-<x>", "-d", "q=<x>&r=<x>"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_placeholder_in_program_name() {
        let config = FuzzConfig {
            placeholder: "FUZZ".to_string(),
            command: vec!["FUZZ".to_string(), "-c".to_string(), "exit 0".to_string()],
            ..FuzzConfig::default()
        };
        let mut runner = CommandRunner::new(&config).unwrap();
        assert_eq!(runner.accept(b"sh"), Flow::Continue);
        assert_eq!(runner.accept(b"definitely-not-a-real-tool-7f3a"), Flow::Stop);
        assert_eq!(runner.runs(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_runs_per_payload() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("log.txt");
        let config = FuzzConfig {
            placeholder: "FUZZ".to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo FUZZ >> {}", log.display()),
            ],
            ..FuzzConfig::default()
        };
        let spec = FuzzingSpec::from_json(r#"{"Vectors": {"a": ["FOO"]}, "Iterations": 3, "BuildLogic": "a"}"#).unwrap();

        let mut runner = CommandRunner::new(&config).unwrap();
        assert_eq!(generate(&spec, &[], &mut runner).unwrap(), 3);
        assert_eq!(runner.runs(), 3);
        assert_eq!(fs::read_to_string(&log).unwrap(), "FOO\nFOO\nFOO\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_stops_generation() {
        let config = FuzzConfig {
            command: vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
            ..FuzzConfig::default()
        };
        let spec = FuzzingSpec::from_json(r#"{"Vectors": {"a": ["FOO"]}, "Iterations": 10, "BuildLogic": "a"}"#).unwrap();

        let mut runner = CommandRunner::new(&config).unwrap();
        assert_eq!(generate(&spec, &[], &mut runner).unwrap(), 1);
        assert_eq!(runner.runs(), 1);
    }
}
