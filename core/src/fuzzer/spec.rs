use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, ScanError};

/// Payload classes, iteration count, grammar and seed for one generator run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuzzingSpec {
    /// Single-character class key to its ordered candidates.
    #[serde(rename = "Vectors", default)]
    pub vectors: BTreeMap<String, Vec<String>>,
    #[serde(rename = "Iterations", default)]
    pub iterations: u64,
    /// Each character selects the class of one segment. Empty means one
    /// segment per iteration from a random class.
    #[serde(rename = "BuildLogic", default)]
    pub build_logic: String,
    #[serde(rename = "Seed", default, deserialize_with = "deserialize_seed")]
    pub seed: u64,
}

/// Negative seeds are accepted and reinterpreted bit for bit.
fn deserialize_seed<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Unsigned(v) => v,
        Raw::Signed(v) => v as u64,
    })
}

impl FuzzingSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json).map_err(|e| ScanError::json("fuzzing spec", e))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
        Self::from_json(&data)
    }

    pub fn validate(&self) -> Result<()> {
        for (key, candidates) in &self.vectors {
            if key.chars().count() != 1 {
                return Err(ScanError::Config(format!(
                    "class key '{}' must be exactly one character",
                    key
                )));
            }
            if candidates.is_empty() {
                return Err(ScanError::Config(format!("class '{}' has no candidates", key)));
            }
        }
        if self.build_logic.is_empty() && self.vectors.is_empty() {
            return Err(ScanError::Config(
                "no payload classes declared and no build logic given".to_string(),
            ));
        }
        Ok(())
    }

    /// Declared class keys in sorted order.
    pub fn class_keys(&self) -> Vec<char> {
        self.vectors.keys().filter_map(|k| k.chars().next()).collect()
    }

    pub fn class(&self, key: char) -> Option<&[String]> {
        self.vectors.get(&key.to_string()).map(Vec::as_slice)
    }
}
