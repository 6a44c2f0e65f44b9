//! Attack vector catalog.
//!
//! Vectors are read from a JSON array of `{Vector, Test, SqlInjection, Section}`
//! objects, or from a plain wordlist with one payload per line.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, ScanError};

/// Request section a vector may be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    #[serde(rename = "urlquery")]
    Query,
    #[serde(rename = "header")]
    Header,
    #[serde(rename = "urlsegment")]
    PathSegment,
}

impl Section {
    pub fn label(&self) -> &'static str {
        match self {
            Section::Query => "urlquery",
            Section::Header => "header",
            Section::PathSegment => "urlsegment",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Section {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urlquery" | "query" => Ok(Section::Query),
            "header" | "headers" => Ok(Section::Header),
            "urlsegment" | "segment" | "path" | "path-segment" => Ok(Section::PathSegment),
            other => Err(ScanError::Config(format!("unknown vector section '{}'", other))),
        }
    }
}

/// One payload together with the marker that proves it was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackVector {
    #[serde(rename = "Vector")]
    pub payload: String,
    /// Detection marker; empty means "look for the payload itself".
    #[serde(rename = "Test", default)]
    pub detection_text: String,
    #[serde(rename = "SqlInjection", default)]
    pub sql_injection: bool,
    /// Sections this vector applies to; empty means all of them.
    #[serde(rename = "Section", default, deserialize_with = "deserialize_sections")]
    pub sections: BTreeSet<Section>,
}

impl AttackVector {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            detection_text: String::new(),
            sql_injection: false,
            sections: BTreeSet::new(),
        }
    }

    /// Payload-less vector attached to the unmutated baseline result.
    pub fn sentinel() -> Self {
        Self::new("")
    }

    pub fn with_detection(mut self, text: impl Into<String>) -> Self {
        self.detection_text = text.into();
        self
    }

    pub fn with_sections(mut self, sections: impl IntoIterator<Item = Section>) -> Self {
        self.sections = sections.into_iter().collect();
        self
    }

    pub fn is_sentinel(&self) -> bool {
        self.payload.is_empty() && self.detection_text.is_empty()
    }

    /// The marker searched for in responses.
    pub fn marker(&self) -> &str {
        if self.detection_text.is_empty() {
            &self.payload
        } else {
            &self.detection_text
        }
    }

    pub fn applies_to(&self, section: Section) -> bool {
        self.sections.is_empty() || self.sections.contains(&section)
    }
}

/// `Section` may be a single string ("urlsegment", "urlquery,header") or a list.
fn deserialize_sections<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<Section>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    let names: Vec<String> = match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::One(s)) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Raw::Many(list)) => list,
    };

    names
        .iter()
        .map(|n| n.parse::<Section>().map_err(serde::de::Error::custom))
        .collect()
}

/// Ordered, read-only set of attack vectors shared by every test case.
#[derive(Debug, Clone, Default)]
pub struct VectorCatalog {
    vectors: Vec<Arc<AttackVector>>,
}

impl VectorCatalog {
    pub fn new(vectors: Vec<AttackVector>) -> Self {
        Self {
            vectors: vectors.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let vectors: Vec<AttackVector> = serde_json::from_str(json).map_err(|e| ScanError::json("vector file", e))?;
        Ok(Self::new(vectors))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
        Self::from_json(&data)
    }

    /// One vector per non-empty, non-comment line; each applies everywhere.
    pub fn load_wordlist(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payloads = load_list_from_file(path)?;
        if payloads.is_empty() {
            warn!("No payloads loaded from {}", path.display());
        }
        Ok(Self::new(payloads.into_iter().map(AttackVector::new).collect()))
    }

    pub fn extend(&mut self, other: VectorCatalog) {
        self.vectors.extend(other.vectors);
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AttackVector>> {
        self.vectors.iter()
    }

    /// Vectors usable in `section`, in catalog order.
    pub fn applicable(&self, section: Section) -> Vec<Arc<AttackVector>> {
        self.vectors
            .iter()
            .filter(|v| v.applies_to(section))
            .cloned()
            .collect()
    }
}

/// Loads lines from a file, skipping empty lines and comments.
pub fn load_list_from_file(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path).map_err(|e| ScanError::io(path, e))?;
    let reader = std::io::BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| ScanError::io(path, e))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}
