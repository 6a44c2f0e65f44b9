//! Payload encodings applied per generated segment.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{Result, ScanError};

/// Query-string escaping: everything but unreserved characters.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Payload encoding types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// No encoding - raw payload
    #[default]
    Identity,
    /// Query escaping, spaces become `+`
    Url,
    /// Every non-alphanumeric byte percent-encoded
    Percent,
    /// HTML special characters as entities
    Html,
}

impl Encoding {
    pub fn all() -> &'static [Encoding] {
        &[Encoding::Identity, Encoding::Url, Encoding::Percent, Encoding::Html]
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Encoding::Identity => "none",
            Encoding::Url => "url",
            Encoding::Percent => "percent",
            Encoding::Html => "html",
        }
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Identity => text.as_bytes().to_vec(),
            Encoding::Url => utf8_percent_encode(text, QUERY_ESCAPE)
                .to_string()
                .replace("%20", "+")
                .into_bytes(),
            Encoding::Percent => utf8_percent_encode(text, NON_ALPHANUMERIC).to_string().into_bytes(),
            Encoding::Html => html_escape(text).into_bytes(),
        }
    }

    /// Parses a comma-separated list such as `none,url`.
    pub fn parse_list(list: &str) -> Result<Vec<Encoding>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Encoding {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "identity" | "raw" => Ok(Encoding::Identity),
            "url" | "query" => Ok(Encoding::Url),
            "percent" => Ok(Encoding::Percent),
            "html" => Ok(Encoding::Html),
            other => Err(ScanError::Config(format!("unknown encoding '{}'", other))),
        }
    }
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}
