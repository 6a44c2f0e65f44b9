use crate::core::vectors::AttackVector;

/// Literal, case-sensitive reflection check.
pub struct ReflectionDetector;

impl ReflectionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Returns true when `body` contains the vector's marker.
    ///
    /// An empty marker (the baseline sentinel) never matches.
    pub fn detect(&self, body: &[u8], vector: &AttackVector) -> bool {
        contains(body, vector.marker().as_bytes())
    }
}

impl Default for ReflectionDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
