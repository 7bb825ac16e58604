use std::fmt;

use itertools::Itertools;

/// Ordered provenance of a correction vector, one entry per processing step.
///
/// Displayed as `{step; step; ...}`, the form written to history reports and label keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    entries: Vec<String>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    pub fn extend(&mut self, other: &History) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if any entry starts with `prefix`.
    pub fn contains(&self, prefix: &str) -> bool {
        self.entries.iter().any(|e| e.starts_with(prefix))
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.entries.iter().join("; "))
    }
}

#[cfg(test)]
mod history_test {
    use super::*;

    #[test]
    fn test_display() {
        let mut h = History::new();
        assert_eq!(h.to_string(), "{}");
        h.add("Profile[ZeroBufferSmooth]");
        h.add(format!("AveCols(Buffer[{},{}])", 5, 11));
        assert_eq!(h.to_string(), "{Profile[ZeroBufferSmooth]; AveCols(Buffer[5,11])}");
        assert!(h.contains("AveCols"));
        assert_eq!(h.len(), 2);
    }
}
