//! # File name resolution
//!
//! Kernel references and coefficient tables are written in labels and configuration profiles as
//! *patterns* rather than plain paths:
//!
//! * `$name/...` – a data-area variable, looked up in a caller-supplied map and then in the
//!   process environment (`$mro/calibration/...`, `$base/kernels/lsk/...`).
//! * `naif????.tls` – a run of `?` characters is a version placeholder; the highest numbered
//!   file present on disk is selected.
//!
//! [`FileResolver::resolve`] expands both and returns a [`Utf8PathBuf`]. A pattern whose version
//! cannot be matched resolves to the literal expanded path so callers can still report it as
//! missing.

use std::collections::HashMap;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::planetcal_errors::CalibrationError;

/// Expands data-area variables and version placeholders in file patterns.
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    data_areas: HashMap<String, Utf8PathBuf>,
}

impl FileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data-area root used to expand `$name` in patterns.
    pub fn with_data_area(mut self, name: &str, root: impl Into<Utf8PathBuf>) -> Self {
        self.data_areas.insert(name.to_string(), root.into());
        self
    }

    /// Expand `$name` variables.
    ///
    /// Arguments
    /// -----------------
    /// * `pattern`: the raw file reference.
    ///
    /// Return
    /// ----------
    /// * The expanded string, or a [`CalibrationError::Configuration`] naming the unknown variable.
    pub fn expand_variables(&self, pattern: &str) -> Result<String, CalibrationError> {
        let mut out = String::with_capacity(pattern.len());
        let mut last = 0;
        for caps in VARIABLE.captures_iter(pattern) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            let value = match self.data_areas.get(name) {
                Some(root) => root.to_string(),
                None => std::env::var(name).map_err(|_| {
                    CalibrationError::Configuration(format!(
                        "unknown data area variable ${name} in {pattern}"
                    ))
                })?,
            };
            out.push_str(&pattern[last..whole.start()]);
            out.push_str(&value);
            last = whole.end();
        }
        out.push_str(&pattern[last..]);
        Ok(out)
    }

    /// Expand variables then resolve `?` version placeholders to the highest version on disk.
    pub fn resolve(&self, pattern: &str) -> Result<Utf8PathBuf, CalibrationError> {
        let expanded = Utf8PathBuf::from(self.expand_variables(pattern.trim())?);
        match expanded.file_name() {
            Some(name) if name.contains('?') => {
                Ok(highest_version(&expanded).unwrap_or_else(|| expanded.clone()))
            }
            _ => Ok(expanded),
        }
    }
}

// `$name` or `${name}`
static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("variable pattern is valid"));

/// Return the path with the highest version number matching the `?` placeholders of `pattern`.
fn highest_version(pattern: &Utf8Path) -> Option<Utf8PathBuf> {
    let name = pattern.file_name()?;
    let dir = match pattern.parent() {
        Some(p) if !p.as_str().is_empty() => p.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };

    let mut regex_src = String::from("^");
    let mut run = 0usize;
    for ch in name.chars() {
        if ch == '?' {
            run += 1;
            continue;
        }
        if run > 0 {
            regex_src.push_str(&format!(r"(\d{{{run}}})"));
            run = 0;
        }
        regex_src.push_str(&regex::escape(&ch.to_string()));
    }
    if run > 0 {
        regex_src.push_str(&format!(r"(\d{{{run}}})"));
    }
    regex_src.push('$');
    let matcher = Regex::new(&regex_src).ok()?;

    let entries = std::fs::read_dir(dir.as_std_path()).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|file| {
            let version: u64 = matcher
                .captures(&file)?
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .collect::<String>()
                .parse()
                .ok()?;
            Some((version, file))
        })
        .max_by_key(|(version, _)| *version)
        .map(|(_, file)| dir.join(file))
}
