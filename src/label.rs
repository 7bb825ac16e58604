//! # Image label model
//!
//! A deliberately small object model for the metadata attached to an image: named keyword
//! groups (`Kernels`, `Instrument`, `Archive`, ...) and the cached tables (`InstrumentPointing`,
//! `InstrumentPosition`) whose rows are time samples.
//!
//! Labels are read from JSON. Keyword values may be written as a string, a number, a boolean or
//! a list of those; every form is normalised to a list of strings so lookups behave the same way
//! regardless of how the producer wrote them. Group and keyword lookups are case-insensitive.
//!
//! ```json
//! {
//!   "file_name": "PSP_001234_1234_RED5.cub",
//!   "groups": {
//!     "Kernels": { "InstrumentPointing": ["$mro/kernels/ck/a.bc", "TABLE"], "CameraVersion": 1 },
//!     "Archive": { "ProductId": "PSP_001234_1234_RED5" }
//!   },
//!   "tables": [
//!     { "name": "InstrumentPointing",
//!       "keywords": { "TimeDependentFrames": [-74000, -74900, 1] },
//!       "records": [[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 100.0]] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Deserializer};

use crate::planetcal_errors::CalibrationError;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl RawScalar {
    fn into_string(self) -> String {
        match self {
            RawScalar::Text(s) => s,
            RawScalar::Number(n) => n.to_string(),
            RawScalar::Bool(b) => String::from(if b { "TRUE" } else { "FALSE" }),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    One(RawScalar),
    Many(Vec<RawScalar>),
}

/// A keyword value list, normalised to strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(pub Vec<String>);

impl<'de> Deserialize<'de> for Values {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawValue::deserialize(deserializer)? {
            RawValue::One(v) => Values(vec![v.into_string()]),
            RawValue::Many(vs) => Values(vs.into_iter().map(RawScalar::into_string).collect()),
        })
    }
}

/// A named set of keywords.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Group {
    keywords: BTreeMap<String, Values>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, mostly used to assemble labels in code.
    pub fn with<S: ToString>(mut self, key: &str, values: &[S]) -> Self {
        self.insert(key, values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Insert or replace `key`; an existing key differing only in case is replaced.
    pub fn insert(&mut self, key: &str, values: Vec<String>) {
        self.keywords.retain(|k, _| !k.eq_ignore_ascii_case(key));
        self.keywords.insert(key.to_string(), Values(values));
    }

    /// Copy every keyword of `other` over this group.
    pub fn merge(&mut self, other: &Group) {
        for (key, values) in other.iter() {
            self.insert(key, values.to_vec());
        }
    }

    /// Values of `key`, case-insensitive.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.keywords
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.0.as_slice())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// First value of `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.keywords.iter().map(|(k, v)| (k.as_str(), v.0.as_slice()))
    }
}

/// A cached table: one record per time sample, plus its own keywords.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CachedTable {
    pub name: String,
    #[serde(default)]
    pub keywords: Group,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub records: Vec<Vec<f64>>,
}

impl CachedTable {
    pub fn new(name: &str, records: Vec<Vec<f64>>) -> Self {
        CachedTable {
            name: name.to_string(),
            records,
            ..Default::default()
        }
    }

    pub fn with_keyword<S: ToString>(mut self, key: &str, values: &[S]) -> Self {
        self.keywords = self.keywords.with(key, values);
        self
    }

    /// Number of fields per record, or `None` if the records are ragged or absent.
    pub fn field_count(&self) -> Option<usize> {
        let n = self.records.first()?.len();
        self.records.iter().all(|r| r.len() == n).then_some(n)
    }
}

/// Metadata label of one image.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    groups: BTreeMap<String, Group>,
    #[serde(default)]
    tables: Vec<CachedTable>,
}

impl Label {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self, CalibrationError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &Utf8Path) -> Result<Self, CalibrationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_file_name(mut self, name: &str) -> Self {
        self.file_name = Some(name.to_string());
        self
    }

    pub fn with_group(mut self, name: &str, group: Group) -> Self {
        self.groups.insert(name.to_string(), group);
        self
    }

    pub fn with_table(mut self, table: CachedTable) -> Self {
        self.tables.push(table);
        self
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, g)| g)
    }

    /// Like [`Label::group`] but a missing group is a configuration error.
    pub fn require_group(&self, name: &str) -> Result<&Group, CalibrationError> {
        self.group(name).ok_or_else(|| {
            CalibrationError::Configuration(format!("label has no {name} group"))
        })
    }

    /// First value of `group:key`.
    pub fn keyword(&self, group: &str, key: &str) -> Option<&str> {
        self.group(group)?.first(key)
    }

    pub fn table(&self, name: &str) -> Option<&CachedTable> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tables(&self) -> &[CachedTable] {
        &self.tables
    }
}

#[cfg(test)]
mod label_test {
    use super::*;

    const LABEL: &str = r#"{
        "file_name": "PSP_001.cub",
        "groups": {
            "Kernels": { "InstrumentPointing": ["a.bc", "TABLE"], "CameraVersion": 2, "Flag": true },
            "Archive": { "ProductId": "PSP_001" }
        },
        "tables": [
            { "name": "InstrumentPointing",
              "keywords": { "TimeDependentFrames": [-74000, -74900, 1] },
              "records": [[1.0, 0.0, 0.0, 0.0, 10.0], [1.0, 0.0, 0.0, 0.0, 11.0]] }
        ]
    }"#;

    #[test]
    fn test_parse_label() {
        let label = Label::from_json(LABEL).unwrap();
        assert_eq!(label.file_name.as_deref(), Some("PSP_001.cub"));
        assert_eq!(
            label.group("kernels").unwrap().get("instrumentpointing"),
            Some(&["a.bc".to_string(), "TABLE".to_string()][..])
        );
        assert_eq!(label.keyword("Kernels", "CameraVersion"), Some("2"));
        assert_eq!(label.keyword("Kernels", "Flag"), Some("TRUE"));
        assert_eq!(label.keyword("Archive", "ProductId"), Some("PSP_001"));

        let table = label.table("instrumentpointing").unwrap();
        assert_eq!(table.field_count(), Some(5));
        assert_eq!(
            table.keywords.get("TimeDependentFrames").unwrap(),
            &["-74000", "-74900", "1"]
        );
    }

    #[test]
    fn test_missing_group() {
        let label = Label::new();
        assert!(matches!(
            label.require_group("Kernels"),
            Err(CalibrationError::Configuration(_))
        ));
    }

    #[test]
    fn test_ragged_table() {
        let table = CachedTable::new("t", vec![vec![1.0, 2.0], vec![1.0]]);
        assert_eq!(table.field_count(), None);
    }
}
