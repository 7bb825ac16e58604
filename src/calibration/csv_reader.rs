//! # Coefficient tables
//!
//! Device-specific coefficients (dark current, flats, line-drift terms, gains) come from CSV
//! files. [`CsvTable`] reads one with the [`csv`] crate and hands out whole rows or columns as
//! numbers; columns are selected by header name or by index.
//!
//! A module reads its tables through [`CsvSource::from_profile`]. For a table keyword `Flats`
//! the profile may carry:
//!
//! | keyword | meaning | default |
//! |---|---|---|
//! | `Flats` | file pattern (placeholders and `$` variables allowed) | required |
//! | `FlatsHeader` | first row is a header | `FALSE` |
//! | `FlatsSkipLines` | lines dropped before parsing | `0` |
//! | `FlatsComment` | comment character | `#` |
//! | `FlatsDelimiter` | field delimiter | `,` |
//! | `FlatsColumnName` / `FlatsColumnIndex` | column selection, placeholders allowed in the name | index 0 |

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use super::conf::Profile;
use crate::file_name::FileResolver;
use crate::planetcal_errors::CalibrationError;

/// Column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Index(usize),
    Name(String),
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        match s.trim().parse() {
            Ok(i) => Selector::Index(i),
            Err(_) => Selector::Name(s.trim().to_string()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Index(i) => write!(f, "#{i}"),
            Selector::Name(n) => f.write_str(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub has_header: bool,
    pub skip_lines: usize,
    pub comment: Option<u8>,
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            has_header: false,
            skip_lines: 0,
            comment: Some(b'#'),
            delimiter: b',',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CsvTable {
    name: String,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Parse CSV text.
    ///
    /// Arguments
    /// -----------------
    /// * `name`: used in error messages, usually the file path.
    /// * `text`: the file content.
    /// * `options`: header, skipped lines, comment and delimiter handling.
    pub fn parse(name: &str, text: &str, options: &CsvOptions) -> Result<Self, CalibrationError> {
        let body: String = text
            .lines()
            .skip(options.skip_lines)
            .flat_map(|l| [l, "\n"])
            .collect();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(options.has_header)
            .delimiter(options.delimiter)
            .comment(options.comment)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let header = if options.has_header {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            Vec::new()
        };
        let rows = reader
            .records()
            .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>, _>>()?;

        Ok(CsvTable {
            name: name.to_string(),
            header,
            rows,
        })
    }

    pub fn from_path(path: &Utf8Path, options: &CsvOptions) -> Result<Self, CalibrationError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(path.as_str(), &text, options)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn column_index(&self, selector: &Selector) -> Result<usize, CalibrationError> {
        match selector {
            Selector::Index(i) => Ok(*i),
            Selector::Name(name) => self
                .header
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    CalibrationError::Configuration(format!(
                        "column {name} not found in {}",
                        self.name
                    ))
                }),
        }
    }

    fn number(&self, raw: &str, row: usize, col: usize) -> Result<f64, CalibrationError> {
        raw.parse().map_err(|_| {
            CalibrationError::Format(format!(
                "{}: value '{raw}' at row {row}, column {col} is not a number",
                self.name
            ))
        })
    }

    /// Every value of one column.
    pub fn column(&self, selector: &Selector) -> Result<Vec<f64>, CalibrationError> {
        let col = self.column_index(selector)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                let raw = row.get(col).ok_or_else(|| {
                    CalibrationError::Format(format!(
                        "{}: row {r} has no column {selector}",
                        self.name
                    ))
                })?;
                self.number(raw, r, col)
            })
            .collect()
    }

    /// Every value of one row.
    pub fn row(&self, index: usize) -> Result<Vec<f64>, CalibrationError> {
        let row = self.rows.get(index).ok_or_else(|| {
            CalibrationError::DimensionMismatch {
                name: format!("{} rows", self.name),
                expected: index + 1,
                actual: self.rows.len(),
            }
        })?;
        row.iter()
            .enumerate()
            .map(|(c, raw)| self.number(raw, index, c))
            .collect()
    }

    /// A single cell.
    pub fn value(&self, row: usize, selector: &Selector) -> Result<f64, CalibrationError> {
        let col = self.column_index(selector)?;
        let raw = self
            .rows
            .get(row)
            .and_then(|r| r.get(col))
            .ok_or_else(|| {
                CalibrationError::Format(format!(
                    "{}: no value at row {row}, column {selector}",
                    self.name
                ))
            })?;
        self.number(raw, row, col)
    }
}

/// Where a module's table lives and how to read it.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvSource {
    pub path: Utf8PathBuf,
    pub options: CsvOptions,
    pub column: Selector,
}

impl CsvSource {
    /// Read the location and parsing options of table `key` from a profile.
    pub fn from_profile(
        profile: &Profile,
        key: &str,
        resolver: &FileResolver,
    ) -> Result<Self, CalibrationError> {
        let path = resolver.resolve(&profile.source(key)?)?;
        let comment = match profile.values(&format!("{key}Comment")) {
            Some(v) => v.first().and_then(|c| c.bytes().next()),
            None => Some(b'#'),
        };
        let delimiter = profile
            .values(&format!("{key}Delimiter"))
            .and_then(|v| v.first())
            .and_then(|d| d.bytes().next())
            .unwrap_or(b',');
        let column = match (
            profile.values(&format!("{key}ColumnName")),
            profile.values(&format!("{key}ColumnIndex")),
        ) {
            (Some(name), _) if !name.is_empty() => Selector::Name(profile.resolve(&name[0])),
            (_, Some(index)) if !index.is_empty() => Selector::from(index[0].as_str()),
            _ => Selector::Index(0),
        };

        Ok(CsvSource {
            path,
            options: CsvOptions {
                has_header: profile.get_bool_or(&format!("{key}Header"), false)?,
                skip_lines: profile.get_usize_or(&format!("{key}SkipLines"), 0)?,
                comment,
                delimiter,
            },
            column,
        })
    }

    pub fn load(&self) -> Result<CsvTable, CalibrationError> {
        CsvTable::from_path(&self.path, &self.options)
    }

    /// The selected column, checked against `expected` values when non-zero.
    pub fn load_column(&self, name: &str, expected: usize) -> Result<Vec<f64>, CalibrationError> {
        let values = self.load()?.column(&self.column)?;
        if expected != 0 && values.len() != expected {
            return Err(CalibrationError::DimensionMismatch {
                name: name.to_string(),
                expected,
                actual: values.len(),
            });
        }
        Ok(values)
    }

    /// Row `index`, checked against `expected` values when non-zero.
    pub fn load_row(
        &self,
        name: &str,
        index: usize,
        expected: usize,
    ) -> Result<Vec<f64>, CalibrationError> {
        let values = self.load()?.row(index)?;
        if expected != 0 && values.len() != expected {
            return Err(CalibrationError::DimensionMismatch {
                name: name.to_string(),
                expected,
                actual: values.len(),
            });
        }
        Ok(values)
    }
}

#[cfg(test)]
mod csv_reader_test {
    use super::*;
    use crate::label::Group;
    use std::io::Write;

    const TABLE: &str = "# gains per channel\nversion 3\nCCD,A,B\n0, 1.5, 2.5\n1, 3.0, 4.0\n";

    #[test]
    fn test_parse_with_header_and_skip() {
        let options = CsvOptions {
            has_header: true,
            skip_lines: 2,
            ..Default::default()
        };
        let table = CsvTable::parse("gains", TABLE, &options).unwrap();
        assert_eq!(table.header(), &["CCD", "A", "B"]);
        assert_eq!(table.rows(), 2);
        assert_eq!(table.columns(), 3);
        assert_eq!(table.column(&Selector::from("b")).unwrap(), vec![2.5, 4.0]);
        assert_eq!(table.column(&Selector::from("1")).unwrap(), vec![1.5, 3.0]);
        assert_eq!(table.row(1).unwrap(), vec![1.0, 3.0, 4.0]);
        assert_eq!(table.value(0, &Selector::from("A")).unwrap(), 1.5);
        assert!(table.value(2, &Selector::Index(0)).is_err());
        assert!(table.column(&Selector::from("C")).is_err());
        assert!(table.row(5).is_err());
    }

    #[test]
    fn test_non_numeric() {
        let table = CsvTable::parse("t", "1;x\n", &CsvOptions {
            delimiter: b';',
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            table.column(&Selector::Index(1)),
            Err(CalibrationError::Format(_))
        ));
    }

    #[test]
    fn test_source_from_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat_5.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "S,Flat").unwrap();
        writeln!(f, "0,0.9").unwrap();
        writeln!(f, "1,1.1").unwrap();

        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let resolver = FileResolver::new().with_data_area("cal", root);
        let profile = Profile {
            name: "GainFlatField".into(),
            keywords: Group::new()
                .with("CCD", &[5])
                .with("Flats", &["$cal/flat_{CCD}.csv"])
                .with("FlatsHeader", &["TRUE"])
                .with("FlatsColumnName", &["Flat"]),
        };
        let source = CsvSource::from_profile(&profile, "Flats", &resolver).unwrap();
        assert_eq!(source.column, Selector::Name("Flat".into()));
        assert_eq!(source.load_column("Flats", 2).unwrap(), vec![0.9, 1.1]);
        assert_eq!(
            source.load_column("Flats", 3),
            Err(CalibrationError::DimensionMismatch {
                name: "Flats".into(),
                expected: 3,
                actual: 2
            })
        );
    }
}
