//! # Radiometric calibration
//!
//! The calibration of a line-scan image is split in two phases:
//!
//! 1. **Module phase.** Every correction module turns calibration pixels, coefficient tables
//!    and configuration into one [`CorrectionVector`], indexed by image line, by image sample or
//!    holding a single scalar. Each vector keeps an ordered [`History`] of the steps that produced it.
//! 2. **Pixel phase.** [`pipeline::CalibrationContext::calibrate_line`] combines the vectors for
//!    every valid pixel:
//!
//! ```text
//! hdn = (raw − Zb[line] − Zz[s] − Zd[s] − Zdr[s]) / Zg[line]
//! out = hdn · Zgg[s] · (1 − Znl · mean(hdn of the line)) · Za[s] · Zt[s] / Ziof
//! ```
//!
//! Special pixels pass through unchanged. A module switched off with `Debug::SkipModule`
//! contributes its neutral vector (0 for offsets, 1 for gains), so the equation keeps the same
//! shape whatever the configuration. `ZeroDark` and `ZeroDarkRate` are alternatives: at most one
//! of them is enabled.
//!
//! ## Modules
//!
//! | Tag | Module | Indexed by |
//! |---|---|---|
//! | `Zf` | [`drift_buffer`] (`ZeroBufferSmooth`) | line |
//! | `Zb` | [`drift_correct`] (`ZeroBufferFit`) | line |
//! | `Zz` | [`offset_correct`] (`ZeroReverse`) | sample |
//! | `Zd` | [`dark_subtract`] (`ZeroDark`) | sample |
//! | `Zdr` | [`dark_rate`] (`ZeroDarkRate`) | sample |
//! | `Zg` | [`gain_line_drift`] (`GainLineDrift`) | line |
//! | `Znl` | [`gain`] (`GainNonLinearity`) | scalar |
//! | `Zgg` | [`gain`] (`GainChannelNormalize`) | sample |
//! | `Za` | [`flat_field`] (`GainFlatField`) | sample |
//! | `Zt` | [`temp_gain`] (`GainTemperature`) | sample |
//! | `Ziof` | [`unit_conversion`] (`GainUnitConversion`) | scalar |

use std::fmt;
use std::io::Write;

use camino::Utf8Path;

use self::data::CalibrationData;
use self::history::History;
use crate::planetcal_errors::CalibrationError;

pub mod conf;
pub mod csv_reader;
pub mod dark_rate;
pub mod dark_subtract;
pub mod data;
pub mod drift_buffer;
pub mod drift_correct;
pub mod filters;
pub mod flat_field;
pub mod gain;
pub mod gain_line_drift;
pub mod history;
pub mod offset_correct;
pub mod pipeline;
pub mod temp_gain;
pub mod unit_conversion;

/// What a correction vector is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Line,
    Sample,
    Scalar,
}

/// Identifies a correction vector and the module producing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    Zf,
    Zb,
    Zz,
    Zd,
    Zdr,
    Zg,
    Znl,
    Zgg,
    Za,
    Zt,
    Ziof,
}

impl Tag {
    /// Report order.
    pub const ALL: [Tag; 11] = [
        Tag::Zf,
        Tag::Zb,
        Tag::Zz,
        Tag::Zd,
        Tag::Zdr,
        Tag::Zg,
        Tag::Znl,
        Tag::Zgg,
        Tag::Za,
        Tag::Zt,
        Tag::Ziof,
    ];

    /// Processing order: `Zb` consumes `Zf`, and the outcome of `Zdr` decides whether `Zd` runs.
    pub const PROCESSING: [Tag; 11] = [
        Tag::Zf,
        Tag::Zb,
        Tag::Zz,
        Tag::Zdr,
        Tag::Zd,
        Tag::Zg,
        Tag::Znl,
        Tag::Zgg,
        Tag::Za,
        Tag::Zt,
        Tag::Ziof,
    ];

    /// Configuration profile and history name of the module.
    pub fn module_name(&self) -> &'static str {
        match self {
            Tag::Zf => "ZeroBufferSmooth",
            Tag::Zb => "ZeroBufferFit",
            Tag::Zz => "ZeroReverse",
            Tag::Zd => "ZeroDark",
            Tag::Zdr => "ZeroDarkRate",
            Tag::Zg => "GainLineDrift",
            Tag::Znl => "GainNonLinearity",
            Tag::Zgg => "GainChannelNormalize",
            Tag::Za => "GainFlatField",
            Tag::Zt => "GainTemperature",
            Tag::Ziof => "GainUnitConversion",
        }
    }

    pub fn axis(&self) -> Axis {
        match self {
            Tag::Zf | Tag::Zb | Tag::Zg => Axis::Line,
            Tag::Zz | Tag::Zd | Tag::Zdr | Tag::Zgg | Tag::Za | Tag::Zt => Axis::Sample,
            Tag::Znl | Tag::Ziof => Axis::Scalar,
        }
    }

    /// Value that leaves the calibration equation unchanged.
    pub fn neutral(&self) -> f64 {
        match self {
            Tag::Zf | Tag::Zb | Tag::Zz | Tag::Zd | Tag::Zdr | Tag::Znl => 0.0,
            Tag::Zg | Tag::Zgg | Tag::Za | Tag::Zt | Tag::Ziof => 1.0,
        }
    }

    pub fn expected_len(&self, data: &CalibrationData) -> usize {
        match self.axis() {
            Axis::Line => data.lines,
            Axis::Sample => data.samples,
            Axis::Scalar => 1,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module_name())
    }
}

/// Common view of a calibration module's result.
pub trait CalibrationModule {
    fn name(&self) -> &str;
    fn history(&self) -> &History;
    fn values(&self) -> &[f64];
}

/// A named correction vector with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionVector {
    tag: Tag,
    values: Vec<f64>,
    history: History,
}

impl CorrectionVector {
    /// Wrap `values`, checking the length against the image geometry.
    pub fn new(
        tag: Tag,
        values: Vec<f64>,
        history: History,
        data: &CalibrationData,
    ) -> Result<Self, CalibrationError> {
        let expected = tag.expected_len(data);
        if values.len() != expected {
            return Err(CalibrationError::DimensionMismatch {
                name: tag.module_name().to_string(),
                expected,
                actual: values.len(),
            });
        }
        Ok(CorrectionVector {
            tag,
            values,
            history,
        })
    }

    /// The neutral vector of a skipped module.
    pub fn neutral(tag: Tag, mut history: History, data: &CalibrationData) -> Self {
        history.add("Debug::SkipModule invoked!");
        CorrectionVector {
            tag,
            values: vec![tag.neutral(); tag.expected_len(data)],
            history,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Value at `index`, or the only value of a scalar vector.
    pub fn at(&self, index: usize) -> f64 {
        match self.tag.axis() {
            Axis::Scalar => self.values[0],
            _ => self.values[index],
        }
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Write the history as a comment line followed by an `index,value` table.
    pub fn dump(&self, path: &Utf8Path) -> Result<(), CalibrationError> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "# {} = {}", self.name(), self.history)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["index", self.name()])?;
        for (i, v) in self.values.iter().enumerate() {
            writer.serialize((i, v))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }
}

impl CalibrationModule for CorrectionVector {
    fn name(&self) -> &str {
        self.tag.module_name()
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn values(&self) -> &[f64] {
        &self.values
    }
}
