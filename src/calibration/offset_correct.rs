//! # Reverse-clock offset (`Zz`)
//!
//! The reverse-clock rows `ZeroReverseFirstLine..=ZeroReverseLastLine` are averaged per
//! sample, low-pass filtered and spline filled. Before that, the raw block is checked for
//! anomalies: when the mean, the standard deviation or one of the special-pixel counts exceeds
//! its limit, the profile is replaced by a constant equal to `RevMeanTrigger`.
//!
//! Each limit defaults to the statistic it is compared with, so nothing triggers unless the
//! profile sets the limits explicitly. The counts default to a tolerance of 1. A block without a
//! single valid pixel always triggers, and is a configuration error when no `RevMeanTrigger`
//! supplies the replacement constant.

use log::{debug, warn};

use super::conf::Profile;
use super::data::CalibrationData;
use super::filters::{ave_lines, low_pass, spline_fill, Statistics};
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::planetcal_errors::CalibrationError;

/// Limits of the anomaly test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerLimits {
    pub mean: f64,
    pub std_dev: f64,
    pub lis: usize,
    pub his: usize,
    pub null: usize,
}

impl TriggerLimits {
    /// Limits from the profile, falling back to `stats` for mean and standard deviation.
    pub fn from_profile(profile: &Profile, stats: &Statistics) -> Result<Self, CalibrationError> {
        Ok(TriggerLimits {
            mean: profile.get_f64_or("RevMeanTrigger", stats.average)?,
            std_dev: profile.get_f64_or("RevStdDevTrigger", stats.std_dev)?,
            lis: profile.get_usize_or("RevLisTolerance", 1)?,
            his: profile.get_usize_or("RevHisTolerance", 1)?,
            null: profile.get_usize_or("RevNulTolerance", 1)?,
        })
    }

    pub fn exceeded_by(&self, stats: &Statistics) -> bool {
        stats.average > self.mean
            || stats.std_dev > self.std_dev
            || stats.lis > self.lis
            || stats.his > self.his
            || stats.null > self.null
    }
}

/// Result of the reverse-clock processing.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetCorrect {
    pub values: Vec<f64>,
    pub stats: Statistics,
    pub limits: TriggerLimits,
    pub triggered: bool,
}

impl OffsetCorrect {
    /// Process the reverse-clock block `rows` (one row per reverse-clock line).
    pub fn process(
        profile: &Profile,
        rows: &[Vec<f64>],
        history: &mut History,
    ) -> Result<Self, CalibrationError> {
        let first = profile.get_usize_or("ZeroReverseFirstLine", 0)?;
        let last = profile.get_usize_or("ZeroReverseLastLine", 19)?;
        if first > last || first >= rows.len() {
            return Err(CalibrationError::Configuration(format!(
                "reverse clock crop [{first},{last}] selects none of the {} reverse clock lines",
                rows.len()
            )));
        }
        let block = &rows[first..(last + 1).min(rows.len())];

        let stats = Statistics::from_values(block.iter().flatten());
        if stats.valid == 0 && !profile.exists("RevMeanTrigger") {
            return Err(CalibrationError::Configuration(format!(
                "no valid reverse clock pixel in lines [{first},{last}] and no RevMeanTrigger"
            )));
        }
        history.add(format!(
            "RevClock(CropLines[{first},{last}],Mean[{:.6}],StdDev[{:.6}],LisPixels[{}],HisPixels[{}],NulPixels[{}])",
            stats.average, stats.std_dev, stats.lis, stats.his, stats.null
        ));

        let limits = TriggerLimits::from_profile(profile, &stats)?;
        history.add(format!(
            "TriggerLimits(RevMeanTrigger[{}],RevStdDevTrigger[{}],RevLisTolerance[{}],RevHisTolerance[{}],RevNulTolerance[{}])",
            limits.mean, limits.std_dev, limits.lis, limits.his, limits.null
        ));

        let samples = block.iter().map(Vec::len).max().unwrap_or(0);
        let triggered = stats.valid == 0 || limits.exceeded_by(&stats);
        let values = if triggered {
            history.add("Triggered[TRUE]");
            warn!(
                "reverse clock anomaly (mean {:.4}, std {:.4}, lis {}, his {}, null {}); using constant {}",
                stats.average, stats.std_dev, stats.lis, stats.his, stats.null, limits.mean
            );
            vec![limits.mean; samples]
        } else {
            history.add("Triggered[FALSE]");
            let width = profile.get_usize_or("ZeroReverseFilterWidth", 3)?;
            let iterations = profile.get_usize_or("ZeroReverseFilterIterations", 1)?;
            let averaged = ave_lines(block, 0, block.len().saturating_sub(1));
            let filtered = low_pass(&averaged, width, iterations);
            history.add(format!("LowPassFilter(Width[{width}],Iters[{iterations}])"));
            let (filled, count) = spline_fill(&filtered);
            history.add(format!("SplineFill(Cubic,Filled[{count}])"));
            filled
        };

        Ok(OffsetCorrect {
            values,
            stats,
            limits,
            triggered,
        })
    }

    pub fn compute(
        profile: &Profile,
        data: &CalibrationData,
        mut history: History,
    ) -> Result<CorrectionVector, CalibrationError> {
        if data.reverse_clock.is_empty() {
            return Err(CalibrationError::Configuration(
                "ZeroReverse needs reverse clock pixels".into(),
            ));
        }
        let offset = OffsetCorrect::process(profile, &data.reverse_clock, &mut history)?;
        debug!("ZeroReverse = {history}");
        CorrectionVector::new(Tag::Zz, offset.values, history, data)
    }
}
