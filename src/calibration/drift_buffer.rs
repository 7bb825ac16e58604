//! Buffer-pixel drift series (`Zf`).
//!
//! The buffer pixels of every line are averaged over the columns
//! `ZeroBufferSmoothFirstSample..=ZeroBufferSmoothLastSample`, low-pass filtered along the lines
//! and the remaining gaps spline filled. The result feeds the drift fit.

use log::debug;

use super::conf::Profile;
use super::data::CalibrationData;
use super::filters::{ave_cols, low_pass, spline_fill, Statistics};
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::planetcal_errors::CalibrationError;

pub fn compute(
    profile: &Profile,
    data: &CalibrationData,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    if data.buffer.is_empty() {
        return Err(CalibrationError::Configuration(
            "ZeroBufferSmooth needs buffer pixels".into(),
        ));
    }
    let first = profile.get_usize_or("ZeroBufferSmoothFirstSample", 5)?;
    let last = profile.get_usize_or("ZeroBufferSmoothLastSample", 11)?;
    let width = profile.get_usize_or("ZeroBufferSmoothFilterWidth", 201)?;
    let iterations = profile.get_usize_or("ZeroBufferSmoothFilterIterations", 2)?;

    let averages = ave_cols(&data.buffer, first, last);
    history.add(format!("AveCols(Buffer[{first},{last}])"));

    let filtered = low_pass(&averages, width, iterations);
    history.add(format!("LowPassFilter(Width[{width}],Iters[{iterations}])"));

    let (filled, count) = spline_fill(&filtered);
    history.add(format!("SplineFill(Cubic,Filled[{count}])"));

    let stats = Statistics::from_values(&filled);
    history.add(format!(
        "Statistics(Average[{:.4}],StdDev[{:.4}])",
        stats.average, stats.std_dev
    ));
    debug!("ZeroBufferSmooth = {history}");

    CorrectionVector::new(Tag::Zf, filled, history, data)
}
