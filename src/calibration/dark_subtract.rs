//! Dark current (`Zd`).
//!
//! `Zd[s] = B[s] · exposure · 2^((T − BaseTemperature) / DarkDoublingTemperature)`, where `B`
//! is the per-sample dark rate from the `DarkCurrent` table, `T` the average FPA temperature and
//! `exposure` the time a pixel integrates (line time × TDI stages).

use log::debug;

use super::conf::Profile;
use super::csv_reader::CsvSource;
use super::data::CalibrationData;
use super::filters::low_pass;
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::file_name::FileResolver;
use crate::planetcal_errors::CalibrationError;

/// Temperature scaling of the dark rate.
pub fn temperature_factor(temperature: f64, base: f64, doubling: f64) -> f64 {
    2f64.powf((temperature - base) / doubling)
}

pub fn compute(
    profile: &Profile,
    data: &CalibrationData,
    resolver: &FileResolver,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    let source = CsvSource::from_profile(profile, "DarkCurrent", resolver)?;
    let rates = source.load_column("DarkCurrent", data.samples)?;
    history.add(format!("DarkCurrent[{}]", source.path));

    let base = profile.get_f64_or("BaseTemperature", 21.0)?;
    let doubling = profile.get_f64_or("DarkDoublingTemperature", 6.0)?;
    if doubling == 0.0 {
        return Err(CalibrationError::Configuration(
            "DarkDoublingTemperature must not be zero".into(),
        ));
    }
    let temperature = data.fpa_temperature.average();
    let exposure = data.line_time() * f64::from(data.device.tdi);
    let factor = temperature_factor(temperature, base, doubling);
    history.add(format!(
        "Dark(FpaTemp[{temperature:.4}],BaseTemp[{base}],Doubling[{doubling}],Exposure[{exposure:.6e}],Factor[{factor:.6}])"
    ));

    let dark: Vec<f64> = rates.iter().map(|b| b * exposure * factor).collect();
    let width = profile.get_usize_or("ZeroDarkFilterWidth", 3)?;
    let iterations = profile.get_usize_or("ZeroDarkFilterIterations", 0)?;
    let smoothed = low_pass(&dark, width, iterations);
    history.add(format!("LowPassFilter(Width[{width}],Iters[{iterations}])"));
    debug!("ZeroDark = {history}");

    CorrectionVector::new(Tag::Zd, smoothed, history, data)
}
