//! Dark current from temperature-dependent rates (`Zdr`).
//!
//! The `DarkRate` table holds one row per sample and one column per calibration temperature,
//! the header naming the temperature (°C) of each column. The rate of every sample is linearly
//! interpolated at the average FPA temperature, clamped to the first and last columns, and
//! multiplied by the exposure (line time × TDI stages):
//!
//! ```text
//! Zdr[s] = rate(s, T) · exposure
//! ```
//!
//! `ZeroDarkRate` and `ZeroDark` remove the same signal, so only one of them may be enabled.
//! With `Fallback = TRUE` a failure to build the rates is not fatal: the pipeline contributes a
//! zero vector here and runs `ZeroDark` instead.

use itertools::Itertools;
use log::debug;

use super::conf::Profile;
use super::csv_reader::{CsvSource, CsvTable};
use super::data::CalibrationData;
use super::filters::Statistics;
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::file_name::FileResolver;
use crate::planetcal_errors::CalibrationError;

/// Column weights interpolating at `temperature`: `(lower, upper, fraction of upper)`.
fn bracket(temperatures: &[f64], temperature: f64) -> (usize, usize, f64) {
    let last = temperatures.len() - 1;
    if temperature <= temperatures[0] {
        return (0, 0, 0.0);
    }
    if temperature >= temperatures[last] {
        return (last, last, 0.0);
    }
    let upper = temperatures
        .iter()
        .position(|t| *t >= temperature)
        .unwrap_or(last);
    let lower = upper - 1;
    let fraction =
        (temperature - temperatures[lower]) / (temperatures[upper] - temperatures[lower]);
    (lower, upper, fraction)
}

/// Per-sample dark rate of `table` at `temperature`.
///
/// Return
/// ----------
/// * One rate per table row, or [`CalibrationError::Format`] when the header does not list
///   increasing temperatures.
pub fn rates_at(table: &CsvTable, temperature: f64) -> Result<Vec<f64>, CalibrationError> {
    let temperatures = table
        .header()
        .iter()
        .map(|h| {
            h.parse::<f64>().map_err(|_| {
                CalibrationError::Format(format!("dark rate column '{h}' is not a temperature"))
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;
    if temperatures.is_empty() {
        return Err(CalibrationError::Format(
            "dark rate table lists no temperature".into(),
        ));
    }
    if temperatures.iter().tuple_windows().any(|(a, b)| b <= a) {
        return Err(CalibrationError::Format(
            "dark rate temperatures must increase".into(),
        ));
    }

    let (lower, upper, fraction) = bracket(&temperatures, temperature);
    (0..table.rows())
        .map(|r| {
            let row = table.row(r)?;
            if row.len() != temperatures.len() {
                return Err(CalibrationError::DimensionMismatch {
                    name: format!("DarkRate row {r}"),
                    expected: temperatures.len(),
                    actual: row.len(),
                });
            }
            Ok(row[lower] + fraction * (row[upper] - row[lower]))
        })
        .collect()
}

pub fn compute(
    profile: &Profile,
    data: &CalibrationData,
    resolver: &FileResolver,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    let mut source = CsvSource::from_profile(profile, "DarkRate", resolver)?;
    source.options.has_header = true;
    let table = source.load()?;
    if table.rows() != data.samples {
        return Err(CalibrationError::DimensionMismatch {
            name: "DarkRate".into(),
            expected: data.samples,
            actual: table.rows(),
        });
    }

    let temperature = data.fpa_temperature.average();
    let exposure = data.line_time() * f64::from(data.device.tdi);
    let dark: Vec<f64> = rates_at(&table, temperature)?
        .into_iter()
        .map(|rate| rate * exposure)
        .collect();

    let stats = Statistics::from_values(&dark);
    history.add(format!("BaseTemperature[{temperature:.4}]"));
    history.add(format!(
        "Statistics(Average[{:.10}],StdDev[{:.10}])",
        stats.average, stats.std_dev
    ));
    debug!("ZeroDarkRate = {history}");
    CorrectionVector::new(Tag::Zdr, dark, history, data)
}
