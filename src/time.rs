use hifitime::{Duration, Epoch, TimeScale};
use std::str::FromStr;

use crate::planetcal_errors::CalibrationError;

/// Convert ephemeris seconds past J2000 (TDB) into an ISO UTC string with millisecond precision.
///
/// Argument
/// --------
/// * `et`: ephemeris time in seconds past J2000
///
/// Return
/// ------
/// * a string formatted as `YYYY-MM-DDTHH:MM:SS.mmm`
pub fn et_to_utc(et: f64) -> String {
    let epoch = Epoch::from_et_seconds(et)
        .to_time_scale(TimeScale::UTC)
        .round(Duration::from_milliseconds(1.0));
    let (year, month, day, hour, minute, second, nanos) = epoch.to_gregorian_utc();
    let millis = nanos / 1_000_000;
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}")
}

/// Parse a UTC date string (`YYYY-MM-DDTHH:MM:SS[.fff]`) into ephemeris seconds past J2000.
///
/// Argument
/// --------
/// * `utc`: a UTC date string, as found in label `StartTime`/`StopTime` keywords
///
/// Return
/// ------
/// * the ephemeris time, or [`CalibrationError::InvalidTime`] if the string cannot be parsed
pub fn utc_to_et(utc: &str) -> Result<f64, CalibrationError> {
    let trimmed = utc.trim();
    let epoch =
        Epoch::from_str(trimmed).map_err(|_| CalibrationError::InvalidTime(trimmed.to_string()))?;
    Ok(epoch.to_et_seconds())
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmm`; `None` when the system clock is unavailable.
pub fn now_utc() -> Option<String> {
    Epoch::now().ok().map(|now| et_to_utc(now.to_et_seconds()))
}

/// Round a duration in seconds to the nearest millisecond.
pub fn round_to_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}
