//! # Output units (`Ziof`)
//!
//! The last divisor of the calibration equation, selected by the `Units` keyword:
//!
//! | `Units` | divisor |
//! |---|---|
//! | `DN` | 1 |
//! | `DN/US` | scan exposure duration (µs) |
//! | `IOF` | `sed · 1e-6 · bin² · FilterGainCorrection · (1 + QEpercentincreaseperC · ΔT · AbsGain) / SunDist²` |
//!
//! with `ΔT` the average FPA temperature minus `FpaReferenceTemperature` and `SunDist` the sun
//! distance in AU.

use std::fmt;
use std::str::FromStr;

use log::debug;

use super::conf::Profile;
use super::data::CalibrationData;
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::planetcal_errors::CalibrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    #[default]
    Dn,
    DnPerMicrosecond,
    Iof,
}

impl FromStr for Units {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DN" => Ok(Units::Dn),
            "DN/US" => Ok(Units::DnPerMicrosecond),
            "IOF" => Ok(Units::Iof),
            other => Err(CalibrationError::Configuration(format!(
                "unknown output units {other}; expected DN, DN/US or IOF"
            ))),
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Units::Dn => "DN",
            Units::DnPerMicrosecond => "DN/US",
            Units::Iof => "IOF",
        })
    }
}

impl Units {
    /// The `Units` keyword of a profile, `DN` when absent.
    pub fn from_profile(profile: &Profile) -> Result<Self, CalibrationError> {
        profile.keywords.first("Units").map_or(Ok(Units::Dn), str::parse)
    }
}

/// Divisor converting DN into `units`.
///
/// Arguments
/// -----------------
/// * `units`: requested output units.
/// * `profile`: supplies `FilterGainCorrection`, `QEpercentincreaseperC`, `AbsGain` and
///   `FpaReferenceTemperature` for I/F.
/// * `data`: exposure, binning, temperatures and sun distance.
///
/// Return
/// ----------
/// * The divisor, or [`CalibrationError::Configuration`] when an I/F input is missing.
pub fn divisor(
    units: Units,
    profile: &Profile,
    data: &CalibrationData,
    history: &mut History,
) -> Result<f64, CalibrationError> {
    let sed = data.scan_exposure_duration;
    match units {
        Units::Dn => Ok(1.0),
        Units::DnPerMicrosecond => {
            history.add(format!("ScanExposureDuration[{sed}]"));
            Ok(sed)
        }
        Units::Iof => {
            let sun_distance = data.sun_distance.ok_or_else(|| {
                CalibrationError::Configuration("I/F output needs the sun distance".into())
            })?;
            if sun_distance <= 0.0 {
                return Err(CalibrationError::Configuration(format!(
                    "invalid sun distance {sun_distance}"
                )));
            }
            let gain_correction = profile.get_f64("FilterGainCorrection")?;
            let qe_increase = profile.get_f64_or("QEpercentincreaseperC", 0.0)?;
            let abs_gain = profile.get_f64_or("AbsGain", 1.0)?;
            let reference = profile.get_f64_or("FpaReferenceTemperature", 21.0)?;
            let delta_t = data.fpa_temperature.average() - reference;
            let bin = f64::from(data.device.bin);
            let qe = 1.0 + qe_increase * delta_t * abs_gain;

            history.add(format!(
                "ScanExposureDuration[{sed}],Bin[{}],FilterGainCorrection[{gain_correction}]",
                data.device.bin
            ));
            history.add(format!(
                "QEpercentincreaseperC[{qe_increase}],AbsGain[{abs_gain}],DeltaFpaTemperature[{delta_t:.4}]"
            ));
            history.add(format!("SunDist[{sun_distance}]"));
            Ok(sed * 1.0e-6 * bin * bin * gain_correction * qe / (sun_distance * sun_distance))
        }
    }
}

pub fn compute(
    profile: &Profile,
    data: &CalibrationData,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    let units = Units::from_profile(profile)?;
    history.add(format!("Units[{units}]"));
    let value = divisor(units, profile, data, &mut history)?;
    history.add(format!("Ziof[{value:.6e}]"));
    debug!("GainUnitConversion = {history}");
    CorrectionVector::new(Tag::Ziof, vec![value], history, data)
}

#[cfg(test)]
mod unit_conversion_test {
    use super::*;
    use crate::calibration::data::{Device, FpaTemperatures};
    use crate::calibration::CalibrationModule;
    use crate::label::Group;
    use approx::assert_relative_eq;

    fn profile(units: &str) -> Profile {
        Profile {
            name: "GainUnitConversion".into(),
            keywords: Group::new()
                .with("Units", &[units])
                .with("FilterGainCorrection", &[2.0])
                .with("QEpercentincreaseperC", &[0.1])
                .with("AbsGain", &[0.5]),
        }
    }

    #[test]
    fn test_units() {
        let mut data = CalibrationData::new(1, 1, Device::new(0, 0, 128, 2), 80.0);
        data.fpa_temperature = FpaTemperatures { py: 23.0, my: 23.0 };
        data.sun_distance = Some(2.0);

        let dn = compute(&profile("DN"), &data, History::new()).unwrap();
        assert_eq!(dn.values(), &[1.0]);
        let dnus = compute(&profile("dn/us"), &data, History::new()).unwrap();
        assert_eq!(dnus.values(), &[80.0]);

        let iof = compute(&profile("IOF"), &data, History::new()).unwrap();
        // 80e-6 · 4 · 2 · (1 + 0.1·2·0.5) / 4
        assert_relative_eq!(iof.values()[0], 80.0e-6 * 4.0 * 2.0 * 1.1 / 4.0, max_relative = 1e-12);
    }

    #[test]
    fn test_errors() {
        let data = CalibrationData::new(1, 1, Device::new(0, 0, 128, 1), 80.0);
        assert!(matches!(
            compute(&profile("IOF"), &data, History::new()),
            Err(CalibrationError::Configuration(_))
        ));
        assert!("RADIANCE".parse::<Units>().is_err());
        assert_eq!(Units::from_profile(&Profile::default()).unwrap(), Units::Dn);
    }
}
