//! Temperature gain (`Zt`): `1 − FpaTemperatureFactor · (T − FpaReferenceTemperature)` for every
//! sample, with `T` the average focal-plane temperature.

use log::debug;

use super::conf::Profile;
use super::data::CalibrationData;
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::planetcal_errors::CalibrationError;

pub fn compute(
    profile: &Profile,
    data: &CalibrationData,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    let factor = profile.get_f64("FpaTemperatureFactor")?;
    let reference = profile.get_f64_or("FpaReferenceTemperature", 21.0)?;
    let temperature = data.fpa_temperature.average();
    let gain = 1.0 - factor * (temperature - reference);
    history.add(format!(
        "FpaTemperatureFactor[{factor}],FpaAverageTemperature[{temperature:.4}],FpaReferenceTemperature[{reference}]"
    ));
    history.add(format!("Correction[{gain:.6}]"));
    debug!("GainTemperature = {history}");
    CorrectionVector::new(Tag::Zt, vec![gain; data.samples], history, data)
}

#[cfg(test)]
mod temp_gain_test {
    use super::*;
    use crate::calibration::data::{Device, FpaTemperatures};
    use crate::calibration::CalibrationModule;
    use crate::label::Group;
    use approx::assert_relative_eq;

    #[test]
    fn test_temperature_gain() {
        let mut data = CalibrationData::new(2, 3, Device::new(0, 0, 128, 1), 100.0);
        data.fpa_temperature = FpaTemperatures { py: 22.0, my: 24.0 };
        let profile = Profile {
            name: "GainTemperature".into(),
            keywords: Group::new().with("FpaTemperatureFactor", &[0.01]),
        };
        let zt = compute(&profile, &data, History::new()).unwrap();
        assert_eq!(zt.values().len(), 3);
        assert_relative_eq!(zt.values()[1], 0.98);
    }

    #[test]
    fn test_factor_required() {
        let data = CalibrationData::new(2, 3, Device::new(0, 0, 128, 1), 100.0);
        assert!(matches!(
            compute(&Profile::default(), &data, History::new()),
            Err(CalibrationError::Configuration(_))
        ));
    }
}
