//! # Detector gains
//!
//! Two scalar-per-device gain terms, both read from row `band` of a coefficient table:
//!
//! * [`non_linearity`] (`Znl`, module `GainNonLinearity`): the coefficient of the
//!   line-mean-dependent factor `1 − Znl · mean(hdn)` applied in the pixel phase.
//! * [`channel_normalize`] (`Zgg`, module `GainChannelNormalize`): the channel gain selected by
//!   column from the `Gains` table, scaled by `ModeNormalizer` and repeated for every sample.

use log::debug;

use super::conf::Profile;
use super::csv_reader::CsvSource;
use super::data::CalibrationData;
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::file_name::FileResolver;
use crate::planetcal_errors::CalibrationError;

/// Non-linearity coefficient of the device.
pub fn non_linearity(
    profile: &Profile,
    data: &CalibrationData,
    resolver: &FileResolver,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    let source = CsvSource::from_profile(profile, "NonLinearityGain", resolver)?;
    let band = data.device.band();
    let row = source.load_row("NonLinearityGain", band, 0)?;
    let gain = row.first().copied().ok_or_else(|| CalibrationError::DimensionMismatch {
        name: "NonLinearityGain".into(),
        expected: 1,
        actual: 0,
    })?;
    history.add(format!("NonLinearityGain[{gain}]"));
    debug!("GainNonLinearity = {history}");
    CorrectionVector::new(Tag::Znl, vec![gain], history, data)
}

/// Channel normalisation gain, repeated per sample.
pub fn channel_normalize(
    profile: &Profile,
    data: &CalibrationData,
    resolver: &FileResolver,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    let source = CsvSource::from_profile(profile, "Gains", resolver)?;
    let band = data.device.band();
    let gain = source.load()?.value(band, &source.column)?;
    let normalizer = profile.get_f64_or("ModeNormalizer", 1.0)?;
    history.add(format!(
        "Gains(Row[{band}],Column[{}],Gain[{gain}])",
        source.column
    ));
    history.add(format!("ModeNormalizer[{normalizer}]"));
    debug!("GainChannelNormalize = {history}");
    CorrectionVector::new(Tag::Zgg, vec![gain * normalizer; data.samples], history, data)
}

#[cfg(test)]
mod gain_test {
    use super::*;
    use crate::calibration::data::Device;
    use crate::calibration::CalibrationModule;
    use crate::label::Group;
    use camino::Utf8PathBuf;

    fn resolver(dir: &tempfile::TempDir) -> FileResolver {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        FileResolver::new().with_data_area("cal", root)
    }

    #[test]
    fn test_non_linearity_row() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nl.csv"), "1e-5\n2e-5\n3e-5\n").unwrap();
        let data = CalibrationData::new(2, 4, Device::new(1, 0, 128, 1), 100.0);
        let profile = Profile {
            name: "GainNonLinearity".into(),
            keywords: Group::new().with("NonLinearityGain", &["$cal/nl.csv"]),
        };
        let znl = non_linearity(&profile, &data, &resolver(&dir), History::new()).unwrap();
        assert_eq!(znl.values(), &[3e-5]);
    }

    #[test]
    fn test_channel_gain_by_tdi_column() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gains.csv"),
            "TDI8,TDI32,TDI64,TDI128\n1,2,3,4\n5,6,7,8\n",
        )
        .unwrap();
        let data = CalibrationData::new(2, 3, Device::new(0, 1, 64, 1), 100.0);
        let profile = Profile {
            name: "GainChannelNormalize".into(),
            keywords: Group::new()
                .with("TDI", &[64])
                .with("Gains", &["$cal/gains.csv"])
                .with("GainsHeader", &["TRUE"])
                .with("GainsColumnName", &["TDI{TDI}"])
                .with("ModeNormalizer", &[0.5]),
        };
        let zgg = channel_normalize(&profile, &data, &resolver(&dir), History::new()).unwrap();
        assert_eq!(zgg.values(), &[3.5, 3.5, 3.5]);
        assert!(zgg.history().contains("ModeNormalizer[0.5]"));
    }
}
