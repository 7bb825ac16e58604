//! Line-dependent gain drift (`Zg`): `c0 + c1·t + c2·exp(c3·t)` at every line time, with the
//! coefficients read from row `band` of the `LineGainDrift` table.

use log::debug;

use super::conf::Profile;
use super::csv_reader::CsvSource;
use super::data::CalibrationData;
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::file_name::FileResolver;
use crate::planetcal_errors::CalibrationError;

pub fn gain_drift(c: &[f64; 4], t: f64) -> f64 {
    c[0] + c[1] * t + c[2] * (c[3] * t).exp()
}

pub fn compute(
    profile: &Profile,
    data: &CalibrationData,
    resolver: &FileResolver,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    let source = CsvSource::from_profile(profile, "LineGainDrift", resolver)?;
    let band = data.device.band();
    let row = source.load_row("LineGainDrift", band, 4)?;
    let coefficients = [row[0], row[1], row[2], row[3]];
    history.add(format!(
        "LineGainDrift(Row[{band}],Coefs[{},{},{},{}])",
        row[0], row[1], row[2], row[3]
    ));

    let gains: Vec<f64> = data
        .line_times()
        .into_iter()
        .map(|t| gain_drift(&coefficients, t))
        .collect();
    debug!("GainLineDrift = {history}");
    CorrectionVector::new(Tag::Zg, gains, history, data)
}

#[cfg(test)]
mod gain_line_drift_test {
    use super::*;
    use crate::calibration::data::Device;
    use crate::calibration::CalibrationModule;
    use crate::label::Group;
    use approx::assert_relative_eq;
    use camino::Utf8PathBuf;

    #[test]
    fn test_band_row() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("drift.csv"),
            "# c0,c1,c2,c3\n1,0,0,0\n1,0,0,0\n1,0,0,0\n1.0,1000.0,0.5,-2000.0\n",
        )
        .unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let resolver = FileResolver::new().with_data_area("cal", root);

        // ccd 1, channel 1 → row 3
        let data = CalibrationData::new(3, 2, Device::new(1, 1, 128, 1), 100.0);
        let profile = Profile {
            name: "GainLineDrift".into(),
            keywords: Group::new().with("LineGainDrift", &["$cal/drift.csv"]),
        };
        let zg = compute(&profile, &data, &resolver, History::new()).unwrap();
        assert_eq!(zg.values()[0], 1.5);
        let t: f64 = 2.0e-4;
        assert_relative_eq!(
            zg.values()[2],
            1.0 + 1000.0 * t + 0.5 * (-2000.0 * t).exp(),
            max_relative = 1e-12
        );
    }
}
