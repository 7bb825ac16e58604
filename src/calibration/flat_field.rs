//! Flat field (`Za`): the per-sample response read from the selected column of the `Flats` table.

use log::debug;

use super::conf::Profile;
use super::csv_reader::CsvSource;
use super::data::CalibrationData;
use super::history::History;
use super::{CorrectionVector, Tag};
use crate::file_name::FileResolver;
use crate::planetcal_errors::CalibrationError;

pub fn compute(
    profile: &Profile,
    data: &CalibrationData,
    resolver: &FileResolver,
    mut history: History,
) -> Result<CorrectionVector, CalibrationError> {
    let source = CsvSource::from_profile(profile, "Flats", resolver)?;
    let flats = source.load_column("Flats", data.samples)?;
    history.add(format!("Flats[{},Column[{}]]", source.path, source.column));
    debug!("GainFlatField = {history}");
    CorrectionVector::new(Tag::Za, flats, history, data)
}

#[cfg(test)]
mod flat_field_test {
    use super::*;
    use crate::calibration::data::Device;
    use crate::calibration::CalibrationModule;
    use crate::label::Group;
    use camino::Utf8PathBuf;

    #[test]
    fn test_flat_column() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("flat_RED3_1.csv"),
            "# sample, flat, sigma\n0, 0.98, 0.01\n1, 1.02, 0.01\n",
        )
        .unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let resolver = FileResolver::new().with_data_area("cal", root);

        let data = CalibrationData::new(5, 2, Device::new(3, 1, 128, 1), 100.0);
        let profile = Profile {
            name: "GainFlatField".into(),
            keywords: Group::new()
                .with("CCD", &[3])
                .with("CHANNEL", &[1])
                .with("FILTER", &["RED"])
                .with("Flats", &["$cal/flat_{FILTER}{CCD}_{CHANNEL}.csv"])
                .with("FlatsColumnIndex", &[1]),
        };
        let za = compute(&profile, &data, &resolver, History::new()).unwrap();
        assert_eq!(za.values(), &[0.98, 1.02]);
    }
}
