//! # Calibration inputs
//!
//! [`CalibrationData`] gathers what the correction modules read from an image besides the
//! configuration: geometry, the buffer and reverse-clock calibration pixels, the identity of the
//! detector that produced the image, exposure timing, focal-plane temperatures and the distance
//! to the Sun.
//!
//! It deserialises from JSON:
//!
//! ```json
//! {
//!   "lines": 1000, "samples": 1024,
//!   "device": { "ccd": 5, "channel": 0, "tdi": 128, "bin": 1 },
//!   "scan_exposure_duration": 99.9,
//!   "fpa_temperature": { "py": 19.5, "my": 20.1 },
//!   "sun_distance": 1.52,
//!   "buffer": [[1000.0, 1001.0]],
//!   "reverse_clock": [[980.0, 981.0]]
//! }
//! ```

use camino::Utf8Path;
use serde::Deserialize;

use crate::planetcal_errors::CalibrationError;

/// Detector identity used to select coefficients and option profiles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Device {
    pub ccd: u32,
    pub channel: u32,
    pub tdi: u32,
    pub bin: u32,
    /// Colour filter; derived from the CCD number when absent.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Device {
    pub fn new(ccd: u32, channel: u32, tdi: u32, bin: u32) -> Self {
        Device {
            ccd,
            channel,
            tdi,
            bin,
            filter: None,
        }
    }

    pub fn filter(&self) -> String {
        match &self.filter {
            Some(f) => f.clone(),
            None => match self.ccd {
                10 | 11 => "IR".to_string(),
                12 | 13 => "BG".to_string(),
                _ => "RED".to_string(),
            },
        }
    }

    /// Row of per-device coefficient tables: two channels per CCD.
    pub fn band(&self) -> usize {
        (self.ccd * 2 + self.channel) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct FpaTemperatures {
    pub py: f64,
    pub my: f64,
}

impl FpaTemperatures {
    pub fn average(&self) -> f64 {
        (self.py + self.my) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalibrationData {
    pub lines: usize,
    pub samples: usize,
    pub device: Device,
    /// Line integration time in microseconds.
    pub scan_exposure_duration: f64,
    #[serde(default)]
    pub fpa_temperature: FpaTemperatures,
    /// Sun distance in AU, needed for I/F output only.
    #[serde(default)]
    pub sun_distance: Option<f64>,
    /// Buffer pixels, one row per image line.
    #[serde(default)]
    pub buffer: Vec<Vec<f64>>,
    /// Reverse-clock pixels, one row per reverse-clock line, one column per image sample.
    #[serde(default)]
    pub reverse_clock: Vec<Vec<f64>>,
    /// Lines past this one (1-based) reuse its line corrections.
    #[serde(default)]
    pub last_good_line: Option<usize>,
}

impl CalibrationData {
    pub fn new(lines: usize, samples: usize, device: Device, scan_exposure_duration: f64) -> Self {
        CalibrationData {
            lines,
            samples,
            device,
            scan_exposure_duration,
            fpa_temperature: FpaTemperatures::default(),
            sun_distance: None,
            buffer: Vec::new(),
            reverse_clock: Vec::new(),
            last_good_line: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, CalibrationError> {
        let data: CalibrationData = serde_json::from_str(text)?;
        data.validate()?;
        Ok(data)
    }

    pub fn from_path(path: &Utf8Path) -> Result<Self, CalibrationError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Check the pixel blocks against the image geometry.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !self.buffer.is_empty() && self.buffer.len() != self.lines {
            return Err(CalibrationError::DimensionMismatch {
                name: "buffer lines".into(),
                expected: self.lines,
                actual: self.buffer.len(),
            });
        }
        if let Some(row) = self.reverse_clock.iter().find(|r| r.len() != self.samples) {
            return Err(CalibrationError::DimensionMismatch {
                name: "reverse clock samples".into(),
                expected: self.samples,
                actual: row.len(),
            });
        }
        if !(self.scan_exposure_duration.is_finite() && self.scan_exposure_duration > 0.0) {
            return Err(CalibrationError::Configuration(format!(
                "invalid scan exposure duration {}",
                self.scan_exposure_duration
            )));
        }
        Ok(())
    }

    /// Line time in seconds.
    pub fn line_time(&self) -> f64 {
        self.scan_exposure_duration * 1.0e-6
    }

    /// Time of every line relative to the first, in seconds.
    pub fn line_times(&self) -> Vec<f64> {
        let dt = self.line_time();
        (0..self.lines).map(|i| i as f64 * dt).collect()
    }

    /// Index of the line whose corrections apply to `line` (0-based).
    pub fn correction_line(&self, line: usize) -> usize {
        match self.last_good_line {
            Some(last) if last >= 1 => line.min(last - 1),
            _ => line,
        }
    }
}

#[cfg(test)]
mod data_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_json() {
        let data = CalibrationData::from_json(
            r#"{
                "lines": 2, "samples": 3,
                "device": { "ccd": 12, "channel": 1, "tdi": 64, "bin": 2 },
                "scan_exposure_duration": 100.0,
                "fpa_temperature": { "py": 20.0, "my": 22.0 },
                "buffer": [[1.0], [2.0]],
                "reverse_clock": [[1.0, 2.0, 3.0]]
            }"#,
        )
        .unwrap();
        assert_eq!(data.device.filter(), "BG");
        assert_eq!(data.device.band(), 25);
        assert_eq!(data.fpa_temperature.average(), 21.0);
        let times = data.line_times();
        assert_eq!(times.len(), 2);
        assert_relative_eq!(times[1], 1.0e-4, epsilon = 1e-18);
        assert_eq!(data.sun_distance, None);
    }

    #[test]
    fn test_dimension_checks() {
        let mut data = CalibrationData::new(3, 2, Device::new(0, 0, 128, 1), 80.0);
        data.buffer = vec![vec![1.0]; 2];
        assert_eq!(
            data.validate(),
            Err(CalibrationError::DimensionMismatch {
                name: "buffer lines".into(),
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_correction_line() {
        let mut data = CalibrationData::new(10, 2, Device::new(0, 0, 128, 1), 80.0);
        assert_eq!(data.correction_line(9), 9);
        data.last_good_line = Some(5);
        assert_eq!(data.correction_line(9), 4);
        assert_eq!(data.correction_line(2), 2);
    }
}
