//! # Segment construction: shared pieces
//!
//! Both the CK and the SPK builders follow the same shape:
//!
//! 1. read the cached table and validate its field count,
//! 2. move every sample into the frames the kernel is written for,
//! 3. pad one record at each end, `pad_epsilon` seconds outside the data,
//! 4. convert times to the kernel's native time system.
//!
//! This module holds the parts common to both: [`SegmentOptions`] and its builder,
//! [`expand`], the SPK interpolation degree rule and the label bookkeeping (segment id,
//! instrument, target, start/end offsets).
//!
//! # See also
//! ------------
//! * [`crate::spice::ck_segment`] – pointing segments.
//! * [`crate::spice::spk_segment`] – position segments.

use std::fmt::Write;

use camino::Utf8Path;

use crate::constants::{DEFAULT_PAD_EPSILON, DEFAULT_SPK_DEGREE, SEGMENT_KERNEL_TYPES};
use crate::label::Label;
use crate::planetcal_errors::CalibrationError;
use crate::time::{round_to_millis, utc_to_et};

/// Options shared by the CK and SPK builders.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOptions {
    /// Seconds between the first/last data sample and the padding records.
    pub pad_epsilon: f64,
    /// Extrapolate the padding records with the camera model instead of duplicating the ends.
    pub extrapolate: bool,
    /// Upper bound of the SPK interpolation degree.
    pub max_degree: usize,
    /// Kernel types furnished while a segment is built.
    pub kernel_types: String,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        SegmentOptions {
            pad_epsilon: DEFAULT_PAD_EPSILON,
            extrapolate: true,
            max_degree: DEFAULT_SPK_DEGREE,
            kernel_types: SEGMENT_KERNEL_TYPES.to_string(),
        }
    }
}

impl SegmentOptions {
    pub fn builder() -> SegmentOptionsBuilder {
        SegmentOptionsBuilder::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentOptionsBuilder {
    options: SegmentOptions,
}

impl SegmentOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: SegmentOptions::default(),
        }
    }

    pub fn pad_epsilon(mut self, v: f64) -> Self {
        self.options.pad_epsilon = v;
        self
    }
    pub fn extrapolate(mut self, v: bool) -> Self {
        self.options.extrapolate = v;
        self
    }
    pub fn max_degree(mut self, v: usize) -> Self {
        self.options.max_degree = v;
        self
    }
    pub fn kernel_types(mut self, v: &str) -> Self {
        self.options.kernel_types = v.to_string();
        self
    }

    /// Validate and return the options.
    pub fn build(self) -> Result<SegmentOptions, CalibrationError> {
        let o = &self.options;
        if !(o.pad_epsilon.is_finite() && o.pad_epsilon > 0.0) {
            return Err(CalibrationError::Configuration(
                "pad_epsilon must be finite and strictly positive".into(),
            ));
        }
        if o.max_degree < 1 {
            return Err(CalibrationError::Configuration(
                "max_degree must be at least 1".into(),
            ));
        }
        Ok(self.options)
    }
}

/// Copy the first element `ntop` times in front and the last `nbot` times behind.
pub fn expand<T: Clone>(ntop: usize, nbot: usize, values: &[T]) -> Vec<T> {
    let (Some(first), Some(last)) = (values.first(), values.last()) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(values.len() + ntop + nbot);
    out.extend(std::iter::repeat_n(first.clone(), ntop));
    out.extend_from_slice(values);
    out.extend(std::iter::repeat_n(last.clone(), nbot));
    out
}

/// Odd interpolation degree for `records` samples: `min(max_degree, records − 1)`, forced odd
/// and at least 1.
pub fn spk_degree(max_degree: usize, records: usize) -> usize {
    let degree = max_degree.min(records.saturating_sub(1)).max(1);
    ((degree - 1) / 2) * 2 + 1
}

/// Identification read from the label of the image a segment comes from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentSource {
    pub id: String,
    pub file_name: String,
    pub instrument_id: String,
    pub target: String,
    /// Label `StartTime`/`StopTime` as ephemeris time, when present.
    pub label_start: Option<f64>,
    pub label_stop: Option<f64>,
}

impl SegmentSource {
    /// Read ids and label times; missing values fall back to the file stem and `"UNKNOWN"`.
    pub fn from_label(label: &Label) -> Result<Self, CalibrationError> {
        let file_name = label.file_name.clone().unwrap_or_default();
        let id = label
            .keyword("Archive", "ProductId")
            .map(str::to_string)
            .unwrap_or_else(|| {
                Utf8Path::new(&file_name)
                    .file_stem()
                    .unwrap_or("")
                    .to_string()
            });
        let instrument_id = label
            .keyword("Instrument", "InstrumentId")
            .unwrap_or("UNKNOWN")
            .to_string();
        let target = label
            .keyword("Instrument", "TargetName")
            .unwrap_or("UNKNOWN")
            .to_string();
        let label_start = label
            .keyword("Instrument", "StartTime")
            .map(utc_to_et)
            .transpose()?;
        let label_stop = label
            .keyword("Instrument", "StopTime")
            .map(utc_to_et)
            .transpose()?;
        Ok(SegmentSource {
            id,
            file_name,
            instrument_id,
            target,
            label_start,
            label_stop,
        })
    }

    /// Offsets of the segment span against the label times, rounded to milliseconds.
    ///
    /// An offset inside the padding is reported as zero; otherwise its magnitude is returned.
    pub fn offsets(&self, start: f64, end: f64, pad_epsilon: f64) -> (f64, f64) {
        let start_offset = self
            .label_start
            .map(|s| round_to_millis(s - start))
            .map_or(0.0, |o| if o >= pad_epsilon { 0.0 } else { o.abs() });
        let end_offset = self
            .label_stop
            .map(|s| round_to_millis(s - end))
            .map_or(0.0, |o| if o <= pad_epsilon { 0.0 } else { o.abs() });
        (start_offset, end_offset)
    }
}

pub(crate) fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

/// Append the `Kernels:` listing used at the end of segment comments.
pub(crate) fn write_kernel_list(out: &mut String, kernels: &[String]) {
    if kernels.is_empty() {
        return;
    }
    let _ = writeln!(out, "  Kernels:    ");
    for k in kernels {
        let _ = writeln!(out, "    {k}");
    }
}

#[cfg(test)]
mod segment_test {
    use super::*;
    use crate::label::Group;

    #[test]
    fn test_expand() {
        assert_eq!(expand(1, 1, &[1, 2, 3]), vec![1, 1, 2, 3, 3]);
        assert_eq!(expand(2, 0, &[7]), vec![7, 7, 7]);
        assert!(expand::<i32>(1, 1, &[]).is_empty());
    }

    #[test]
    fn test_spk_degree() {
        assert_eq!(spk_degree(7, 100), 7);
        assert_eq!(spk_degree(8, 100), 7);
        assert_eq!(spk_degree(7, 5), 3);
        assert_eq!(spk_degree(7, 2), 1);
        assert_eq!(spk_degree(7, 1), 1);
        for max in 1..12 {
            for n in 1..20 {
                let d = spk_degree(max, n);
                assert_eq!(d % 2, 1);
                assert!(d >= 1);
                assert!(d <= max.min(n.saturating_sub(1)).max(1));
            }
        }
    }

    #[test]
    fn test_options_builder() {
        let opts = SegmentOptions::builder()
            .pad_epsilon(0.01)
            .extrapolate(false)
            .build()
            .unwrap();
        assert_eq!(opts.pad_epsilon, 0.01);
        assert!(!opts.extrapolate);
        assert_eq!(opts.max_degree, 7);

        assert!(SegmentOptions::builder().pad_epsilon(0.0).build().is_err());
        assert!(SegmentOptions::builder().max_degree(0).build().is_err());
    }

    #[test]
    fn test_source_from_label() {
        let label = Label::new().with_file_name("/data/PSP_001_RED5.cub").with_group(
            "Instrument",
            Group::new().with("InstrumentId", &["HIRISE"]),
        );
        let source = SegmentSource::from_label(&label).unwrap();
        assert_eq!(source.id, "PSP_001_RED5");
        assert_eq!(source.instrument_id, "HIRISE");
        assert_eq!(source.target, "UNKNOWN");
        assert_eq!(source.offsets(0.0, 1.0, 3e-3), (0.0, 0.0));
    }

    #[test]
    fn test_offsets() {
        let source = SegmentSource {
            label_start: Some(100.0),
            label_stop: Some(200.0),
            ..Default::default()
        };
        // padded span just outside the label times
        assert_eq!(source.offsets(99.997, 200.003, 3e-3), (0.0, 0.0));
        // data starts after the label start time
        assert_eq!(source.offsets(100.5, 199.0, 3e-3), (0.5, 1.0));
    }
}
