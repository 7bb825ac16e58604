//! # Calibration pipeline
//!
//! [`CalibrationContext`] runs every correction module once per image, in [`Tag::PROCESSING`]
//! order, and then applies the calibration equation line by line. It owns the image metadata and the
//! ten correction vectors; nothing is shared between images.
//!
//! ```text
//! hdn = (raw − Zb[line] − Zz[s] − Zd[s] − Zdr[s]) / Zg[line]
//! out = hdn · Zgg[s] · NLGain · Za[s] · Zt[s] / Ziof,    NLGain = 1 − Znl · mean(hdn)
//! ```
//!
//! The line index is clamped to the last good line when the image declares one, and `NLGain`
//! is only computed from the valid pixels of the line.
//!
//! See also
//! ------------
//! * [`CalibrationContext::history_report`] – textual dump of every module's history.
//! * [`CalibrationContext::radiometric_group`] – keywords written to the output label.

use std::fmt;

use log::{debug, info, warn};

use super::conf::{CalibrationConf, Profile};
use super::data::CalibrationData;
use super::drift_correct::DriftCorrect;
use super::filters::is_special;
use super::history::History;
use super::offset_correct::OffsetCorrect;
use super::unit_conversion::Units;
use super::{
    dark_rate, dark_subtract, drift_buffer, flat_field, gain, gain_line_drift, temp_gain,
    unit_conversion, CalibrationModule, CorrectionVector, Tag,
};
use crate::file_name::FileResolver;
use crate::label::Group;
use crate::planetcal_errors::CalibrationError;
use crate::time::now_utc;

pub const PROGRAM: &str = "planetcal";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const EQUATION: [&str; 4] = [
    "/* {program} application equation */",
    "/* hdn = (idn - ZeroBufferFit(ZeroBufferSmooth) - ZeroReverse - (ZeroDark OR ZeroDarkRate)) */",
    "/* odn = hdn / GainLineDrift * GainNonLinearity * GainChannelNormalize */",
    "/*           * GainFlatField  * GainTemperature / GainUnitConversion */",
];

/// Everything needed to calibrate one image.
#[derive(Debug, Clone)]
pub struct CalibrationContext {
    data: CalibrationData,
    vectors: Vec<CorrectionVector>,
    conf_source: String,
    units: String,
    run_time: String,
}

impl CalibrationContext {
    /// Run every calibration module for the image described by `data`.
    ///
    /// Arguments
    /// -----------------
    /// * `conf`: the configuration profiles.
    /// * `data`: image geometry, device and calibration pixels.
    /// * `resolver`: expands the file patterns of coefficient tables.
    ///
    /// Return
    /// ----------
    /// * The context, or the first configuration, format or dimension error of any module.
    pub fn new(
        conf: &CalibrationConf,
        data: CalibrationData,
        resolver: &FileResolver,
    ) -> Result<Self, CalibrationError> {
        data.validate()?;
        let mut slots: Vec<Option<CorrectionVector>> = vec![None; Tag::ALL.len()];
        let mut units = Units::default().to_string();
        let mut dark_fallback = false;

        for tag in Tag::PROCESSING {
            let vector = if tag == Tag::Zdr {
                let (vector, fallback) = dark_rate_vector(conf, &data, resolver)?;
                dark_fallback = fallback;
                vector
            } else {
                let profile = conf.module_profile(tag.module_name(), &data.device)?;
                let mut history = History::new();
                history.add(format!("Profile[{}]", profile.name));

                let forced = tag == Tag::Zd && dark_fallback;
                if profile.skip_module() && !forced {
                    let mut neutral = CorrectionVector::neutral(tag, history, &data);
                    if tag == Tag::Ziof {
                        units = "Unknown".to_string();
                        neutral.history_mut().add("Units[Unknown]");
                    }
                    neutral
                } else {
                    let vector = match tag {
                        Tag::Zf => drift_buffer::compute(&profile, &data, history)?,
                        Tag::Zb => {
                            let zf = slots[Tag::Zf.index()].as_ref().ok_or_else(|| {
                                CalibrationError::Configuration(
                                    "ZeroBufferFit needs ZeroBufferSmooth".into(),
                                )
                            })?;
                            DriftCorrect::compute(&profile, &data, zf, history)?
                        }
                        Tag::Zz => OffsetCorrect::compute(&profile, &data, history)?,
                        Tag::Zd => dark_subtract::compute(&profile, &data, resolver, history)?,
                        Tag::Zdr => dark_rate::compute(&profile, &data, resolver, history)?,
                        Tag::Zg => gain_line_drift::compute(&profile, &data, resolver, history)?,
                        Tag::Znl => gain::non_linearity(&profile, &data, resolver, history)?,
                        Tag::Zgg => gain::channel_normalize(&profile, &data, resolver, history)?,
                        Tag::Za => flat_field::compute(&profile, &data, resolver, history)?,
                        Tag::Zt => temp_gain::compute(&profile, &data, history)?,
                        Tag::Ziof => {
                            units = Units::from_profile(&profile)?.to_string();
                            unit_conversion::compute(&profile, &data, history)?
                        }
                    };
                    dump_module(&profile, &vector, resolver)?;
                    vector
                }
            };
            debug!("{} = {}", tag, vector.history());
            slots[tag.index()] = Some(vector);
        }

        info!(
            "calibration context ready for CCD {} channel {} ({} lines x {} samples, units {units})",
            data.device.ccd, data.device.channel, data.lines, data.samples
        );
        Ok(CalibrationContext {
            data,
            vectors: fill_slots(slots)?,
            conf_source: conf.source.clone().unwrap_or_default(),
            units,
            run_time: now_utc().unwrap_or_default(),
        })
    }

    /// Assemble a context from precomputed vectors, one per [`Tag`] in any order.
    pub fn from_vectors(
        data: CalibrationData,
        vectors: Vec<CorrectionVector>,
    ) -> Result<Self, CalibrationError> {
        let mut slots: Vec<Option<CorrectionVector>> = vec![None; Tag::ALL.len()];
        for vector in vectors {
            let expected = vector.tag().expected_len(&data);
            if vector.values().len() != expected {
                return Err(CalibrationError::DimensionMismatch {
                    name: vector.name().to_string(),
                    expected,
                    actual: vector.values().len(),
                });
            }
            let index = vector.tag().index();
            slots[index] = Some(vector);
        }
        Ok(CalibrationContext {
            vectors: fill_slots(slots)?,
            data,
            conf_source: String::new(),
            units: Units::default().to_string(),
            run_time: now_utc().unwrap_or_default(),
        })
    }

    pub fn data(&self) -> &CalibrationData {
        &self.data
    }

    pub fn vector(&self, tag: Tag) -> &CorrectionVector {
        &self.vectors[tag.index()]
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    /// Calibrate image line `line` (0-based).
    ///
    /// Special pixels are copied unchanged; a line without valid pixels is returned as is.
    pub fn calibrate_line(&self, line: usize, raw: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        if raw.len() != self.data.samples {
            return Err(CalibrationError::DimensionMismatch {
                name: "line samples".into(),
                expected: self.data.samples,
                actual: raw.len(),
            });
        }
        if line >= self.data.lines {
            return Err(CalibrationError::DimensionMismatch {
                name: "image lines".into(),
                expected: self.data.lines,
                actual: line + 1,
            });
        }
        let l = self.data.correction_line(line);

        let zb = self.vector(Tag::Zb).at(l);
        let zg = self.vector(Tag::Zg).at(l);
        let zz = self.vector(Tag::Zz);
        let zd = self.vector(Tag::Zd);
        let zdr = self.vector(Tag::Zdr);

        let mut out = raw.to_vec();
        let (mut sum, mut count) = (0.0, 0usize);
        for (s, value) in out.iter_mut().enumerate() {
            if !is_special(*value) {
                let hdn = (*value - zb - zz.at(s) - zd.at(s) - zdr.at(s)) / zg;
                sum += hdn;
                count += 1;
                *value = hdn;
            }
        }
        if count == 0 {
            return Ok(out);
        }

        let nl_gain = 1.0 - self.vector(Tag::Znl).at(0) * (sum / count as f64);
        let zgg = self.vector(Tag::Zgg);
        let za = self.vector(Tag::Za);
        let zt = self.vector(Tag::Zt);
        let ziof = self.vector(Tag::Ziof).at(0);
        for (s, value) in out.iter_mut().enumerate() {
            if !is_special(raw[s]) {
                *value = *value * zgg.at(s) * nl_gain * za.at(s) * zt.at(s) / ziof;
            }
        }
        Ok(out)
    }

    /// Calibrate every line of `image`.
    pub fn calibrate(&self, image: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, CalibrationError> {
        if image.len() != self.data.lines {
            return Err(CalibrationError::DimensionMismatch {
                name: "image lines".into(),
                expected: self.data.lines,
                actual: image.len(),
            });
        }
        image
            .iter()
            .enumerate()
            .map(|(line, raw)| self.calibrate_line(line, raw))
            .collect()
    }

    /// Program header, equation and the history of every module.
    pub fn history_report(&self) -> String {
        HistoryReport(self).to_string()
    }

    /// Keywords describing the calibration, for the output label.
    pub fn radiometric_group(&self) -> Group {
        let mut group = Group::new()
            .with("Program", &[PROGRAM])
            .with("RunTime", &[&self.run_time])
            .with("Version", &[VERSION])
            .with("Conf", &[&self.conf_source])
            .with("Units", &[&self.units]);
        for vector in &self.vectors {
            group.insert(vector.name(), vec![vector.history().to_string()]);
        }
        group
    }
}

/// One vector per [`Tag`], in [`Tag::ALL`] order.
fn fill_slots(
    slots: Vec<Option<CorrectionVector>>,
) -> Result<Vec<CorrectionVector>, CalibrationError> {
    Tag::ALL
        .iter()
        .zip(slots)
        .map(|(tag, slot)| {
            slot.ok_or_else(|| {
                CalibrationError::Configuration(format!("no correction vector for {tag}"))
            })
        })
        .collect()
}

/// Write the vector of a module whose profile names a `DumpModuleFile`.
fn dump_module(
    profile: &Profile,
    vector: &CorrectionVector,
    resolver: &FileResolver,
) -> Result<(), CalibrationError> {
    if !profile.exists("DumpModuleFile") {
        return Ok(());
    }
    let path = resolver.resolve(&profile.source("DumpModuleFile")?)?;
    vector.dump(&path)?;
    info!("{} written to {path}", vector.name());
    Ok(())
}

/// The `ZeroDarkRate` vector, and whether `ZeroDark` must run in its place.
///
/// A configuration without a `ZeroDarkRate` profile predates the module and gets a zero
/// vector. Enabling it together with `ZeroDark` is a configuration error. When the rates cannot
/// be built, `Fallback = TRUE` turns the failure into a zero vector and a forced `ZeroDark`.
fn dark_rate_vector(
    conf: &CalibrationConf,
    data: &CalibrationData,
    resolver: &FileResolver,
) -> Result<(CorrectionVector, bool), CalibrationError> {
    let name = Tag::Zdr.module_name();
    let zeros = |history| CorrectionVector::new(Tag::Zdr, vec![0.0; data.samples], history, data);

    if !conf.profile_exists(name) {
        let mut history = History::new();
        history.add(format!("Profile[{name}]"));
        history.add("Skipped, module not in config file");
        return Ok((zeros(history)?, false));
    }

    let profile = conf.module_profile(name, &data.device)?;
    let mut history = History::new();
    history.add(format!("Profile[{}]", profile.name));
    if profile.skip_module() {
        return Ok((CorrectionVector::neutral(Tag::Zdr, history, data), false));
    }

    let dark = Tag::Zd.module_name();
    if !conf.module_profile(dark, &data.device)?.skip_module() {
        return Err(CalibrationError::Configuration(format!(
            "{dark} and {name} are both enabled and would remove the dark current twice; \
             set Debug::SkipModule in one of them"
        )));
    }

    match dark_rate::compute(&profile, data, resolver, history.clone()) {
        Ok(vector) => {
            dump_module(&profile, &vector, resolver)?;
            Ok((vector, false))
        }
        Err(e) if profile.get_bool_or("Fallback", false)? => {
            warn!("{name} failed ({e}); falling back to {dark}");
            history.add(format!(
                "Debug::Unable to initialize {name} module. Falling back to {dark} implementation"
            ));
            Ok((zeros(history)?, true))
        }
        Err(e) => Err(e),
    }
}

struct HistoryReport<'a>(&'a CalibrationContext);

impl fmt::Display for HistoryReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.0;
        writeln!(f, "Program:  {PROGRAM}")?;
        writeln!(f, "RunTime:  {}", ctx.run_time)?;
        writeln!(f, "Version:  {VERSION}")?;
        writeln!(f)?;
        writeln!(f, "CONF:     {}", ctx.conf_source)?;
        writeln!(f)?;
        for line in EQUATION {
            writeln!(f, "{}", line.replace("{program}", PROGRAM))?;
        }
        writeln!(f)?;
        writeln!(f, "****** PARAMETER GENERATION HISTORY *******")?;
        for vector in &ctx.vectors {
            writeln!(f, "\n{}   = {}", vector.name(), vector.history())?;
        }
        Ok(())
    }
}
