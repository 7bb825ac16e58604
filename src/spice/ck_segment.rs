//! # CK segments
//!
//! Builds a pointing [`CkSegment`] from the cached `InstrumentPointing` table of an image.
//!
//! ## Algorithm
//!
//! 1. Validate the table: 8 fields (quaternion, angular velocity, time) or 5 fields
//!    (quaternion, time), with non-decreasing times.
//! 2. Read `TimeDependentFrames` from the table keywords. Without it the frame chain the cache
//!    was recorded in is unknown and the build fails with a configuration error.
//! 3. Pad one sample `pad_epsilon` seconds before the first and after the last record, either by
//!    camera extrapolation or by duplicating the end samples.
//! 4. For every sample compute `left · xform(q, av) · right`, where `left` maps the recorded
//!    "to" frame onto the CK frame and `right` maps the CK reference frame onto the recorded
//!    "from" frame, then split the product back into quaternion and angular velocity.
//! 5. Convert the padded ephemeris times to spacecraft clock ticks and derive the tick rate.
//!
//! The kernels listed in [`SegmentOptions::kernel_types`] are furnished for the duration of the
//! build only.

use std::fmt::Write;

use log::info;
use nalgebra::{Vector3, Vector4};

use super::camera::{CameraModel, PointingRecord};
use super::frame_transform::{chain_state_transform, frame_chains, m2q, q2m, rav2xf, xf2rav};
use super::kernel_catalog::KernelCatalog;
use super::kernel_type::TypeFilter;
use super::segment::{expand, write_kernel_list, yes_no, SegmentOptions, SegmentSource};
use crate::label::{CachedTable, Label};
use crate::planetcal_errors::CalibrationError;
use crate::time::et_to_utc;

/// A padded, frame-corrected pointing segment.
#[derive(Debug, Clone, PartialEq)]
pub struct CkSegment {
    source: SegmentSource,
    instrument_code: i32,
    instrument_frame: String,
    reference_frame: String,
    quaternions: Vec<Vector4<f64>>,
    angular_velocities: Option<Vec<Vector3<f64>>>,
    times: Vec<f64>,
    ephemeris_times: Vec<f64>,
    tick_rate: f64,
    start_offset: f64,
    end_offset: f64,
    camera_version: i32,
    kernels: Vec<String>,
}

impl CkSegment {
    pub fn id(&self) -> &str {
        &self.source.id
    }

    pub fn instrument_code(&self) -> i32 {
        self.instrument_code
    }

    pub fn instrument_frame(&self) -> &str {
        &self.instrument_frame
    }

    pub fn reference_frame(&self) -> &str {
        &self.reference_frame
    }

    pub fn quaternions(&self) -> &[Vector4<f64>] {
        &self.quaternions
    }

    pub fn angular_velocities(&self) -> Option<&[Vector3<f64>]> {
        self.angular_velocities.as_deref()
    }

    pub fn has_angular_velocity(&self) -> bool {
        self.angular_velocities.is_some()
    }

    /// Spacecraft clock ticks, one per quaternion.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Ephemeris times, one per quaternion.
    pub fn ephemeris_times(&self) -> &[f64] {
        &self.ephemeris_times
    }

    pub fn start_time(&self) -> f64 {
        self.ephemeris_times.first().copied().unwrap_or_default()
    }

    pub fn end_time(&self) -> f64 {
        self.ephemeris_times.last().copied().unwrap_or_default()
    }

    /// Seconds per spacecraft clock tick at the first sample.
    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    pub fn end_offset(&self) -> f64 {
        self.end_offset
    }

    pub fn len(&self) -> usize {
        self.quaternions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quaternions.is_empty()
    }

    /// CK data type a writer should use: 2 with angular velocities, 3 without.
    pub fn ck_type(&self) -> i32 {
        if self.has_angular_velocity() {
            2
        } else {
            3
        }
    }

    /// Human-readable description written into the kernel comment area.
    pub fn comment(&self) -> String {
        let mut c = String::new();
        let _ = writeln!(
            c,
            "\n-----------------------------------------------------------------------"
        );
        let _ = writeln!(c, "  File:       {}", self.source.file_name);
        let _ = writeln!(c, "  ProductId:  {}", self.source.id);
        let _ = writeln!(c, "  StartTime:  {}", et_to_utc(self.start_time()));
        let _ = writeln!(c, "  EndTime:    {}", et_to_utc(self.end_time()));
        let _ = writeln!(c, "  Instrument: {}", self.source.instrument_id);
        let _ = writeln!(c, "  Target:     {}", self.source.target);
        let _ = writeln!(
            c,
            "  InstFrame:  {} ({})",
            self.instrument_frame, self.instrument_code
        );
        let _ = writeln!(c, "  RefFrame:   {}", self.reference_frame);
        let _ = writeln!(c, "  Records:    {}", self.len());
        if self.start_offset != 0.0 {
            let _ = writeln!(c, "  StartOffset: {}", self.start_offset);
        }
        if self.end_offset != 0.0 {
            let _ = writeln!(c, "  EndOffset: {}", self.end_offset);
        }
        let _ = writeln!(c, "  HasAV:      {}", yes_no(self.has_angular_velocity()));
        let _ = writeln!(c, "  CamVersion: {}", self.camera_version);
        write_kernel_list(&mut c, &self.kernels);
        c
    }
}

/// Builds [`CkSegment`]s from a cached pointing table.
#[derive(Debug, Clone)]
pub struct CkSegmentBuilder {
    options: SegmentOptions,
    table_name: String,
}

impl Default for CkSegmentBuilder {
    fn default() -> Self {
        Self::new(SegmentOptions::default())
    }
}

impl CkSegmentBuilder {
    pub fn new(options: SegmentOptions) -> Self {
        CkSegmentBuilder {
            options,
            table_name: "InstrumentPointing".to_string(),
        }
    }

    pub fn with_table_name(mut self, name: &str) -> Self {
        self.table_name = name.to_string();
        self
    }

    /// Build the segment for one image.
    ///
    /// Arguments
    /// -----------------
    /// * `catalog`: kernels referenced by the image; the configured types are furnished while
    ///   the segment is built and released afterwards.
    /// * `camera`: NAIF ids and extrapolation model of the instrument.
    /// * `label`: the image label holding the cached pointing table.
    ///
    /// Return
    /// ----------
    /// * The segment, or a configuration / format / frame resolution error.
    pub fn build(
        &self,
        catalog: &KernelCatalog<'_>,
        camera: &dyn CameraModel,
        label: &Label,
    ) -> Result<CkSegment, CalibrationError> {
        let source = SegmentSource::from_label(label)?;
        let table = label.table(&self.table_name).ok_or_else(|| {
            CalibrationError::Configuration(format!("label has no {} table", self.table_name))
        })?;
        let records = load_pointing(table)?;
        let recorded_frames = time_dependent_frames(table)?;

        let loaded = catalog.load_scoped(TypeFilter::parse(&self.options.kernel_types));
        let pool = loaded.pool();

        let left_id = camera.ck_frame_id();
        let right_id = camera.ck_reference_id();
        let chains = frame_chains(&recorded_frames, left_id, right_id)?;
        let instrument_frame = pool.frame_name(left_id)?;
        let reference_frame = pool.frame_name(right_id)?;

        let padded = self.pad(camera, &records)?;
        let has_av = records[0].angular_velocity.is_some();

        let mut quaternions = Vec::with_capacity(padded.len());
        let mut angular_velocities = Vec::with_capacity(padded.len());
        for record in &padded {
            let left = chain_state_transform(pool, &chains.left, left_id, record.et)?;
            let right = chain_state_transform(pool, &chains.right, right_id, record.et)?;
            let av = record.angular_velocity.unwrap_or_else(Vector3::zeros);
            let xform = left * rav2xf(&q2m(&record.quaternion), &av) * right;
            let (rot, av) = xf2rav(&xform);
            quaternions.push(m2q(&rot));
            angular_velocities.push(av);
        }

        let ephemeris_times: Vec<f64> = padded.iter().map(|r| r.et).collect();
        let sclk_code = camera.sclk_code();
        let times = ephemeris_times
            .iter()
            .map(|et| pool.et_to_sclk(sclk_code, *et))
            .collect::<Result<Vec<f64>, _>>()?;
        let first_tick = times[1];
        let tick_rate = (pool.sclk_to_et(sclk_code, first_tick + 1.0)?
            - pool.sclk_to_et(sclk_code, first_tick)?)
        .abs();

        let start = ephemeris_times[0];
        let end = ephemeris_times[ephemeris_times.len() - 1];
        let (start_offset, end_offset) = source.offsets(start, end, self.options.pad_epsilon);

        info!(
            "CK segment {}: {} records, {} -> {}, AV {}",
            source.id,
            quaternions.len(),
            instrument_frame,
            reference_frame,
            yes_no(has_av)
        );

        Ok(CkSegment {
            kernels: loaded.paths(TypeFilter::all(), false),
            camera_version: loaded.camera_version(),
            source,
            instrument_code: left_id,
            instrument_frame,
            reference_frame,
            quaternions,
            angular_velocities: has_av.then_some(angular_velocities),
            times,
            ephemeris_times,
            tick_rate,
            start_offset,
            end_offset,
        })
    }

    fn pad(
        &self,
        camera: &dyn CameraModel,
        records: &[PointingRecord],
    ) -> Result<Vec<PointingRecord>, CalibrationError> {
        let eps = self.options.pad_epsilon;
        let first_et = records[0].et - eps;
        let last_et = records[records.len() - 1].et + eps;

        if !self.options.extrapolate {
            let mut padded = expand(1, 1, records);
            let n = padded.len();
            padded[0].et = first_et;
            padded[n - 1].et = last_et;
            return Ok(padded);
        }

        let no_model =
            || CalibrationError::Format("camera cannot extrapolate the pointing cache".into());
        let head = camera
            .extrapolate_pointing(records, first_et)
            .ok_or_else(no_model)?;
        let tail = camera
            .extrapolate_pointing(records, last_et)
            .ok_or_else(no_model)?;

        let mut padded = Vec::with_capacity(records.len() + 2);
        padded.push(PointingRecord {
            et: first_et,
            ..head
        });
        padded.extend_from_slice(records);
        padded.push(PointingRecord {
            et: last_et,
            ..tail
        });
        Ok(padded)
    }
}

/// Read and validate the pointing records of a cached table.
pub fn load_pointing(table: &CachedTable) -> Result<Vec<PointingRecord>, CalibrationError> {
    if table.records.is_empty() {
        return Err(CalibrationError::Format(format!(
            "table {} has no records",
            table.name
        )));
    }
    let fields = table.field_count().ok_or_else(|| {
        CalibrationError::Format(format!("table {} has ragged records", table.name))
    })?;
    if fields != 8 && fields != 5 {
        return Err(CalibrationError::Format(format!(
            "table {} must have 8 (with angular velocities) or 5 fields but has {fields}",
            table.name
        )));
    }

    let records: Vec<PointingRecord> = table
        .records
        .iter()
        .map(|r| PointingRecord {
            quaternion: Vector4::new(r[0], r[1], r[2], r[3]),
            angular_velocity: (fields == 8).then(|| Vector3::new(r[4], r[5], r[6])),
            et: r[fields - 1],
        })
        .collect();

    if let Some(w) = records.windows(2).find(|w| w[1].et <= w[0].et) {
        return Err(CalibrationError::Format(format!(
            "table {} times are not strictly increasing ({} then {})",
            table.name, w[0].et, w[1].et
        )));
    }
    Ok(records)
}

/// Frame ids recorded with the cache, from the "to" frame down to the "from" frame.
pub fn time_dependent_frames(table: &CachedTable) -> Result<Vec<i32>, CalibrationError> {
    let values = table.keywords.get("TimeDependentFrames").ok_or_else(|| {
        CalibrationError::Configuration(format!(
            "table {} has no TimeDependentFrames keyword; the image must be re-initialized",
            table.name
        ))
    })?;
    values
        .iter()
        .map(|v| {
            v.trim().parse::<i32>().map_err(|_| {
                CalibrationError::Format(format!("invalid TimeDependentFrames id {v}"))
            })
        })
        .collect()
}
