//! # SPK segments
//!
//! Builds a position [`SpkSegment`] from the cached `InstrumentPosition` table of an image.
//!
//! The cache holds one row per sample: `x, y, z, vx, vy, vz, et` (7 fields) or `x, y, z, et`
//! (4 fields), expressed in J2000. Each state is rotated into the SPK reference frame of the
//! camera, one padding state is added at each end, and the interpolation degree is chosen from
//! the number of records.

use std::fmt::Write;

use log::info;
use nalgebra::{Matrix3, Vector3, Vector6};

use super::camera::{CameraModel, StateRecord};
use super::frame_transform::compute_state_transform;
use super::kernel_catalog::KernelCatalog;
use super::kernel_type::TypeFilter;
use super::segment::{
    expand, spk_degree, write_kernel_list, yes_no, SegmentOptions, SegmentSource,
};
use crate::constants::J2000_FRAME_ID;
use crate::label::{CachedTable, Label};
use crate::planetcal_errors::CalibrationError;
use crate::time::et_to_utc;

#[derive(Debug, Clone, PartialEq)]
pub struct SpkSegment {
    source: SegmentSource,
    body_code: i32,
    center_code: i32,
    reference_frame: String,
    states: Vec<Vector6<f64>>,
    has_velocity: bool,
    ephemeris_times: Vec<f64>,
    degree: usize,
    start_offset: f64,
    end_offset: f64,
    camera_version: i32,
    kernels: Vec<String>,
}

impl SpkSegment {
    pub fn id(&self) -> &str {
        &self.source.id
    }

    pub fn body_code(&self) -> i32 {
        self.body_code
    }

    pub fn center_code(&self) -> i32 {
        self.center_code
    }

    pub fn reference_frame(&self) -> &str {
        &self.reference_frame
    }

    /// Position and velocity per sample; the velocity half is zero when the cache had none.
    pub fn states(&self) -> &[Vector6<f64>] {
        &self.states
    }

    pub fn has_velocity(&self) -> bool {
        self.has_velocity
    }

    pub fn ephemeris_times(&self) -> &[f64] {
        &self.ephemeris_times
    }

    pub fn start_time(&self) -> f64 {
        self.ephemeris_times.first().copied().unwrap_or_default()
    }

    pub fn end_time(&self) -> f64 {
        self.ephemeris_times.last().copied().unwrap_or_default()
    }

    /// Odd Lagrange/Hermite interpolation degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    pub fn end_offset(&self) -> f64 {
        self.end_offset
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// SPK data type a writer should use: 13 (Hermite) with velocities, 9 (Lagrange) without.
    pub fn spk_type(&self) -> i32 {
        if self.has_velocity {
            13
        } else {
            9
        }
    }

    pub fn comment(&self) -> String {
        let mut c = String::new();
        let _ = writeln!(
            c,
            "\n-----------------------------------------------------------------------"
        );
        let _ = writeln!(c, "  File:        {}", self.source.file_name);
        let _ = writeln!(c, "  ProductId:   {}", self.source.id);
        let _ = writeln!(c, "  StartTime:   {}", et_to_utc(self.start_time()));
        let _ = writeln!(c, "  EndTime:     {}", et_to_utc(self.end_time()));
        let _ = writeln!(c, "  Instrument:  {}", self.source.instrument_id);
        let _ = writeln!(c, "  Target:      {}", self.source.target);
        let _ = writeln!(c, "  Body:        {}", self.body_code);
        let _ = writeln!(c, "  Center:      {}", self.center_code);
        let _ = writeln!(c, "  RefFrame:    {}", self.reference_frame);
        let _ = writeln!(c, "  Records:     {}", self.len());
        let _ = writeln!(c, "  Degree:      {}", self.degree);
        if self.start_offset != 0.0 {
            let _ = writeln!(c, "  StartOffset: {}", self.start_offset);
        }
        if self.end_offset != 0.0 {
            let _ = writeln!(c, "  EndOffset:   {}", self.end_offset);
        }
        let _ = writeln!(c, "  HasVelocity: {}", yes_no(self.has_velocity));
        let _ = writeln!(c, "  CamVersion:  {}", self.camera_version);
        write_kernel_list(&mut c, &self.kernels);
        c
    }
}

#[derive(Debug, Clone)]
pub struct SpkSegmentBuilder {
    options: SegmentOptions,
    table_name: String,
}

impl Default for SpkSegmentBuilder {
    fn default() -> Self {
        Self::new(SegmentOptions::default())
    }
}

impl SpkSegmentBuilder {
    pub fn new(options: SegmentOptions) -> Self {
        SpkSegmentBuilder {
            options,
            table_name: "InstrumentPosition".to_string(),
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
    /// * `catalog`: kernels referenced by the image, furnished for the duration of the build.
    /// * `camera`: supplies the target, center and reference frame ids.
    /// * `label`: the image label holding the cached position table.
    ///
    /// Return
    /// ----------
    /// * The segment, or the first configuration / format / frame resolution error.
    pub fn build(
        &self,
        catalog: &KernelCatalog<'_>,
        camera: &dyn CameraModel,
        label: &Label,
    ) -> Result<SpkSegment, CalibrationError> {
        let source = SegmentSource::from_label(label)?;
        let table = label.table(&self.table_name).ok_or_else(|| {
            CalibrationError::Configuration(format!("label has no {} table", self.table_name))
        })?;
        let records = load_states(table)?;

        let loaded = catalog.load_scoped(TypeFilter::parse(&self.options.kernel_types));
        let pool = loaded.pool();

        let cache_frame = pool.frame_name(J2000_FRAME_ID)?;
        let reference_frame = pool.frame_name(camera.spk_reference_id())?;
        let has_velocity = records[0].velocity.is_some();

        let padded = self.pad(camera, &records)?;
        let mut states = Vec::with_capacity(padded.len());
        for record in &padded {
            let xform = compute_state_transform(pool, &cache_frame, &reference_frame, record.et)?;
            let state = match record.velocity {
                Some(v) => xform * Vector6::new(
                    record.position.x,
                    record.position.y,
                    record.position.z,
                    v.x,
                    v.y,
                    v.z,
                ),
                None => {
                    let rot: Matrix3<f64> = xform.fixed_view::<3, 3>(0, 0).into_owned();
                    let p = rot * record.position;
                    Vector6::new(p.x, p.y, p.z, 0.0, 0.0, 0.0)
                }
            };
            states.push(state);
        }

        let ephemeris_times: Vec<f64> = padded.iter().map(|r| r.et).collect();
        let start = ephemeris_times[0];
        let end = ephemeris_times[ephemeris_times.len() - 1];
        let (start_offset, end_offset) = source.offsets(start, end, self.options.pad_epsilon);
        let degree = spk_degree(self.options.max_degree, states.len());

        info!(
            "SPK segment {}: {} records, body {} wrt {} in {}, degree {degree}",
            source.id,
            states.len(),
            camera.spk_target_id(),
            camera.spk_center_id(),
            reference_frame
        );

        Ok(SpkSegment {
            kernels: loaded.paths(TypeFilter::all(), false),
            camera_version: loaded.camera_version(),
            source,
            body_code: camera.spk_target_id(),
            center_code: camera.spk_center_id(),
            reference_frame,
            states,
            has_velocity,
            ephemeris_times,
            degree,
            start_offset,
            end_offset,
        })
    }

    fn pad(
        &self,
        camera: &dyn CameraModel,
        records: &[StateRecord],
    ) -> Result<Vec<StateRecord>, CalibrationError> {
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
            || CalibrationError::Format("camera cannot extrapolate the position cache".into());
        let head = camera
            .extrapolate_state(records, first_et)
            .ok_or_else(no_model)?;
        let tail = camera
            .extrapolate_state(records, last_et)
            .ok_or_else(no_model)?;

        let mut padded = Vec::with_capacity(records.len() + 2);
        padded.push(head);
        padded.extend_from_slice(records);
        padded.push(tail);
        Ok(padded)
    }
}

/// Read and validate the state records of a cached position table.
pub fn load_states(table: &CachedTable) -> Result<Vec<StateRecord>, CalibrationError> {
    if table.records.is_empty() {
        return Err(CalibrationError::Format(format!(
            "table {} has no records",
            table.name
        )));
    }
    let fields = table.field_count().ok_or_else(|| {
        CalibrationError::Format(format!("table {} has ragged records", table.name))
    })?;
    if fields != 7 && fields != 4 {
        return Err(CalibrationError::Format(format!(
            "table {} must have 7 (with velocities) or 4 fields but has {fields}",
            table.name
        )));
    }

    let records: Vec<StateRecord> = table
        .records
        .iter()
        .map(|r| StateRecord {
            position: Vector3::new(r[0], r[1], r[2]),
            velocity: (fields == 7).then(|| Vector3::new(r[3], r[4], r[5])),
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
