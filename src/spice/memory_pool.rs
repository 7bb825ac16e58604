//! In-memory kernel pool.
//!
//! [`MemoryKernelPool`] implements [`KernelPool`] without any NAIF library: furnished kernels are
//! kept in a list, frames are a small graph of [`FrameRelation`] edges and spacecraft clocks are
//! linear [`SclkModel`]s. Every furnish, unload and transform request is appended to a call log,
//! so callers can assert exactly what reached the pool.
//!
//! Frame lookups walk the relation graph breadth-first; every edge can be traversed in both
//! directions (the reverse edge uses the inverse transform), and `from == to` is the identity.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::{Matrix3, Matrix6, Rotation3, Unit, Vector3};

use super::frame_transform::{cross_matrix, invert_state_transform, pack_state_transform};
use super::kernel_pool::{KernelPool, PoolError};
use super::kernel_type::{KernelType, ID_WORD_LEN};

/// Orientation of one frame relative to another.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRelation {
    /// Constant rotation; the state transform has a zero derivative block.
    Fixed(Matrix3<f64>),
    /// Rotation of `phase + rate·et` radians about `axis`.
    Spin {
        axis: Unit<Vector3<f64>>,
        rate: f64,
        phase: f64,
    },
    /// Orientation is known but angular velocity is not; only [`KernelPool::rotation`] works.
    RotationOnly(Matrix3<f64>),
}

impl FrameRelation {
    fn rotation(&self, et: f64) -> Matrix3<f64> {
        match self {
            FrameRelation::Fixed(m) | FrameRelation::RotationOnly(m) => *m,
            FrameRelation::Spin { axis, rate, phase } => {
                Rotation3::from_axis_angle(axis, phase + rate * et).into_inner()
            }
        }
    }

    fn state_transform(&self, et: f64) -> Option<Matrix6<f64>> {
        match self {
            FrameRelation::Fixed(m) => Some(pack_state_transform(m, &Matrix3::zeros())),
            FrameRelation::Spin { axis, rate, .. } => {
                let rot = self.rotation(et);
                let drot = cross_matrix(&(axis.into_inner() * *rate)) * rot;
                Some(pack_state_transform(&rot, &drot))
            }
            FrameRelation::RotationOnly(_) => None,
        }
    }
}

/// Linear spacecraft clock: `ticks = tick_offset + (et − et_epoch) · ticks_per_second`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SclkModel {
    pub et_epoch: f64,
    pub tick_offset: f64,
    pub ticks_per_second: f64,
}

/// One request received by the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolCall {
    Furnish(Utf8PathBuf),
    Unload(Utf8PathBuf),
    StateTransform { from: String, to: String, et: f64 },
    Rotation { from: String, to: String, et: f64 },
}

#[derive(Debug, Default)]
pub struct MemoryKernelPool {
    loaded: RefCell<Vec<(Utf8PathBuf, KernelType)>>,
    rejected: HashSet<Utf8PathBuf>,
    frames: HashMap<i32, String>,
    relations: HashMap<(String, String), FrameRelation>,
    clocks: HashMap<i32, SclkModel>,
    calls: RefCell<Vec<PoolCall>>,
}

impl MemoryKernelPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a frame name for an id.
    pub fn with_frame(mut self, id: i32, name: &str) -> Self {
        self.frames.insert(id, name.to_ascii_uppercase());
        self
    }

    /// Define the orientation of `to` relative to `from`.
    pub fn with_relation(mut self, from: &str, to: &str, relation: FrameRelation) -> Self {
        self.relations.insert(
            (from.to_ascii_uppercase(), to.to_ascii_uppercase()),
            relation,
        );
        self
    }

    pub fn with_clock(mut self, sclk_code: i32, model: SclkModel) -> Self {
        self.clocks.insert(sclk_code, model);
        self
    }

    /// Make every furnish of `path` fail.
    pub fn with_rejected(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.rejected.insert(path.into());
        self
    }

    /// Mark a kernel as loaded by some other owner.
    pub fn preload(&self, path: impl Into<Utf8PathBuf>, kernel_type: KernelType) {
        self.loaded.borrow_mut().push((path.into(), kernel_type));
    }

    pub fn calls(&self) -> Vec<PoolCall> {
        self.calls.borrow().clone()
    }

    /// Number of furnish requests received for `path`.
    pub fn furnish_count(&self, path: &Utf8Path) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, PoolCall::Furnish(p) if p == path))
            .count()
    }

    pub fn is_loaded(&self, path: &Utf8Path) -> bool {
        self.loaded.borrow().iter().any(|(p, _)| p == path)
    }

    fn record(&self, call: PoolCall) {
        self.calls.borrow_mut().push(call);
    }

    /// Breadth-first search for a chain of relations from `from` to `to`.
    ///
    /// Each step is `(relation, forward)`; `forward == false` means the edge is walked backwards.
    fn find_path(&self, from: &str, to: &str) -> Option<Vec<(&FrameRelation, bool)>> {
        let from = from.to_ascii_uppercase();
        let to = to.to_ascii_uppercase();
        let mut previous: HashMap<String, (String, &FrameRelation, bool)> = HashMap::new();
        let mut queue = VecDeque::from([from.clone()]);
        let mut seen = HashSet::from([from.clone()]);

        while let Some(node) = queue.pop_front() {
            if node == to {
                let mut steps = Vec::new();
                let mut cursor = node;
                while cursor != from {
                    let (prev, relation, forward) = previous.get(&cursor)?;
                    steps.push((*relation, *forward));
                    cursor = prev.clone();
                }
                steps.reverse();
                return Some(steps);
            }
            for ((a, b), relation) in &self.relations {
                let next = if *a == node {
                    Some((b, true))
                } else if *b == node {
                    Some((a, false))
                } else {
                    None
                };
                if let Some((next, forward)) = next {
                    if seen.insert(next.clone()) {
                        previous.insert(next.clone(), (node.clone(), relation, forward));
                        queue.push_back(next.clone());
                    }
                }
            }
        }
        None
    }
}

impl KernelPool for MemoryKernelPool {
    fn furnish(&self, path: &Utf8Path) -> Result<(), PoolError> {
        self.record(PoolCall::Furnish(path.to_path_buf()));
        if self.rejected.contains(path) {
            return Err(PoolError::Rejected {
                path: path.to_string(),
                reason: "rejected by pool".into(),
            });
        }
        let mut head = Vec::with_capacity(ID_WORD_LEN);
        std::fs::File::open(path)
            .and_then(|f| f.take(ID_WORD_LEN as u64).read_to_end(&mut head))
            .map_err(|e| PoolError::Rejected {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let mut loaded = self.loaded.borrow_mut();
        if !loaded.iter().any(|(p, _)| p == path) {
            loaded.push((path.to_path_buf(), KernelType::classify(&head, path)));
        }
        Ok(())
    }

    fn unload(&self, path: &Utf8Path) -> Result<(), PoolError> {
        self.record(PoolCall::Unload(path.to_path_buf()));
        let mut loaded = self.loaded.borrow_mut();
        let before = loaded.len();
        loaded.retain(|(p, _)| p != path);
        if loaded.len() == before {
            return Err(PoolError::NotFound(path.to_string()));
        }
        Ok(())
    }

    fn kernel_info(&self, path: &Utf8Path) -> Option<KernelType> {
        self.loaded
            .borrow()
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, t)| *t)
    }

    fn loaded_kernels(&self) -> Vec<(Utf8PathBuf, KernelType)> {
        self.loaded.borrow().clone()
    }

    fn frame_name(&self, frame_id: i32) -> Result<String, PoolError> {
        self.frames
            .get(&frame_id)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(format!("frame id {frame_id}")))
    }

    fn state_transform(&self, from: &str, to: &str, et: f64) -> Result<Matrix6<f64>, PoolError> {
        self.record(PoolCall::StateTransform {
            from: from.to_string(),
            to: to.to_string(),
            et,
        });
        let path = self
            .find_path(from, to)
            .ok_or_else(|| PoolError::NotFound(format!("no frame path {from} -> {to}")))?;
        path.iter()
            .try_fold(Matrix6::identity(), |acc, (relation, forward)| {
                let step = relation.state_transform(et)?;
                let step = if *forward {
                    step
                } else {
                    invert_state_transform(&step)
                };
                Some(step * acc)
            })
            .ok_or_else(|| {
                PoolError::Unsupported(format!("no angular velocity for {from} -> {to}"))
            })
    }

    fn rotation(&self, from: &str, to: &str, et: f64) -> Result<Matrix3<f64>, PoolError> {
        self.record(PoolCall::Rotation {
            from: from.to_string(),
            to: to.to_string(),
            et,
        });
        let path = self
            .find_path(from, to)
            .ok_or_else(|| PoolError::NotFound(format!("no frame path {from} -> {to}")))?;
        Ok(path
            .iter()
            .fold(Matrix3::identity(), |acc, (relation, forward)| {
                let step = relation.rotation(et);
                let step = if *forward { step } else { step.transpose() };
                step * acc
            }))
    }

    fn et_to_sclk(&self, sclk_code: i32, et: f64) -> Result<f64, PoolError> {
        let clock = self
            .clocks
            .get(&sclk_code)
            .ok_or_else(|| PoolError::NotFound(format!("sclk {sclk_code}")))?;
        Ok(clock.tick_offset + (et - clock.et_epoch) * clock.ticks_per_second)
    }

    fn sclk_to_et(&self, sclk_code: i32, ticks: f64) -> Result<f64, PoolError> {
        let clock = self
            .clocks
            .get(&sclk_code)
            .ok_or_else(|| PoolError::NotFound(format!("sclk {sclk_code}")))?;
        Ok(clock.et_epoch + (ticks - clock.tick_offset) / clock.ticks_per_second)
    }
}

#[cfg(test)]
mod memory_pool_test {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn z_axis() -> Unit<Vector3<f64>> {
        Vector3::z_axis()
    }

    #[test]
    fn test_identity_and_inverse() {
        let rot = Rotation3::from_axis_angle(&z_axis(), FRAC_PI_2).into_inner();
        let pool = MemoryKernelPool::new().with_relation(
            "J2000",
            "MRO_SPACECRAFT",
            FrameRelation::Fixed(rot),
        );

        let id = pool.state_transform("J2000", "j2000", 0.0).unwrap();
        assert_eq!(id, Matrix6::identity());

        let fwd = pool.rotation("J2000", "MRO_SPACECRAFT", 0.0).unwrap();
        let back = pool.rotation("MRO_SPACECRAFT", "J2000", 0.0).unwrap();
        assert_relative_eq!(fwd * back, Matrix3::identity(), epsilon = 1e-14);
    }

    #[test]
    fn test_rotation_only_has_no_state_transform() {
        let pool = MemoryKernelPool::new().with_relation(
            "A",
            "B",
            FrameRelation::RotationOnly(Matrix3::identity()),
        );
        assert!(matches!(
            pool.state_transform("A", "B", 1.0),
            Err(PoolError::Unsupported(_))
        ));
        assert!(pool.rotation("A", "B", 1.0).is_ok());
    }

    #[test]
    fn test_chain_through_intermediate_frame() {
        let spin = FrameRelation::Spin {
            axis: z_axis(),
            rate: 0.01,
            phase: 0.0,
        };
        let pool = MemoryKernelPool::new()
            .with_relation("J2000", "B", spin)
            .with_relation("B", "C", FrameRelation::Fixed(Matrix3::identity()));
        let xf = pool.state_transform("J2000", "C", 10.0).unwrap();
        let direct = Rotation3::from_axis_angle(&z_axis(), 0.1).into_inner();
        assert_relative_eq!(xf.fixed_view::<3, 3>(0, 0).into_owned(), direct, epsilon = 1e-14);
    }

    #[test]
    fn test_sclk_round_trip() {
        let pool = MemoryKernelPool::new().with_clock(
            -74,
            SclkModel {
                et_epoch: 1.0e8,
                tick_offset: 5.0e9,
                ticks_per_second: 65536.0,
            },
        );
        let ticks = pool.et_to_sclk(-74, 1.0e8 + 2.5).unwrap();
        assert_eq!(ticks, 5.0e9 + 2.5 * 65536.0);
        assert_relative_eq!(pool.sclk_to_et(-74, ticks).unwrap(), 1.0e8 + 2.5);
        assert!(pool.et_to_sclk(-82, 0.0).is_err());
    }

    #[test]
    fn test_furnish_missing_file_is_rejected() {
        let pool = MemoryKernelPool::new();
        let path = Utf8Path::new("/no/such/kernel.bc");
        assert!(pool.furnish(path).is_err());
        assert!(!pool.is_loaded(path));
        assert_eq!(pool.furnish_count(path), 1);
    }
}
