//! # Frame transforms
//!
//! State transforms between reference frames, and the small amount of rotation algebra needed to
//! move pointing between quaternion, matrix and 6x6 state-matrix forms.
//!
//! ## Conventions
//!
//! * Quaternions are scalar-first `[w, x, y, z]`, and [`m2q`] always returns `w >= 0`.
//! * A state transform from frame `A` to frame `B` is the 6x6 block matrix
//!   `[[R, 0], [dR/dt, R]]`, where `R` rotates position vectors from `A` into `B`.
//! * The angular velocity `av` paired with a rotation `R` satisfies `dR/dt = −R·[av×]`, which is
//!   the relation used by [`rav2xf`] and inverted by [`xf2rav`].
//!
//! ## Fallback
//!
//! [`compute_state_transform`] first asks the kernel pool for a full state transform. If that
//! fails (typically because a frame in the chain has no angular velocity) it asks for the
//! rotation only and packs it with a **zero** angular velocity. If both fail it reports
//! [`CalibrationError::FrameResolution`].

use log::warn;
use nalgebra::{Matrix3, Matrix6, Rotation3, UnitQuaternion, Vector3, Vector4};

use super::kernel_pool::KernelPool;
use crate::planetcal_errors::CalibrationError;

/// Skew-symmetric cross-product matrix: `cross_matrix(a) * b == a × b`.
pub fn cross_matrix(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Assemble `[[rot, 0], [drot, rot]]`.
pub fn pack_state_transform(rot: &Matrix3<f64>, drot: &Matrix3<f64>) -> Matrix6<f64> {
    let mut xf = Matrix6::zeros();
    xf.fixed_view_mut::<3, 3>(0, 0).copy_from(rot);
    xf.fixed_view_mut::<3, 3>(3, 3).copy_from(rot);
    xf.fixed_view_mut::<3, 3>(3, 0).copy_from(drot);
    xf
}

/// Build a state transform from a rotation and its angular velocity.
pub fn rav2xf(rot: &Matrix3<f64>, av: &Vector3<f64>) -> Matrix6<f64> {
    pack_state_transform(rot, &(-rot * cross_matrix(av)))
}

/// Split a state transform into its rotation and angular velocity.
pub fn xf2rav(xf: &Matrix6<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let rot: Matrix3<f64> = xf.fixed_view::<3, 3>(0, 0).into_owned();
    let drot: Matrix3<f64> = xf.fixed_view::<3, 3>(3, 0).into_owned();
    let omega = -rot.transpose() * drot;
    (rot, Vector3::new(omega[(2, 1)], omega[(0, 2)], omega[(1, 0)]))
}

/// Inverse of a state transform: `[[Rᵀ, 0], [−Rᵀ·D·Rᵀ, Rᵀ]]`.
pub fn invert_state_transform(xf: &Matrix6<f64>) -> Matrix6<f64> {
    let rt: Matrix3<f64> = xf.fixed_view::<3, 3>(0, 0).transpose();
    let d: Matrix3<f64> = xf.fixed_view::<3, 3>(3, 0).into_owned();
    pack_state_transform(&rt, &(-rt * d * rt))
}

/// Rotation matrix of a scalar-first quaternion. The quaternion is normalised first.
pub fn q2m(q: &Vector4<f64>) -> Matrix3<f64> {
    UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q[0], q[1], q[2], q[3]))
        .to_rotation_matrix()
        .into_inner()
}

/// Scalar-first quaternion of a rotation matrix, with a non-negative scalar part.
pub fn m2q(m: &Matrix3<f64>) -> Vector4<f64> {
    let uq = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*m));
    let q = uq.quaternion();
    let sign = if q.w < 0.0 { -1.0 } else { 1.0 };
    Vector4::new(q.w, q.i, q.j, q.k) * sign
}

/// State transform from `from` to `to` at `et`, with the rotation-only fallback.
///
/// Arguments
/// -----------------
/// * `pool`: the kernel pool answering frame queries.
/// * `from`, `to`: frame names.
/// * `et`: ephemeris time (seconds past J2000).
///
/// Return
/// ----------
/// * The 6x6 state transform, or [`CalibrationError::FrameResolution`] if neither the state
///   transform nor the rotation can be resolved.
pub fn compute_state_transform(
    pool: &dyn KernelPool,
    from: &str,
    to: &str,
    et: f64,
) -> Result<Matrix6<f64>, CalibrationError> {
    match pool.state_transform(from, to, et) {
        Ok(xf) => Ok(xf),
        Err(state_err) => match pool.rotation(from, to, et) {
            Ok(rot) => {
                warn!("{from} -> {to} at {et}: {state_err}; assuming zero angular velocity");
                Ok(rav2xf(&rot, &Vector3::zeros()))
            }
            Err(_) => Err(CalibrationError::FrameResolution {
                from: from.to_string(),
                to: to.to_string(),
                et,
            }),
        },
    }
}

/// Product of state transforms along a chain of frame ids.
///
/// For a chain `[f0, f1, ..., fn]` the result maps `f0` to `fn`. A single-frame chain is
/// completed with `terminator`; an empty chain is the identity.
pub fn chain_state_transform(
    pool: &dyn KernelPool,
    chain: &[i32],
    terminator: i32,
    et: f64,
) -> Result<Matrix6<f64>, CalibrationError> {
    let mut chain = chain.to_vec();
    if chain.len() == 1 && chain[0] != terminator {
        chain.push(terminator);
    }

    let mut state = Matrix6::identity();
    for pair in chain.windows(2) {
        let from_name = pool.frame_name(pair[0])?;
        let to_name = pool.frame_name(pair[1])?;
        state = compute_state_transform(pool, &from_name, &to_name, et)? * state;
    }
    Ok(state)
}

/// Left and right frame-id chains extracted from a `TimeDependentFrames` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameChains {
    /// From the recorded "to" frame down to the instrument (CK) frame.
    pub left: Vec<i32>,
    /// From the CK reference frame up to the recorded "from" frame.
    pub right: Vec<i32>,
}

/// Split the recorded frame list into the chains that map it onto `left_base`/`right_base`.
///
/// `time_dependent` is ordered from the frame the cached rotation points *to* down to the frame
/// it was recorded *from*. At least one and at most two of the base ids must appear in it.
pub fn frame_chains(
    time_dependent: &[i32],
    left_base: i32,
    right_base: i32,
) -> Result<FrameChains, CalibrationError> {
    let found = time_dependent
        .iter()
        .map(|id| (*id == right_base) as usize + (*id == left_base) as usize)
        .sum::<usize>();
    if found == 0 || found > 2 {
        return Err(CalibrationError::Configuration(format!(
            "TimeDependentFrames must contain 1 or 2 of the CK frame ids {left_base}/{right_base}, found {found}"
        )));
    }

    let mut left = Vec::new();
    let mut last_left = left_base;
    for &id in time_dependent {
        if id == right_base {
            break;
        }
        left.push(id);
        last_left = id;
        if id == left_base {
            break;
        }
    }
    if last_left != left_base {
        left.push(left_base);
    }

    let mut right = Vec::new();
    let mut last_right = right_base;
    for &id in time_dependent.iter().rev() {
        if id == left_base || id == last_left {
            break;
        }
        right.insert(0, id);
        last_right = id;
        if id == right_base {
            break;
        }
    }
    if last_right != right_base {
        right.insert(0, right_base);
    }

    Ok(FrameChains { left, right })
}

#[cfg(test)]
mod frame_transform_test {
    use super::*;
    use crate::spice::kernel_pool::PoolError;
    use crate::spice::memory_pool::{FrameRelation, MemoryKernelPool};
    use approx::assert_relative_eq;

    #[test]
    fn test_quaternion_round_trip() {
        let q = Vector4::new(0.5, 0.5, -0.5, 0.5);
        assert_relative_eq!(m2q(&q2m(&q)), q, epsilon = 1e-14);

        // sign is normalised
        let neg = -q;
        assert_relative_eq!(m2q(&q2m(&neg)), q, epsilon = 1e-14);
    }

    #[test]
    fn test_rav_round_trip() {
        let rot = q2m(&Vector4::new(0.9, 0.1, 0.3, -0.2));
        let av = Vector3::new(1e-3, -2e-3, 5e-4);
        let (rot2, av2) = xf2rav(&rav2xf(&rot, &av));
        assert_relative_eq!(rot2, rot, epsilon = 1e-14);
        assert_relative_eq!(av2, av, epsilon = 1e-15);
    }

    #[test]
    fn test_invert_state_transform() {
        let rot = q2m(&Vector4::new(0.7, 0.2, 0.1, 0.4));
        let xf = rav2xf(&rot, &Vector3::new(0.01, 0.02, -0.03));
        let product = invert_state_transform(&xf) * xf;
        assert_relative_eq!(product, Matrix6::identity(), epsilon = 1e-14);
    }

    #[test]
    fn test_rotation_only_fallback() {
        let rot = q2m(&Vector4::new(0.7, 0.2, 0.1, 0.4));
        let pool =
            MemoryKernelPool::new().with_relation("A", "B", FrameRelation::RotationOnly(rot));
        let xf = compute_state_transform(&pool, "A", "B", 0.0).unwrap();
        assert_eq!(xf, rav2xf(&rot, &Vector3::zeros()));
    }

    #[test]
    fn test_unresolved_frames() {
        let pool = MemoryKernelPool::new();
        assert_eq!(
            compute_state_transform(&pool, "A", "B", 12.5),
            Err(CalibrationError::FrameResolution {
                from: "A".into(),
                to: "B".into(),
                et: 12.5
            })
        );
    }

    #[test]
    fn test_chain_unknown_frame_id() {
        let pool = MemoryKernelPool::new().with_frame(1, "J2000");
        assert_eq!(
            chain_state_transform(&pool, &[1, -74000], 1, 0.0),
            Err(CalibrationError::Pool(PoolError::NotFound(
                "frame id -74000".into()
            )))
        );
    }

    #[test]
    fn test_frame_chains() {
        // instrument -> spacecraft -> J2000, CK frame is the spacecraft
        let chains = frame_chains(&[-74690, -74000, 1], -74000, 1).unwrap();
        assert_eq!(chains.left, vec![-74690, -74000]);
        assert_eq!(chains.right, vec![1]);

        // recorded directly in the CK frame
        let chains = frame_chains(&[-74000, 1], -74000, 1).unwrap();
        assert_eq!(chains.left, vec![-74000]);
        assert_eq!(chains.right, vec![1]);

        // recorded relative to a dynamic frame, CK reference is J2000
        let chains = frame_chains(&[-74000, -74900], -74000, 1).unwrap();
        assert_eq!(chains.left, vec![-74000]);
        assert_eq!(chains.right, vec![1, -74900]);

        assert!(matches!(
            frame_chains(&[-5, -6], -74000, 1),
            Err(CalibrationError::Configuration(_))
        ));
    }
}
