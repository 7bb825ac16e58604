//! Camera model interface used by the segment builders.
//!
//! The builders need a handful of NAIF ids from the camera and a way to extend cached pointing
//! and position beyond their first and last samples. The extrapolation hooks have default
//! implementations that propagate with the recorded rates; a camera with a better model of its
//! own motion can override them.

use nalgebra::{Rotation3, Vector3, Vector4};

use super::frame_transform::{m2q, q2m};

/// One cached pointing sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PointingRecord {
    /// Scalar-first quaternion rotating the recorded "from" frame into the "to" frame.
    pub quaternion: Vector4<f64>,
    pub angular_velocity: Option<Vector3<f64>>,
    pub et: f64,
}

/// One cached position sample.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub position: Vector3<f64>,
    pub velocity: Option<Vector3<f64>>,
    pub et: f64,
}

/// Pick the record nearest to `et` among the two ends, and its inner neighbour.
fn anchor_pair<T>(records: &[T], at_start: bool) -> Option<(&T, Option<&T>)> {
    if at_start {
        Some((records.first()?, records.get(1)))
    } else {
        let n = records.len();
        Some((records.last()?, n.checked_sub(2).and_then(|i| records.get(i))))
    }
}

pub trait CameraModel {
    /// NAIF id of the frame the CK is written for.
    fn ck_frame_id(&self) -> i32;

    /// NAIF id of the CK reference frame.
    fn ck_reference_id(&self) -> i32;

    /// NAIF spacecraft clock id.
    fn sclk_code(&self) -> i32;

    /// Body whose position the SPK describes.
    fn spk_target_id(&self) -> i32;

    /// Body the SPK position is relative to.
    fn spk_center_id(&self) -> i32;

    /// Frame id the SPK states are expressed in.
    fn spk_reference_id(&self) -> i32;

    /// Pointing at `et`, outside the span of `records`.
    ///
    /// The default rotates the nearest end sample with its angular velocity, or with the rate
    /// implied by the two nearest samples when the cache has none.
    fn extrapolate_pointing(&self, records: &[PointingRecord], et: f64) -> Option<PointingRecord> {
        let at_start = records.first().is_some_and(|r| et <= r.et);
        let (anchor, neighbour) = anchor_pair(records, at_start)?;
        let rot = q2m(&anchor.quaternion);

        let av = match (anchor.angular_velocity, neighbour) {
            (Some(av), _) => av,
            (None, Some(next)) if next.et != anchor.et => {
                let step =
                    Rotation3::from_matrix_unchecked(rot.transpose() * q2m(&next.quaternion));
                -step.scaled_axis() / (next.et - anchor.et)
            }
            _ => Vector3::zeros(),
        };

        let propagated = rot * Rotation3::new(-av * (et - anchor.et)).into_inner();
        Some(PointingRecord {
            quaternion: m2q(&propagated),
            angular_velocity: anchor.angular_velocity,
            et,
        })
    }

    /// Position at `et`, outside the span of `records`.
    ///
    /// The default moves the nearest end sample along its velocity, or along the finite
    /// difference of the two nearest samples when the cache has no velocity.
    fn extrapolate_state(&self, records: &[StateRecord], et: f64) -> Option<StateRecord> {
        let at_start = records.first().is_some_and(|r| et <= r.et);
        let (anchor, neighbour) = anchor_pair(records, at_start)?;

        let velocity = match (anchor.velocity, neighbour) {
            (Some(v), _) => v,
            (None, Some(next)) if next.et != anchor.et => {
                (next.position - anchor.position) / (next.et - anchor.et)
            }
            _ => Vector3::zeros(),
        };

        Some(StateRecord {
            position: anchor.position + velocity * (et - anchor.et),
            velocity: anchor.velocity,
            et,
        })
    }
}

/// A camera described only by its NAIF ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraIds {
    pub ck_frame_id: i32,
    pub ck_reference_id: i32,
    pub sclk_code: i32,
    pub spk_target_id: i32,
    pub spk_center_id: i32,
    pub spk_reference_id: i32,
}

impl CameraModel for CameraIds {
    fn ck_frame_id(&self) -> i32 {
        self.ck_frame_id
    }

    fn ck_reference_id(&self) -> i32 {
        self.ck_reference_id
    }

    fn sclk_code(&self) -> i32 {
        self.sclk_code
    }

    fn spk_target_id(&self) -> i32 {
        self.spk_target_id
    }

    fn spk_center_id(&self) -> i32 {
        self.spk_center_id
    }

    fn spk_reference_id(&self) -> i32 {
        self.spk_reference_id
    }
}

#[cfg(test)]
mod camera_test {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraIds {
        CameraIds {
            ck_frame_id: -74000,
            ck_reference_id: 1,
            sclk_code: -74,
            spk_target_id: -74,
            spk_center_id: 499,
            spk_reference_id: 1,
        }
    }

    fn spinning(et: f64, rate: f64) -> Vector4<f64> {
        // rotation about z consistent with dR/dt = -R [av x] for av = (0, 0, rate)
        m2q(&Rotation3::new(Vector3::new(0.0, 0.0, -rate * et)).into_inner())
    }

    #[test]
    fn test_extrapolate_with_angular_velocity() {
        let rate = 0.02;
        let av = Some(Vector3::new(0.0, 0.0, rate));
        let records: Vec<PointingRecord> = (0..3)
            .map(|i| {
                let et = 100.0 + i as f64;
                PointingRecord {
                    quaternion: spinning(et, rate),
                    angular_velocity: av,
                    et,
                }
            })
            .collect();

        let before = camera().extrapolate_pointing(&records, 99.5).unwrap();
        assert_relative_eq!(before.quaternion, spinning(99.5, rate), epsilon = 1e-12);
        assert_eq!(before.angular_velocity, av);

        let after = camera().extrapolate_pointing(&records, 102.25).unwrap();
        assert_relative_eq!(after.quaternion, spinning(102.25, rate), epsilon = 1e-12);
    }

    #[test]
    fn test_extrapolate_without_angular_velocity() {
        let rate = -0.01;
        let records: Vec<PointingRecord> = (0..2)
            .map(|i| {
                let et = i as f64 * 2.0;
                PointingRecord {
                    quaternion: spinning(et, rate),
                    angular_velocity: None,
                    et,
                }
            })
            .collect();
        let before = camera().extrapolate_pointing(&records, -0.003).unwrap();
        assert_relative_eq!(before.quaternion, spinning(-0.003, rate), epsilon = 1e-12);
        assert_eq!(before.angular_velocity, None);
    }

    #[test]
    fn test_extrapolate_state() {
        let records = vec![
            StateRecord {
                position: Vector3::new(0.0, 0.0, 0.0),
                velocity: None,
                et: 0.0,
            },
            StateRecord {
                position: Vector3::new(2.0, 4.0, 6.0),
                velocity: None,
                et: 2.0,
            },
        ];
        let after = camera().extrapolate_state(&records, 3.0).unwrap();
        assert_relative_eq!(after.position, Vector3::new(3.0, 6.0, 9.0), epsilon = 1e-12);
        assert!(camera().extrapolate_state(&[], 0.0).is_none());
    }
}
