//! Rigid transform of a vehicle's points into the primary vehicle's frame.
//!
//! Rotation is `Rz(Δyaw)·Ry(Δpitch)·Rx(Δroll)` with deltas taken source minus
//! primary. Translation is the planar offset rotated by the primary's yaw,
//! plus the height delta. Intensity passes through.

use contracts::{MergeError, MergeTarget, PointCloudMerger, VehicleLocation, POINT_STRIDE};
use nalgebra::{Matrix3, Rotation3, Vector3};

#[derive(Debug, Clone, Copy, Default)]
pub struct RigidTransformMerger;

impl RigidTransformMerger {
    /// Rotation and translation taking `source` coordinates into `primary`'s
    pub fn rigid_transform(
        primary: &VehicleLocation,
        source: &VehicleLocation,
    ) -> Result<(Matrix3<f32>, Vector3<f32>), MergeError> {
        let required = VehicleLocation::YAW + 1;
        for pose in [primary, source] {
            if pose.len() < required {
                return Err(MergeError::ShortPose {
                    len: pose.len(),
                    required,
                });
            }
        }
        let p = primary.as_slice();
        let s = source.as_slice();

        let delta = |i: usize| f64::from(s[i]) - f64::from(p[i]);
        let rotation = Rotation3::from_euler_angles(
            delta(VehicleLocation::ROLL),
            delta(VehicleLocation::PITCH),
            delta(VehicleLocation::YAW),
        );

        let yaw = p[VehicleLocation::YAW];
        let (sin, cos) = yaw.sin_cos();
        let da = s[VehicleLocation::X] - p[VehicleLocation::X];
        let db = s[VehicleLocation::Y] - p[VehicleLocation::Y];
        let translation = Vector3::new(
            da * cos + db * sin,
            -da * sin + db * cos,
            s[VehicleLocation::Z] - p[VehicleLocation::Z],
        );

        Ok((rotation.matrix().cast::<f32>(), translation))
    }
}

impl PointCloudMerger for RigidTransformMerger {
    fn validate(
        &self,
        primary: &VehicleLocation,
        points: &[f32],
        source: &VehicleLocation,
    ) -> Result<(), MergeError> {
        if points.len() % POINT_STRIDE != 0 {
            return Err(MergeError::MisalignedPoints {
                len: points.len(),
                stride: POINT_STRIDE,
            });
        }
        Self::rigid_transform(primary, source).map(|_| ())
    }

    fn merge_into(
        &self,
        target: &dyn MergeTarget,
        primary: &VehicleLocation,
        points: &[f32],
        source: &VehicleLocation,
    ) -> Result<(), MergeError> {
        self.validate(primary, points, source)?;
        if target.len() != points.len() {
            return Err(MergeError::TargetSize {
                capacity: target.len(),
                required: points.len(),
            });
        }
        let (rotation, translation) = Self::rigid_transform(primary, source)?;

        for (i, point) in points.chunks_exact(POINT_STRIDE).enumerate() {
            let v = rotation * Vector3::new(point[0], point[1], point[2]) + translation;
            target.write_slice(i * POINT_STRIDE, &[v.x, v.y, v.z, point[3]]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::f32::consts::FRAC_PI_2;

    struct VecTarget(RefCell<Vec<f32>>);

    impl VecTarget {
        fn new(len: usize) -> Self {
            Self(RefCell::new(vec![0.0; len]))
        }
    }

    impl MergeTarget for VecTarget {
        fn len(&self) -> usize {
            self.0.borrow().len()
        }

        fn write_slice(&self, start: usize, values: &[f32]) {
            self.0.borrow_mut()[start..start + values.len()].copy_from_slice(values);
        }
    }

    fn pose(x: f32, y: f32, z: f32, yaw: f32) -> VehicleLocation {
        VehicleLocation::new(vec![x, y, z, 0.0, 0.0, yaw])
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-4, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_same_pose_is_identity() {
        let target = VecTarget::new(8);
        let points = [1.0, 2.0, 3.0, 0.5, -1.0, 0.0, 4.0, 0.9];
        let p = pose(5.0, 5.0, 1.0, 0.3);
        RigidTransformMerger.merge_into(&target, &p, &points, &p).unwrap();
        assert_close(&target.0.borrow(), &points);
    }

    #[test]
    fn test_yaw_delta_and_offset() {
        let target = VecTarget::new(4);
        let primary = pose(0.0, 0.0, 0.0, 0.0);
        let source = pose(10.0, 0.0, 1.0, FRAC_PI_2);
        RigidTransformMerger
            .merge_into(&target, &primary, &[1.0, 0.0, 0.0, 0.7], &source)
            .unwrap();
        assert_close(&target.0.borrow(), &[10.0, 1.0, 1.0, 0.7]);
    }

    #[test]
    fn test_translation_follows_primary_heading() {
        let primary = pose(0.0, 0.0, 0.0, FRAC_PI_2);
        let source = pose(10.0, 0.0, 0.0, FRAC_PI_2);
        let (_, t) = RigidTransformMerger::rigid_transform(&primary, &source).unwrap();
        assert_close(t.as_slice(), &[0.0, -10.0, 0.0]);
    }

    #[test]
    fn test_rejects_bad_input_before_writing() {
        let target = VecTarget::new(4);
        let short = VehicleLocation::new(vec![0.0; 3]);
        let ok = pose(0.0, 0.0, 0.0, 0.0);
        assert!(matches!(
            RigidTransformMerger.merge_into(&target, &short, &[1.0; 4], &ok),
            Err(MergeError::ShortPose { len: 3, required: 6 })
        ));
        assert!(matches!(
            RigidTransformMerger.merge_into(&target, &ok, &[1.0; 3], &ok),
            Err(MergeError::MisalignedPoints { .. })
        ));
        assert!(matches!(
            RigidTransformMerger.merge_into(&target, &ok, &[1.0; 8], &ok),
            Err(MergeError::TargetSize { .. })
        ));
        assert!(target.0.borrow().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_validate_matches_merge_rejections() {
        let ok = pose(0.0, 0.0, 0.0, 0.0);
        let short = VehicleLocation::new(vec![0.0; 5]);
        assert!(RigidTransformMerger.validate(&ok, &[1.0; 8], &ok).is_ok());
        assert!(matches!(
            RigidTransformMerger.validate(&ok, &[7.0; 3], &ok),
            Err(MergeError::MisalignedPoints { len: 3, stride: 4 })
        ));
        assert!(matches!(
            RigidTransformMerger.validate(&ok, &[1.0; 4], &short),
            Err(MergeError::ShortPose { len: 5, required: 6 })
        ));
    }
}
