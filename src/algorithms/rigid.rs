use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use sample_consensus::{Estimator, Model};

/// 3D correspondence between the reference frame and the current frame, both in camera coordinates
pub type PointPair = (Point3<f64>, Point3<f64>);

/// Rigid motion mapping current-frame points onto the reference frame: `reference = T * current`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidTransform(pub Isometry3<f64>);

impl RigidTransform {
    /// Least squares rotation and translation between two point sets (Kabsch, or Umeyama
    /// without scale).
    /// Returns `None` when fewer than 3 pairs are given or the SVD does not converge.
    pub fn from_pairs<'a, I>(pairs: I) -> Option<Self>
    where
        I: Iterator<Item = &'a PointPair> + Clone,
    {
        let count = pairs.clone().count();
        if count < 3 {
            return None;
        }

        let (sum_ref, sum_cur) = pairs
            .clone()
            .fold((Vector3::zeros(), Vector3::zeros()), |(r, c), (reference, current)| {
                (r + reference.coords, c + current.coords)
            });
        let centroid_ref = sum_ref / count as f64;
        let centroid_cur = sum_cur / count as f64;

        // H = sum (current - c_cur)(reference - c_ref)^T
        let covariance = pairs.fold(Matrix3::zeros(), |acc, (reference, current)| {
            acc + (current.coords - centroid_cur) * (reference.coords - centroid_ref).transpose()
        });

        let svd = covariance.try_svd(true, true, f64::EPSILON, 0)?;
        let u = svd.u?;
        let v_t = svd.v_t?;

        // R = V diag(1, 1, sign) U^T keeps a proper rotation
        let sign = (v_t.transpose() * u.transpose()).determinant().signum();
        let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, sign));
        let rotation = v_t.transpose() * correction * u.transpose();

        let translation = centroid_ref - rotation * centroid_cur;
        let rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation));

        Some(Self(Isometry3::from_parts(Translation3::from(translation), rotation)))
    }
}

// Implementations for `sample_consensus`

impl<'a> Model<&'a PointPair> for RigidTransform {
    /// Euclidean distance between the reference point and the transformed current point
    fn residual(&self, (reference, current): &&'a PointPair) -> f64 {
        (self.0 * current - reference).norm()
    }
}

#[derive(Default)]
pub struct RigidTransformEstimator;

impl<'a> Estimator<&'a PointPair> for RigidTransformEstimator {
    const MIN_SAMPLES: usize = 3;
    type Model = RigidTransform;
    type ModelIter = Option<RigidTransform>;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = &'a PointPair> + Clone,
    {
        RigidTransform::from_pairs(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.1, 0.2, 2.0),
            Point3::new(-0.5, 0.3, 2.5),
            Point3::new(0.7, -0.4, 1.8),
            Point3::new(0.0, 0.9, 3.1),
            Point3::new(-0.8, -0.6, 2.2),
        ]
    }

    #[test]
    fn recovers_motion() {
        let truth = Isometry3::new(Vector3::new(0.2, -0.1, 0.05), Vector3::new(0.02, -0.1, 0.05));
        let pairs: Vec<PointPair> = cloud().into_iter().map(|p| (truth * p, p)).collect();

        let estimate = RigidTransform::from_pairs(pairs.iter()).unwrap();
        for pair in &pairs {
            assert!(estimate.residual(&pair) < 1e-9);
        }
        assert!((estimate.0.translation.vector - truth.translation.vector).norm() < 1e-9);
    }

    #[test]
    fn identical_clouds_give_identity() {
        let pairs: Vec<PointPair> = cloud().into_iter().map(|p| (p, p)).collect();
        let estimate = RigidTransform::from_pairs(pairs.iter()).unwrap();
        assert!(estimate.0.translation.vector.norm() < 1e-12);
        assert!(estimate.0.rotation.angle() < 1e-9);
    }

    #[test]
    fn needs_three_pairs() {
        let pairs: Vec<PointPair> = cloud().into_iter().take(2).map(|p| (p, p)).collect();
        assert!(RigidTransform::from_pairs(pairs.iter()).is_none());
    }
}
