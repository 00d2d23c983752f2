use nalgebra::{Matrix2, Matrix3, Point2, SMatrix, SymmetricEigen, Vector2, Vector3};
use sample_consensus::{Estimator, Model};

/// A source -> target point correspondence in pixel coordinates
pub type Correspondence = (Point2<f64>, Point2<f64>);

/// Planar projective transform `dst ~ H * src`, normalized so that `h33 = 1`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    pub fn transform_point(&self, point: &Point2<f64>) -> Option<Point2<f64>> {
        let projected = self.0 * Vector3::new(point.x, point.y, 1.0);
        (projected.z.abs() > f64::EPSILON)
            .then(|| Point2::new(projected.x / projected.z, projected.y / projected.z))
    }

    /// Forward transfer error in pixels
    pub fn transfer_error(&self, (src, dst): &Correspondence) -> f64 {
        self.transform_point(src)
            .map(|p| (p - dst).norm())
            .unwrap_or(f64::INFINITY)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().and_then(Self::normalized)
    }

    fn normalized(matrix: Matrix3<f64>) -> Option<Self> {
        let scale = matrix[(2, 2)];
        (scale.abs() > 1e-12 && matrix.iter().all(|v| v.is_finite()))
            .then(|| Self(matrix / scale))
    }

    /// Direct Linear Transform over every correspondence given.
    ///
    /// Points are Hartley-normalized (centroid at the origin, mean distance `sqrt(2)`)
    /// before the constraint matrix is built, and the result is denormalized afterwards.
    /// Returns `None` for degenerate input (fewer than 4 points, coincident or collinear samples).
    pub fn from_correspondences<'a, I>(correspondences: I) -> Option<Self>
    where
        I: Iterator<Item = &'a Correspondence> + Clone,
    {
        let count = correspondences.clone().count();
        if count < 4 {
            return None;
        }

        let t_src = hartley_normalization(correspondences.clone().map(|c| &c.0))?;
        let t_dst = hartley_normalization(correspondences.clone().map(|c| &c.1))?;

        // Accumulate A^T A for the homogeneous system A h = 0, two rows per correspondence.
        let mut normal = SMatrix::<f64, 9, 9>::zeros();
        for (src, dst) in correspondences {
            let s = t_src * Vector3::new(src.x, src.y, 1.0);
            let d = t_dst * Vector3::new(dst.x, dst.y, 1.0);
            let (x, y) = (s.x, s.y);
            let (u, v) = (d.x, d.y);

            let row1 = SMatrix::<f64, 1, 9>::from_row_slice(&[
                -x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u,
            ]);
            let row2 = SMatrix::<f64, 1, 9>::from_row_slice(&[
                0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v,
            ]);
            normal += row1.transpose() * row1 + row2.transpose() * row2;
        }

        // The solution is the eigenvector of the smallest eigenvalue of A^T A
        let eigen = SymmetricEigen::new(normal);
        let smallest = eigen.eigenvalues.imin();
        let h = eigen.eigenvectors.column(smallest);
        let normalized = Matrix3::from_row_iterator(h.iter().copied());

        let t_dst_inv = t_dst.try_inverse()?;
        let matrix = t_dst_inv * normalized * t_src;

        // reject near singular solutions, those come from collinear samples
        let homography = Self::normalized(matrix)?;
        (homography.0.determinant().abs() > 1e-8).then_some(homography)
    }
}

/// Similarity transform moving the centroid to the origin with mean distance `sqrt(2)`.
/// Coincident or collinear point sets have no usable normalization.
fn hartley_normalization<'a>(
    points: impl Iterator<Item = &'a Point2<f64>> + Clone,
) -> Option<Matrix3<f64>> {
    let count = points.clone().count() as f64;
    let centroid = points
        .clone()
        .fold(Vector2::zeros(), |acc, p| acc + p.coords)
        / count;

    let mut scatter = Matrix2::zeros();
    let mut mean_distance = 0.0;
    for p in points {
        let d = p.coords - centroid;
        scatter += d * d.transpose();
        mean_distance += d.norm();
    }
    mean_distance /= count;

    if mean_distance < f64::EPSILON {
        return None;
    }

    let spread = scatter.symmetric_eigenvalues();
    if spread.min() < 1e-6 * spread.max() {
        return None;
    }

    let scale = std::f64::consts::SQRT_2 / mean_distance;
    Some(Matrix3::new(
        scale, 0.0, -scale * centroid.x, //
        0.0, scale, -scale * centroid.y, //
        0.0, 0.0, 1.0,
    ))
}

// Implementations for `sample_consensus`

impl<'a> Model<&'a Correspondence> for Homography {
    fn residual(&self, data: &&'a Correspondence) -> f64 {
        self.transfer_error(data)
    }
}

#[derive(Default)]
pub struct HomographyEstimator;

impl<'a> Estimator<&'a Correspondence> for HomographyEstimator {
    const MIN_SAMPLES: usize = 4;
    type Model = Homography;
    type ModelIter = Option<Homography>;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = &'a Correspondence> + Clone,
    {
        Homography::from_correspondences(data)
    }
}
