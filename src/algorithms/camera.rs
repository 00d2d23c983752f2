use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics for a sensor stream.
///
/// Pixel coordinates follow the image convention: `x` grows to the right,
/// `y` grows downward and depth is measured along the optical axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    /// Square pixels with the principal point at the image centre
    pub fn from_focal(focal: f64, width: u32, height: u32) -> Self {
        Self {
            fx: focal,
            fy: focal,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
            width,
            height,
        }
    }

    /// Camera Intrinsic `3x3` Matrix known as `K`,
    /// which is made up of a 2D Translation, 2D Scaling, and 2D Shear
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Lift a pixel with a metric depth into the camera frame
    pub fn unproject(&self, pixel: Point2<f64>, depth: f64) -> Point3<f64> {
        Point3::new(
            (pixel.x - self.cx) * depth / self.fx,
            (pixel.y - self.cy) * depth / self.fy,
            depth,
        )
    }

    /// Project a camera-frame point onto the image plane.
    /// Points on or behind the camera plane have no projection.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        (point.z > f64::EPSILON).then(|| {
            Point2::new(
                self.fx * point.x / point.z + self.cx,
                self.fy * point.y / point.z + self.cy,
            )
        })
    }

    /// Rescale to a stream of a different resolution (e.g. depth vs color)
    pub fn scaled_to(&self, width: u32, height: u32) -> Self {
        let sx = width as f64 / self.width as f64;
        let sy = height as f64 / self.height as f64;
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
            width,
            height,
        }
    }
}
