use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::camera::CameraIntrinsics,
    sensors::FramePair,
    slam::{
        mesh::Mesh,
        tracker::{Mapper, Pose},
    },
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Edge length of a reconstruction voxel (metres).
    /// Default: 0.02
    pub voxel_size: f64,

    /// Only every n-th depth pixel along each axis is integrated.
    /// Default: 4
    pub stride: u32,

    /// Readings beyond this range are ignored (metres).
    /// Default: 4.0
    pub max_depth: f32,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.02,
            stride: 4,
            max_depth: 4.0,
        }
    }
}

/// Reference mapper fusing posed depth into a voxel-hashed [`Mesh`]
pub struct VoxelMapper {
    config: MapperConfig,
    mesh: Mesh,
    allocated: bool,
}

impl VoxelMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self {
            mesh: Mesh::new(config.voxel_size),
            config,
            allocated: false,
        }
    }
}

impl Default for VoxelMapper {
    fn default() -> Self {
        Self::new(MapperConfig::default())
    }
}

impl Mapper for VoxelMapper {
    fn initialize(&mut self, _intrinsics: &CameraIntrinsics) -> Result<(), String> {
        if !(self.config.voxel_size > 0.0) {
            return Err(format!("voxel size must be positive, got {}", self.config.voxel_size));
        }
        self.allocated = true;
        Ok(())
    }

    fn integrate(&mut self, pose: &Pose, pair: &FramePair) {
        if !self.allocated {
            log::warn!("integrate called on an unallocated mapper, frame ignored");
            return;
        }
        let Some(intrinsics) = pair.intrinsics() else {
            return;
        };

        // intrinsics are given for the color stream, sample in color coordinates
        let (width, height) = (pair.color.width(), pair.color.height());
        let intrinsics = intrinsics.scaled_to(width, height);
        let stride = self.config.stride.max(1) as usize;
        let color = pair.color.image();

        let before = self.mesh.vertex_count();
        for y in (0..height).step_by(stride) {
            for x in (0..width).step_by(stride) {
                let Some(depth) = pair.depth_at_color_pixel(x, y) else {
                    continue;
                };
                if depth > self.config.max_depth {
                    continue;
                }
                let pixel = Point2::new(x as f64, y as f64);
                let camera_point = intrinsics.unproject(pixel, depth as f64);
                self.mesh.insert(&(pose * camera_point), color.get_pixel(x, y).0);
            }
        }

        log::trace!(
            "integrated frame at t={:.3}: {} new voxels",
            pair.timestamp(),
            self.mesh.vertex_count() - before
        );
    }

    fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    fn clear_mesh(&mut self) {
        self.mesh.clear();
    }

    fn release(&mut self) {
        self.mesh.clear();
        self.allocated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{ColorFrame, DepthFrame, DepthImage, INVALID_DEPTH};
    use image::{Luma, Rgb, RgbImage};
    use nalgebra::{Translation3, UnitQuaternion};

    fn pair(depth: f32) -> FramePair {
        let mut depth_image = DepthImage::from_pixel(32, 32, Luma([depth]));
        depth_image.put_pixel(0, 0, Luma([INVALID_DEPTH]));
        FramePair {
            depth: DepthFrame::new(0.0, depth_image, None),
            color: ColorFrame::new(
                0.0,
                RgbImage::from_pixel(32, 32, Rgb([10, 20, 30])),
                Some(CameraIntrinsics::from_focal(30.0, 32, 32)),
            ),
        }
    }

    fn mapper() -> VoxelMapper {
        let mut mapper = VoxelMapper::new(MapperConfig {
            voxel_size: 0.01,
            stride: 2,
            max_depth: 4.0,
        });
        mapper.initialize(&CameraIntrinsics::from_focal(30.0, 32, 32)).unwrap();
        mapper
    }

    #[test]
    fn integrates_plane_in_front_of_camera() {
        let mut mapper = mapper();
        mapper.integrate(&Pose::identity(), &pair(1.0));
        assert!(!mapper.mesh().is_empty());
        for vertex in mapper.mesh().vertices() {
            assert!((vertex.position.z - 1.0).abs() < 0.01);
            assert_eq!(vertex.color, [10, 20, 30]);
        }
    }

    #[test]
    fn pose_moves_samples() {
        let mut mapper = mapper();
        let pose = Pose::from_parts(Translation3::new(0.0, 0.0, 5.0), UnitQuaternion::identity());
        mapper.integrate(&pose, &pair(1.0));
        assert!(mapper.mesh().vertices().all(|v| (v.position.z - 6.0).abs() < 0.01));
    }

    #[test]
    fn far_readings_are_skipped() {
        let mut mapper = mapper();
        mapper.integrate(&Pose::identity(), &pair(9.0));
        assert!(mapper.mesh().is_empty());
    }

    #[test]
    fn unallocated_mapper_ignores_frames() {
        let mut mapper = VoxelMapper::default();
        mapper.integrate(&Pose::identity(), &pair(1.0));
        assert!(mapper.mesh().is_empty());
    }
}
