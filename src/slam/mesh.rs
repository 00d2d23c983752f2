use std::collections::HashMap;

use nalgebra::Point3;

/// Integer voxel coordinates
pub type VoxelKey = (i32, i32, i32);

/// Running average of the surface samples that fell into one voxel
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Voxel {
    position_sum: [f64; 3],
    color_sum: [f64; 3],
    pub samples: u32,
}

/// Coloured surface vertex of the reconstruction
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vertex {
    pub position: Point3<f32>,
    pub color: [u8; 3],
}

/// Volumetric reconstruction accumulated by the mapper.
///
/// Surface samples are hashed into cubic voxels of `voxel_size` metres, each voxel
/// contributing one averaged vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    voxel_size: f64,
    voxels: HashMap<VoxelKey, Voxel>,
}

impl Mesh {
    pub fn new(voxel_size: f64) -> Self {
        Self {
            voxel_size,
            voxels: HashMap::new(),
        }
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    pub fn key_of(&self, point: &Point3<f64>) -> VoxelKey {
        let cell = |v: f64| (v / self.voxel_size).floor() as i32;
        (cell(point.x), cell(point.y), cell(point.z))
    }

    /// Add one world-frame surface sample
    pub fn insert(&mut self, point: &Point3<f64>, color: [u8; 3]) {
        let voxel = self.voxels.entry(self.key_of(point)).or_default();
        for axis in 0..3 {
            voxel.position_sum[axis] += point[axis];
            voxel.color_sum[axis] += color[axis] as f64;
        }
        voxel.samples += 1;
    }

    pub fn vertex_count(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn clear(&mut self) {
        self.voxels.clear();
    }

    pub fn contains(&self, key: &VoxelKey) -> bool {
        self.voxels.contains_key(key)
    }

    /// Averaged vertices, in no particular order
    pub fn vertices(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.voxels.values().map(|voxel| {
            let n = voxel.samples.max(1) as f64;
            Vertex {
                position: Point3::new(
                    (voxel.position_sum[0] / n) as f32,
                    (voxel.position_sum[1] / n) as f32,
                    (voxel.position_sum[2] / n) as f32,
                ),
                color: [
                    (voxel.color_sum[0] / n).round() as u8,
                    (voxel.color_sum[1] / n).round() as u8,
                    (voxel.color_sum[2] / n).round() as u8,
                ],
            }
        })
    }
}
