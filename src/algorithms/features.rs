use std::collections::HashSet;

use bitarray::BitArray;
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use nalgebra::Vector2;
use space::{Knn, KnnFromBatch, LinearKnn, Metric};

use super::brief::{self, BinaryDescriptor, MAX_DESCRIPTOR_BITS};

/// Descriptor length in bytes
pub const DESCRIPTOR_SIZE: usize = MAX_DESCRIPTOR_BITS / u8::BITS as usize;

/// A keypoint in image pixel coordinates together with its descriptor
#[derive(Clone, Debug)]
pub struct Feature<Descriptor> {
    pub keypoint: Vector2<u32>,
    pub descriptor: Descriptor,
}

pub type SizedFeature = Feature<BinaryDescriptor<DESCRIPTOR_SIZE>>;

/// Tunables for keypoint detection and matching
#[derive(Clone, Copy, Debug)]
pub struct FeatureParams {
    pub fast_threshold: u8,
    /// Strongest corners kept, the rest are discarded before description
    pub max_features: usize,
    /// Smoothing applied before BRIEF sampling
    pub blur_sigma: f32,
    pub lowe_ratio: f32,
    pub max_hamming_distance: u32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            fast_threshold: 35,
            max_features: 1000,
            blur_sigma: 2.0,
            lowe_ratio: 0.75,
            max_hamming_distance: (DESCRIPTOR_SIZE * 2) as u32,
        }
    }
}

impl SizedFeature {
    /// Uses FAST (Features from Accelerated Segment Test) as a keypoint detector
    /// and describes every keypoint with BRIEF.
    pub fn detect(image: &GrayImage, params: &FeatureParams) -> Vec<Self> {
        let mut corners = corners_fast9(image, params.fast_threshold);
        corners.sort_by(|a, b| b.score.total_cmp(&a.score));
        corners.truncate(params.max_features);

        // apply a gaussian blur to the image for computing BRIEF descriptors,
        // that way the image is not overly sensitive to high frequency noise.
        let smoothed_image = imageproc::filter::gaussian_blur_f32(image, params.blur_sigma);

        corners
            .into_iter()
            .map(|Corner { x, y, .. }| Feature {
                descriptor: brief::compute_descriptor(x, y, &smoothed_image),
                keypoint: Vector2::new(x, y),
            })
            .collect()
    }
}

// Implementations for `space`

#[derive(Default)]
struct FeatureHamming;

impl<'f> Metric<&'f SizedFeature> for FeatureHamming {
    type Unit = u32;
    fn distance(&self, a: &&SizedFeature, b: &&SizedFeature) -> Self::Unit {
        BitArray::new(a.descriptor).distance(&BitArray::new(b.descriptor))
    }
}

/// Find one-to-one correspondences from `query` features onto `train` features,
/// returned as `(query index, train index)`.
///
/// Each query feature takes its 2 nearest neighbours by hamming distance and is kept
/// only when it passes Lowe's ratio test and neither side was already assigned.
pub fn match_features(
    query: &[SizedFeature],
    train: &[SizedFeature],
    params: &FeatureParams,
) -> Vec<(usize, usize)> {
    // the ratio test needs a second neighbour
    if train.len() < 2 || query.is_empty() {
        return Vec::new();
    }

    let data = train.iter().map(|f| (f, 1u8)).collect::<Vec<_>>();
    let search: LinearKnn<FeatureHamming, _> = KnnFromBatch::from_batch(data.iter());

    // enforce that each point maps to only one
    let mut seen_train = HashSet::<usize>::new();
    let mut seen_query = HashSet::<usize>::new();

    query
        .iter()
        .enumerate()
        .filter_map(|(i, feature)| {
            let nearest = search.knn(&feature, 2);
            if nearest.len() < 2 {
                return None;
            }

            let best = nearest[0].0.distance;
            let second = nearest[1].0.distance;

            if best <= params.max_hamming_distance
                && (best as f32) < params.lowe_ratio * second as f32
                && !seen_train.contains(&nearest[0].0.index)
                && !seen_query.contains(&i)
            {
                seen_train.insert(nearest[0].0.index);
                seen_query.insert(i);

                Some((i, nearest[0].0.index))
            } else {
                None
            }
        })
        .collect()
}
