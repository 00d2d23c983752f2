//! Viola-Jones face detection.
//!
//! A cascade of boosted stages of Haar-like features is slid over the image at several
//! scales. Every feature is a weighted sum of rectangle sums read from an integral image,
//! normalised by the standard deviation of the window so detection is insensitive to
//! lighting. Raw hits are grouped and only groups with enough neighbours are reported.

use std::path::{Path, PathBuf};

use image::{imageops::grayscale, GrayImage, Luma, RgbImage};
use imageproc::{
    integral_image::{integral_image, integral_squared_image, sum_image_pixels},
    rect::Rect,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::{
    diminish::detector::{DetectionRegion, SubjectCategory, SubjectDetector},
    error::DetectionError,
};

type Integral = image::ImageBuffer<Luma<u64>, Vec<u64>>;

/// Rectangle in window coordinates with its feature weight
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

/// Decision stump over one Haar-like feature
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub rects: Vec<WeightedRect>,
    pub threshold: f32,
    /// Vote when the normalised feature is below `threshold`
    pub left: f32,
    pub right: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

/// Cascade model, as stored in a YAML model file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HaarCascade {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
}

impl HaarCascade {
    pub fn from_yaml(yaml: &str) -> Result<Self, DetectionError> {
        let cascade: Self =
            serde_yaml::from_str(yaml).map_err(|e| DetectionError::Parse(e.to_string()))?;
        cascade.validate()?;
        Ok(cascade)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DetectionError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(DetectionError::InvalidModel("empty detection window".into()));
        }
        if self.stages.is_empty() {
            return Err(DetectionError::InvalidModel("cascade has no stages".into()));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.classifiers.is_empty() {
                return Err(DetectionError::InvalidModel(format!("stage {i} has no classifiers")));
            }
            let outside = stage.classifiers.iter().flat_map(|c| &c.rects).any(|r| {
                r.width == 0
                    || r.height == 0
                    || r.x + r.width > self.window_width
                    || r.y + r.height > self.window_height
            });
            if outside {
                return Err(DetectionError::InvalidModel(format!(
                    "stage {i} has a rectangle outside the {}x{} window",
                    self.window_width, self.window_height
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// YAML cascade model. Without one no face detector is installed.
    pub model: Option<PathBuf>,

    /// Window growth between scales.
    /// Default: 1.1
    pub scale_factor: f32,

    /// Overlapping raw hits a group needs to be reported.
    /// Default: 3
    pub min_neighbors: usize,

    /// Window step at scale 1 (pixels), grows with the scale.
    /// Default: 1
    pub step: u32,

    /// Relative corner tolerance when grouping raw hits.
    /// Default: 0.2
    pub group_eps: f32,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            model: None,
            scale_factor: 1.1,
            min_neighbors: 3,
            step: 1,
            group_eps: 0.2,
        }
    }
}

enum CascadeSource {
    File(PathBuf),
    Loaded,
}

pub struct FaceDetector {
    config: FaceConfig,
    source: CascadeSource,
    cascade: OnceCell<HaarCascade>,
}

impl FaceDetector {
    /// Detector reading its cascade from `config.model` on first use
    pub fn new(config: FaceConfig) -> Result<Self, DetectionError> {
        let path = config
            .model
            .clone()
            .ok_or_else(|| DetectionError::InvalidModel("no cascade model configured".into()))?;
        Ok(Self {
            config,
            source: CascadeSource::File(path),
            cascade: OnceCell::new(),
        })
    }

    /// Detector around an already loaded cascade
    pub fn with_cascade(config: FaceConfig, cascade: HaarCascade) -> Result<Self, DetectionError> {
        cascade.validate()?;
        Ok(Self {
            config,
            source: CascadeSource::Loaded,
            cascade: OnceCell::with_value(cascade),
        })
    }

    /// Load the cascade if it is not loaded yet. Calling it again returns the same model.
    pub fn init_cascade(&self) -> Result<&HaarCascade, DetectionError> {
        self.cascade.get_or_try_init(|| match &self.source {
            CascadeSource::File(path) => {
                let cascade = HaarCascade::load(path)?;
                log::info!(
                    "loaded face cascade {} ({} stages, {}x{} window)",
                    path.display(),
                    cascade.stages.len(),
                    cascade.window_width,
                    cascade.window_height
                );
                Ok(cascade)
            }
            CascadeSource::Loaded => Err(DetectionError::InvalidModel("cascade missing".into())),
        })
    }

    fn detect_gray(&self, cascade: &HaarCascade, gray: &GrayImage) -> Vec<DetectionRegion> {
        let integral: Integral = integral_image(gray);
        let squared: Integral = integral_squared_image(gray);
        let (width, height) = gray.dimensions();

        let mut hits = Vec::new();
        let mut scale = 1.0f32;
        loop {
            let window_w = (cascade.window_width as f32 * scale).round() as u32;
            let window_h = (cascade.window_height as f32 * scale).round() as u32;
            if window_w > width || window_h > height {
                break;
            }

            let step = ((self.config.step.max(1) as f32 * scale).round() as u32).max(1);
            for y in (0..=height - window_h).step_by(step as usize) {
                for x in (0..=width - window_w).step_by(step as usize) {
                    if evaluate(cascade, &integral, &squared, x, y, scale, window_w, window_h) {
                        hits.push(Rect::at(x as i32, y as i32).of_size(window_w, window_h));
                    }
                }
            }

            if self.config.scale_factor <= 1.0 {
                break;
            }
            scale *= self.config.scale_factor;
        }

        group_rectangles(&hits, self.config.min_neighbors, self.config.group_eps)
            .into_iter()
            .map(|(rect, neighbors)| DetectionRegion {
                rect,
                confidence: neighbors as f32
                    / (neighbors + self.config.min_neighbors.max(1)) as f32,
                category: SubjectCategory::Face,
            })
            .collect()
    }
}

impl SubjectDetector for FaceDetector {
    fn category(&self) -> SubjectCategory {
        SubjectCategory::Face
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectionRegion>, DetectionError> {
        let cascade = self.init_cascade()?;
        let faces = self.detect_gray(cascade, &grayscale(image));
        log::debug!("{} face(s) detected", faces.len());
        Ok(faces)
    }
}

fn rect_sum(integral: &Integral, x: u32, y: u32, width: u32, height: u32) -> f64 {
    sum_image_pixels(integral, x, y, x + width - 1, y + height - 1)[0] as f64
}

/// Run every stage on one window; true when all of them pass
#[allow(clippy::too_many_arguments)]
fn evaluate(
    cascade: &HaarCascade,
    integral: &Integral,
    squared: &Integral,
    x: u32,
    y: u32,
    scale: f32,
    window_w: u32,
    window_h: u32,
) -> bool {
    let area = (window_w * window_h) as f64;
    let mean = rect_sum(integral, x, y, window_w, window_h) / area;
    let variance = rect_sum(squared, x, y, window_w, window_h) / area - mean * mean;
    // flat windows would divide by ~0
    let std_dev = variance.max(0.0).sqrt().max(1.0);

    cascade.stages.iter().all(|stage| {
        let votes: f32 = stage
            .classifiers
            .iter()
            .map(|classifier| {
                let value: f64 = classifier
                    .rects
                    .iter()
                    .map(|r| {
                        let rx = x + (r.x as f32 * scale).round() as u32;
                        let ry = y + (r.y as f32 * scale).round() as u32;
                        let rw = ((r.width as f32 * scale).round() as u32)
                            .clamp(1, x + window_w - rx);
                        let rh = ((r.height as f32 * scale).round() as u32)
                            .clamp(1, y + window_h - ry);
                        // keep the feature density independent of the rounded size
                        let scaled_area = (r.width * r.height) as f64 * (scale as f64).powi(2);
                        let density = scaled_area / (rw * rh) as f64;
                        r.weight as f64 * rect_sum(integral, rx, ry, rw, rh) * density
                    })
                    .sum::<f64>()
                    / area;

                if value < classifier.threshold as f64 * std_dev {
                    classifier.left
                } else {
                    classifier.right
                }
            })
            .sum();
        votes >= stage.threshold
    })
}

fn similar(a: &Rect, b: &Rect, eps: f32) -> bool {
    let delta = eps * (a.width().min(b.width()) + a.height().min(b.height())) as f32 * 0.5;
    (a.left() - b.left()).abs() as f32 <= delta
        && (a.top() - b.top()).abs() as f32 <= delta
        && (a.right() - b.right()).abs() as f32 <= delta
        && (a.bottom() - b.bottom()).abs() as f32 <= delta
}

fn find(parents: &mut [usize], mut i: usize) -> usize {
    while parents[i] != i {
        parents[i] = parents[parents[i]];
        i = parents[i];
    }
    i
}

/// Cluster similar rectangles and average each cluster.
/// Clusters with fewer than `min_neighbors` members are dropped; 0 keeps every raw hit.
fn group_rectangles(rects: &[Rect], min_neighbors: usize, eps: f32) -> Vec<(Rect, usize)> {
    if min_neighbors == 0 {
        return rects.iter().map(|&r| (r, 1)).collect();
    }

    let mut parents: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (a, b) = (find(&mut parents, i), find(&mut parents, j));
                if a != b {
                    parents[b] = a;
                }
            }
        }
    }

    // cluster root -> (sum of left, top, width, height, members)
    let mut clusters: Vec<(usize, [i64; 4], usize)> = Vec::new();
    for (i, rect) in rects.iter().enumerate() {
        let root = find(&mut parents, i);
        let index = match clusters.iter().position(|(r, ..)| *r == root) {
            Some(index) => index,
            None => {
                clusters.push((root, [0; 4], 0));
                clusters.len() - 1
            }
        };
        let (_, sums, count) = &mut clusters[index];
        sums[0] += rect.left() as i64;
        sums[1] += rect.top() as i64;
        sums[2] += rect.width() as i64;
        sums[3] += rect.height() as i64;
        *count += 1;
    }

    clusters
        .into_iter()
        .filter(|(_, _, count)| *count >= min_neighbors)
        .map(|(_, sums, count)| {
            let n = count as i64;
            let rect = Rect::at((sums[0] / n) as i32, (sums[1] / n) as i32)
                .of_size(((sums[2] / n) as u32).max(1), ((sums[3] / n) as u32).max(1));
            (rect, count)
        })
        .collect()
}
