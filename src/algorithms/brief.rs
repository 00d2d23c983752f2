use image::{GenericImageView, GrayImage};
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Number of point-pair tests available in the sampling pattern
pub const MAX_DESCRIPTOR_BITS: usize = 512;

pub type BinaryDescriptor<const N: usize> = [u8; N];

/// Compute BRIEF (Binary Robust Independent Elementary Features) around the keypoint `(x, y)`
/// of a grayscale image.
///
/// Sample points falling outside the image read as `0`.
///
/// ### CAUTION
/// const N Generic should be less than `512 / u8::BITS = 64`
pub fn compute_descriptor<const N: usize>(
    x: u32,
    y: u32,
    image: &GrayImage,
) -> BinaryDescriptor<N> {
    const BITS: usize = u8::BITS as _;

    let (width, height) = (image.width() as i64, image.height() as i64);
    let sample = |px: i64, py: i64| -> u8 {
        if px >= 0 && px < width && py >= 0 && py < height {
            // SAFETY: bounds are checked right above
            unsafe { image.unsafe_get_pixel(px as u32, py as u32).0[0] }
        } else {
            0
        }
    };

    let mut brief_descriptor = [0; N];
    for (i, byte) in brief_descriptor.iter_mut().enumerate() {
        for j in 0..BITS {
            let [p1x, p1y, p2x, p2y] = BRIEF512_SAMPLES[i * BITS + j];

            let first = sample(x as i64 + p1x as i64, y as i64 + p1y as i64);
            let second = sample(x as i64 + p2x as i64, y as i64 + p2y as i64);

            *byte = (*byte << 1) | u8::from(first > second);
        }
    }

    brief_descriptor
}

/// Precomputed samples taken up to 512 bits for BRIEF point samples.
/// The values remain consistent across images, because the same pattern has to be used
/// for two descriptors to be comparable.
static BRIEF512_SAMPLES: Lazy<[[i16; 4]; MAX_DESCRIPTOR_BITS]> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(42);

    // isotropic gaussian with sigma = S / 5 for an S x S patch (S = 31), clipped to the patch
    const PATCH_RADIUS: f64 = 15.0;
    let normal_dist: Normal<f64> = match Normal::new(0.0, 31.0 / 5.0) {
        Ok(dist) => dist,
        Err(_) => unreachable!("standard deviation is a finite positive constant"),
    };
    let mut draw = || {
        normal_dist
            .sample(&mut rng)
            .round()
            .clamp(-PATCH_RADIUS, PATCH_RADIUS) as i16
    };

    let mut samples = [[0; 4]; MAX_DESCRIPTOR_BITS];
    for sample in samples.iter_mut() {
        *sample = [draw(), draw(), draw(), draw()];
    }

    samples
});
