use std::io::Write;

use image::{Luma, Rgb, RgbImage};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use rand::{rngs::StdRng, Rng, SeedableRng};
use roomscan::{
    diminish::{
        composite,
        face::{HaarCascade, Stage, WeakClassifier, WeightedRect},
        DifferenceMasker, ImageAligner, Mask, SubjectCategory,
    },
    interchange::{from_rgb_image, to_rgb_image, PixelLayout},
    overlay, Config, Diminisher,
};

const BACKGROUND: Rgb<u8> = Rgb([40, 120, 200]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);

/// Object-free and occupied captures: a 10x10 red square at (40, 40)
fn red_square_scene() -> (RgbImage, RgbImage) {
    let clean = RgbImage::from_pixel(100, 100, BACKGROUND);
    let mut occupied = clean.clone();
    draw_filled_rect_mut(&mut occupied, Rect::at(40, 40).of_size(10, 10), RED);
    (clean, occupied)
}

fn textured(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut image = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
    for _ in 0..width * height / 150 {
        let v = if rng.gen_bool(0.5) { rng.gen_range(0..50) } else { rng.gen_range(200..=255) };
        let rect = Rect::at(rng.gen_range(0..width as i32), rng.gen_range(0..height as i32))
            .of_size(rng.gen_range(3..10), rng.gen_range(3..10));
        draw_filled_rect_mut(&mut image, rect, Rgb([v, v, v]));
    }
    image
}

fn inside_square(x: u32, y: u32) -> bool {
    (40..50).contains(&x) && (40..50).contains(&y)
}

#[test]
fn red_square_is_diminished() {
    let (clean, occupied) = red_square_scene();
    let result = Diminisher::default().run(&clean, &occupied).unwrap();

    // mask: ~0 away from the square, ~1 in its core
    for (x, y, weight) in result.mask.enumerate_pixels() {
        let w = weight.0[0];
        if (43..47).contains(&x) && (43..47).contains(&y) {
            assert!(w > 0.99, "({x}, {y}) = {w}");
        }
        if !(36..54).contains(&x) || !(36..54).contains(&y) {
            assert_eq!(w, 0.0, "({x}, {y})");
        }
    }

    // output: the target everywhere the captures agree, the source in the square's core
    for (x, y, pixel) in result.image.enumerate_pixels() {
        if !inside_square(x, y) {
            assert_eq!(pixel, occupied.get_pixel(x, y));
        }
    }
    assert_eq!(result.image.get_pixel(45, 45), &BACKGROUND);

    // feathered edge: the square's border is a blend of both captures
    let edge = result.image.get_pixel(40, 45).0;
    assert!(edge[0] < RED.0[0] && edge[0] > BACKGROUND.0[0], "{:?}", edge);
    assert!(edge[2] > RED.0[2] && edge[2] < BACKGROUND.0[2], "{:?}", edge);

    // inputs are untouched
    assert_eq!(occupied.get_pixel(45, 45), &RED);
}

#[test]
fn composite_of_identical_images_is_identity() {
    let image = textured(64, 48, 3);
    let mut rng = StdRng::seed_from_u64(1);
    let mask = Mask::from_fn(64, 48, |_, _| Luma([rng.gen_range(0.0..=1.0)]));
    assert_eq!(composite(&image, &image, &mask).unwrap(), image);
}

#[test]
fn identical_images_have_empty_mask() {
    let image = textured(64, 48, 5);
    let mask = DifferenceMasker::default().compute_mask(&image, &image, None).unwrap();
    assert!(mask.pixels().all(|p| p.0[0] == 0.0));
}

#[test]
fn identical_images_align_to_identity() {
    let image = textured(200, 160, 11);
    let transform = ImageAligner::default().align(&image, &image).unwrap();
    let deviation = (transform.homography.0 - nalgebra::Matrix3::identity()).abs().max();
    assert!(deviation < 1e-6, "{}", deviation);
}

#[test]
fn failed_alignment_returns_no_image() {
    let config = Config::from_yaml("diminish:\n  identity_fallback: false\n").unwrap();
    let diminisher = Diminisher::from_config(&config).unwrap();
    let (clean, occupied) = red_square_scene();
    assert!(diminisher.diminish(&clean, &occupied).is_err());
}

#[test]
fn configured_detectors_protect_subjects() {
    // bright-over-dark edge detector standing in for a trained face cascade
    let cascade = HaarCascade {
        window_width: 8,
        window_height: 8,
        stages: vec![Stage {
            threshold: 0.5,
            classifiers: vec![WeakClassifier {
                rects: vec![
                    WeightedRect { x: 0, y: 0, width: 8, height: 4, weight: 1.0 },
                    WeightedRect { x: 0, y: 4, width: 8, height: 4, weight: -1.0 },
                ],
                threshold: 0.5,
                left: 0.0,
                right: 1.0,
            }],
        }],
    };
    let mut model = tempfile::NamedTempFile::new().unwrap();
    model.write_all(serde_yaml::to_string(&cascade).unwrap().as_bytes()).unwrap();

    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    let model_path = model.path().display();
    writeln!(config_file, "face:\n  model: {}\n  min_neighbors: 1", model_path).unwrap();
    writeln!(config_file, "object:\n  min_area: 20").unwrap();
    let config = Config::load(config_file.path()).unwrap();
    let diminisher = Diminisher::from_config(&config).unwrap();

    let clean = RgbImage::new(60, 60);
    let mut occupied = clean.clone();
    // a "face" and a red object, both absent from the clean capture
    draw_filled_rect_mut(&mut occupied, Rect::at(10, 10).of_size(8, 4), Rgb([255, 255, 255]));
    draw_filled_rect_mut(&mut occupied, Rect::at(40, 40).of_size(6, 6), RED);

    let subjects = diminisher.detect_subjects(&occupied).unwrap();
    assert!(subjects.iter().any(|s| s.category == SubjectCategory::Face));
    assert!(subjects.iter().any(|s| s.category == SubjectCategory::Object));

    let result = diminisher.run(&clean, &occupied).unwrap();
    assert_eq!(result.image.get_pixel(12, 11), &Rgb([255, 255, 255]));
    assert_eq!(result.image.get_pixel(42, 42), &RED);

    let annotated = overlay::draw_detections(&result.image, &result.subjects);
    assert_eq!(annotated.dimensions(), result.image.dimensions());
}

#[test]
fn platform_bitmaps_round_trip_through_the_pipeline() {
    let (clean, occupied) = red_square_scene();
    let clean_bgra = from_rgb_image(&clean, PixelLayout::Bgra8);
    let occupied_bgra = from_rgb_image(&occupied, PixelLayout::Bgra8);

    let source = to_rgb_image(&clean_bgra, 100, 100, 400, PixelLayout::Bgra8).unwrap();
    let target = to_rgb_image(&occupied_bgra, 100, 100, 400, PixelLayout::Bgra8).unwrap();
    let diminished = Diminisher::default().diminish(&source, &target).unwrap();
    let out = from_rgb_image(&diminished, PixelLayout::Bgra8);

    let center = (45 * 100 + 45) * 4;
    assert_eq!(&out[center..center + 4], &[200, 120, 40, 255]);
}
