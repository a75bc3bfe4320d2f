//! Randomised page augmentation with box remapping.
//!
//! An [`Augmenter`] takes the clean page and its word boxes in pixel corner
//! form and returns the transformed page with the boxes moved along. The
//! worker calls [`reconcile_box_count`] on the result before trusting the
//! box order, and [`finalize_boxes`] before persisting.

use crate::bbox::{BoundingBox, BoxConvention};
use crate::config::AugmentationConfig;
use crate::error::JobError;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::noise::gaussian_noise_mut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

/// Image + box transform.
///
/// Implementations should return exactly one box per input box, in input
/// order. [`reconcile_box_count`] handles the ones that do not.
pub trait Augmenter: Send {
    fn augment(&mut self, image: &RgbImage, boxes: &[BoundingBox]) -> (RgbImage, Vec<BoundingBox>);
}

/// Identity augmenter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAugmentation;

impl Augmenter for NoAugmentation {
    fn augment(&mut self, image: &RgbImage, boxes: &[BoundingBox]) -> (RgbImage, Vec<BoundingBox>) {
        (image.clone(), boxes.to_vec())
    }
}

/// Augmenter for the configured settings, seeded per job.
pub fn augmenter_for(config: &AugmentationConfig, seed: u64) -> Box<dyn Augmenter> {
    if config.enabled {
        Box::new(DocumentAugmenter::new(
            config.clone(),
            StdRng::seed_from_u64(seed),
        ))
    } else {
        Box::new(NoAugmentation)
    }
}

/// Scanned-paper look: ink noise, brightness jitter, blur, shift and scale.
pub struct DocumentAugmenter<R> {
    config: AugmentationConfig,
    rng: R,
}

impl<R: Rng + Send> DocumentAugmenter<R> {
    pub fn new(config: AugmentationConfig, rng: R) -> Self {
        Self { config, rng }
    }

    fn chance(&mut self, p: f64) -> bool {
        self.rng.random_bool(p.clamp(0.0, 1.0))
    }

    fn in_range_f64(&mut self, [lo, hi]: [f64; 2]) -> f64 {
        if lo >= hi {
            lo
        } else {
            self.rng.random_range(lo..hi)
        }
    }

    fn in_range_f32(&mut self, [lo, hi]: [f32; 2]) -> f32 {
        if lo >= hi {
            lo
        } else {
            self.rng.random_range(lo..hi)
        }
    }

    fn shift_and_scale(
        &mut self,
        image: &RgbImage,
        boxes: Vec<BoundingBox>,
    ) -> (RgbImage, Vec<BoundingBox>) {
        let (w, h) = image.dimensions();
        let scale = self.in_range_f64(self.config.scale_range).clamp(0.1, 1.0);
        let nw = ((f64::from(w) * scale).round() as u32).max(1);
        let nh = ((f64::from(h) * scale).round() as u32).max(1);
        let (sx, sy) = (f64::from(nw) / f64::from(w), f64::from(nh) / f64::from(h));

        let max_dx = f64::from(w) * self.config.max_shift_fraction.max(0.0);
        let max_dy = f64::from(h) * self.config.max_shift_fraction.max(0.0);
        let dx = self.in_range_f64([-max_dx, max_dx]);
        let dy = self.in_range_f64([-max_dy, max_dy]);
        let ox = ((f64::from(w - nw) / 2.0) + dx).round();
        let oy = ((f64::from(h - nh) / 2.0) + dy).round();

        let resized = imageops::resize(image, nw, nh, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));
        imageops::overlay(&mut canvas, &resized, ox as i64, oy as i64);

        let moved = boxes
            .into_iter()
            .map(|b| {
                let [x1, y1, x2, y2] = b.coords;
                BoundingBox::pixel_xyxy(x1 * sx + ox, y1 * sy + oy, x2 * sx + ox, y2 * sy + oy)
            })
            .collect();
        debug!("Shift/scale: scale={scale:.3} offset=({ox}, {oy})");
        (canvas, moved)
    }
}

impl<R: Rng + Send> Augmenter for DocumentAugmenter<R> {
    fn augment(&mut self, image: &RgbImage, boxes: &[BoundingBox]) -> (RgbImage, Vec<BoundingBox>) {
        let (w, h) = image.dimensions();
        let mut out = image.clone();
        let mut boxes: Vec<BoundingBox> = boxes.iter().map(|b| b.to_pixel_xyxy(w, h)).collect();

        if self.chance(self.config.p_noise) {
            let sigma = self.in_range_f64(self.config.noise_sigma);
            let seed = self.rng.random::<u64>();
            gaussian_noise_mut(&mut out, 0.0, sigma, seed);
        }

        if self.chance(self.config.p_brightness) {
            let factor = self.in_range_f32(self.config.brightness_range);
            for px in out.pixels_mut() {
                for c in px.0.iter_mut() {
                    *c = (f32::from(*c) * factor).round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        if self.chance(self.config.p_blur) {
            let sigma = self.in_range_f32(self.config.blur_sigma);
            if sigma > 0.0 {
                out = gaussian_blur_f32(&out, sigma);
            }
        }

        if self.chance(self.config.p_shift) {
            let (shifted, moved) = self.shift_and_scale(&out, boxes);
            out = shifted;
            boxes = moved;
        }

        (out, boxes)
    }
}

/// Restore one box per input when an augmenter over-produces.
///
/// When more boxes come back than went in, only the even-indexed ones are
/// kept. This assumes the extras come in adjacent pairs; it is a heuristic,
/// and anything it cannot reduce to `expected` fails the job.
pub fn reconcile_box_count(
    expected: usize,
    boxes: Vec<BoundingBox>,
) -> Result<Vec<BoundingBox>, JobError> {
    let got = boxes.len();
    if got == expected {
        return Ok(boxes);
    }
    if got > expected {
        let kept: Vec<BoundingBox> = boxes.into_iter().step_by(2).collect();
        warn!(
            "Augmenter returned {got} boxes for {expected} inputs; kept {} even-indexed",
            kept.len()
        );
        if kept.len() == expected {
            return Ok(kept);
        }
        return Err(JobError::AugmentationCountMismatch {
            expected,
            got: kept.len(),
        });
    }
    Err(JobError::AugmentationCountMismatch { expected, got })
}

/// Order, clamp and snap boxes to whole pixels of a `width × height` image.
pub fn finalize_boxes(boxes: &[BoundingBox], width: u32, height: u32) -> Vec<BoundingBox> {
    boxes
        .iter()
        .map(|b| match b.convention {
            BoxConvention::PixelXyxy => b.snapped(width, height),
            _ => b.to_pixel_xyxy(width, height).snapped(width, height),
        })
        .collect()
}
