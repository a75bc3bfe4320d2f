//! Word boxes from a tagged render.
//!
//! Every word of a tagged page sits on a solid rectangle of its own color, on
//! a white page. Recovery therefore needs no OCR:
//!
//! 1. Binarise: any pixel whose luma is below pure white is foreground.
//! 2. Trace the outermost contour of every foreground region.
//! 3. Simplify each contour to a polygon with tolerance `0.015 × perimeter`
//!    and keep only those with exactly four vertices.
//! 4. Take the axis-aligned bounding rectangle, sample the color one pixel
//!    inside its top-left corner and look it up in the registry.
//!
//! Contours that fail step 3 or 4 are counted as [`ExtractionMiss`] and
//! dropped. Annotations come out in contour discovery order (raster order of
//! each region's top-left pixel), which is stable for a given image.

use crate::bbox::BoundingBox;
use crate::color::{Color, ColorRegistry};
use crate::error::ExtractionMiss;
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use tracing::debug;

/// Luma at or below this is foreground.
const FOREGROUND_MAX_LUMA: u8 = 254;

/// Polygon tolerance as a fraction of the contour perimeter.
const APPROX_EPSILON_FRACTION: f64 = 0.015;

/// Blank border added around the mask. `find_contours` never starts an outer
/// border in column 0, so regions touching the left edge need it.
const MASK_PADDING: i32 = 1;

/// A recovered word and its box as `FractionalXyxy` of the tagged page.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub word: String,
    pub bbox: BoundingBox,
}

/// Counters for one extraction call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub contours: usize,
    pub accepted: usize,
    pub not_quadrilateral: usize,
    pub unregistered: usize,
}

impl ExtractionStats {
    fn record(&mut self, miss: ExtractionMiss) {
        match miss {
            ExtractionMiss::NotQuadrilateral { .. } => self.not_quadrilateral += 1,
            ExtractionMiss::UnregisteredColor(_) => self.unregistered += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageAnnotations {
    pub annotations: Vec<Annotation>,
    pub stats: ExtractionStats,
}

/// Pixel rectangle of an accepted quadrilateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Matches colored quadrilaterals on a page back to the words they tag.
pub struct AnnotationExtractor<'a> {
    registry: &'a ColorRegistry,
}

impl<'a> AnnotationExtractor<'a> {
    pub fn new(registry: &'a ColorRegistry) -> Self {
        Self { registry }
    }

    pub fn extract(&self, page: &RgbImage) -> PageAnnotations {
        let (width, height) = page.dimensions();
        let mut out = PageAnnotations::default();
        if width == 0 || height == 0 {
            return out;
        }
        let (w, h) = (f64::from(width), f64::from(height));

        let mask = foreground_mask(page);
        for contour in find_contours::<i32>(&mask)
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        {
            out.stats.contours += 1;
            match self.classify(page, contour) {
                Ok((word, rect)) => {
                    let (x, y) = (f64::from(rect.x), f64::from(rect.y));
                    let bbox = BoundingBox::fractional_xyxy(
                        x / w,
                        y / h,
                        (x + f64::from(rect.width)) / w,
                        (y + f64::from(rect.height)) / h,
                    );
                    out.annotations.push(Annotation {
                        word: word.to_string(),
                        bbox,
                    });
                    out.stats.accepted += 1;
                }
                Err(miss) => out.stats.record(miss),
            }
        }

        debug!(
            "Extracted {} of {} contours ({} non-quad, {} unregistered)",
            out.stats.accepted,
            out.stats.contours,
            out.stats.not_quadrilateral,
            out.stats.unregistered
        );
        out
    }

    fn classify(
        &self,
        page: &RgbImage,
        contour: &Contour<i32>,
    ) -> Result<(&'a str, PixelRect), ExtractionMiss> {
        let points: Vec<Point<i32>> = contour
            .points
            .iter()
            .map(|p| Point::new(p.x - MASK_PADDING, p.y - MASK_PADDING))
            .collect();
        let polygon = approx_closed_polygon(&points);
        if polygon.len() != 4 {
            return Err(ExtractionMiss::NotQuadrilateral {
                vertices: polygon.len(),
            });
        }
        let rect = bounding_rect(&polygon);
        // A one-pixel-wide region has no inset pixel on the page edge.
        let color = sample_inset(page, &rect)
            .ok_or(ExtractionMiss::UnregisteredColor(Color::WHITE))?;
        let word = self
            .registry
            .lookup(&color)
            .ok_or(ExtractionMiss::UnregisteredColor(color))?;
        Ok((word, rect))
    }
}

/// Foreground mask padded by [`MASK_PADDING`] on every side.
fn foreground_mask(page: &RgbImage) -> GrayImage {
    let gray = image::imageops::grayscale(page);
    let pad = MASK_PADDING as u32;
    GrayImage::from_fn(gray.width() + 2 * pad, gray.height() + 2 * pad, |x, y| {
        let inside = x >= pad && y >= pad && x - pad < gray.width() && y - pad < gray.height();
        if inside && gray.get_pixel(x - pad, y - pad)[0] <= FOREGROUND_MAX_LUMA {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Closed-contour simplification with tolerance relative to the perimeter.
fn approx_closed_polygon(points: &[Point<i32>]) -> Vec<Point<i32>> {
    let epsilon = APPROX_EPSILON_FRACTION * arc_length(points, true);
    approximate_polygon_dp(points, epsilon, true)
}

/// Color one pixel inside the top-left corner, if that pixel is on the page.
fn sample_inset(page: &RgbImage, rect: &PixelRect) -> Option<Color> {
    let (x, y) = (rect.x + 1, rect.y + 1);
    if x >= page.width() || y >= page.height() {
        return None;
    }
    Some(Color::from(*page.get_pixel(x, y)))
}

/// Inclusive pixel bounds, so a single pixel has width 1.
fn bounding_rect(points: &[Point<i32>]) -> PixelRect {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0).max(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0).max(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0).max(min_x);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0).max(min_y);
    PixelRect {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorAllocator;
    use image::Rgb;
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;

    fn blank(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))
    }

    fn assert_box(bbox: &BoundingBox, expected: [f64; 4]) {
        for (a, b) in bbox.coords.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9, "{:?} != {expected:?}", bbox.coords);
        }
    }

    #[test]
    fn rectangle_outline_simplifies_to_four_corners() {
        let mut points = Vec::new();
        for x in 0..20 {
            points.push(Point::new(x, 0));
        }
        for y in 1..10 {
            points.push(Point::new(19, y));
        }
        for x in (0..19).rev() {
            points.push(Point::new(x, 9));
        }
        for y in (1..9).rev() {
            points.push(Point::new(0, y));
        }
        let poly = approx_closed_polygon(&points);
        assert_eq!(poly.len(), 4, "{poly:?}");
        assert_eq!(bounding_rect(&poly), PixelRect { x: 0, y: 0, width: 20, height: 10 });
    }

    #[test]
    fn single_word_page() {
        let mut alloc = ColorAllocator::new(10);
        let color = alloc.tag("hello").unwrap();
        let registry = alloc.into_registry();

        let mut page = blank(200, 100);
        draw_filled_rect_mut(&mut page, Rect::at(50, 40).of_size(60, 20), color.to_rgb());

        let result = AnnotationExtractor::new(&registry).extract(&page);
        assert_eq!(result.annotations.len(), 1);
        assert_eq!(result.annotations[0].word, "hello");
        assert_box(&result.annotations[0].bbox, [0.25, 0.4, 0.55, 0.6]);
        assert_eq!(result.stats.accepted, 1);
    }

    #[test]
    fn disjoint_registered_rectangles_all_found() {
        let mut alloc = ColorAllocator::new(50);
        let mut page = blank(400, 300);
        let words = ["alpha", "beta", "gamma", "delta", "beta"];
        for (i, word) in words.iter().enumerate() {
            let color = alloc.tag(word).unwrap();
            let x = 10 + (i as i32 % 3) * 120;
            let y = 10 + (i as i32 / 3) * 80;
            draw_filled_rect_mut(&mut page, Rect::at(x, y).of_size(90, 30), color.to_rgb());
        }
        let registry = alloc.into_registry();

        let result = AnnotationExtractor::new(&registry).extract(&page);
        assert_eq!(result.annotations.len(), words.len());
        let mut found: Vec<_> = result.annotations.iter().map(|a| a.word.as_str()).collect();
        found.sort_unstable();
        assert_eq!(found, ["alpha", "beta", "beta", "delta", "gamma"]);
    }

    #[test]
    fn rectangles_on_page_edges_are_found() {
        let mut alloc = ColorAllocator::new(10);
        let mut page = blank(200, 100);
        for (word, x, y) in [("top", 0, 0), ("left", 0, 40), ("corner", 170, 90)] {
            let color = alloc.tag(word).unwrap();
            draw_filled_rect_mut(&mut page, Rect::at(x, y).of_size(30, 10), color.to_rgb());
        }
        let registry = alloc.into_registry();

        let result = AnnotationExtractor::new(&registry).extract(&page);
        assert_eq!(result.stats.contours, 3);
        assert_eq!(result.annotations.len(), 3);
        let by_word = |w: &str| {
            result
                .annotations
                .iter()
                .find(|a| a.word == w)
                .map(|a| a.bbox)
                .unwrap()
        };
        assert_box(&by_word("top"), [0.0, 0.0, 0.15, 0.1]);
        assert_box(&by_word("left"), [0.0, 0.4, 0.15, 0.5]);
        assert_box(&by_word("corner"), [0.85, 0.9, 1.0, 1.0]);
    }

    #[test]
    fn unregistered_color_is_skipped() {
        let mut alloc = ColorAllocator::new(10);
        let known = alloc.tag("known").unwrap();
        let registry = alloc.into_registry();

        let mut page = blank(200, 100);
        draw_filled_rect_mut(&mut page, Rect::at(10, 10).of_size(40, 15), known.to_rgb());
        draw_filled_rect_mut(&mut page, Rect::at(100, 50).of_size(40, 15), Rgb([200, 10, 10]));

        let result = AnnotationExtractor::new(&registry).extract(&page);
        assert_eq!(result.annotations.len(), 1);
        assert_eq!(result.annotations[0].word, "known");
        assert_eq!(result.stats.unregistered, 1);
    }

    #[test]
    fn round_blob_is_not_a_word() {
        let mut alloc = ColorAllocator::new(10);
        let color = alloc.tag("dot").unwrap();
        let registry = alloc.into_registry();

        let mut page = blank(200, 200);
        draw_filled_circle_mut(&mut page, (100, 100), 40, color.to_rgb());

        let result = AnnotationExtractor::new(&registry).extract(&page);
        assert!(result.annotations.is_empty());
        assert_eq!(result.stats.not_quadrilateral, 1);
    }

    #[test]
    fn extraction_is_idempotent() {
        let mut alloc = ColorAllocator::new(20);
        let mut page = blank(300, 120);
        for (i, word) in ["one", "two", "three"].iter().enumerate() {
            let color = alloc.tag(word).unwrap();
            draw_filled_rect_mut(
                &mut page,
                Rect::at(10 + i as i32 * 95, 30).of_size(80, 25),
                color.to_rgb(),
            );
        }
        let registry = alloc.into_registry();
        let extractor = AnnotationExtractor::new(&registry);
        assert_eq!(extractor.extract(&page), extractor.extract(&page));
    }

    #[test]
    fn blank_page_yields_nothing() {
        let registry = ColorRegistry::new();
        let result = AnnotationExtractor::new(&registry).extract(&blank(50, 50));
        assert!(result.annotations.is_empty());
        assert_eq!(result.stats.contours, 0);
    }
}
