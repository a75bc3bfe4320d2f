//! Bounding boxes tagged with their coordinate convention.
//!
//! Three conventions meet in the pipeline:
//!
//! | Convention       | Produced by        | Consumed by         |
//! |------------------|--------------------|---------------------|
//! | `FractionalXyxy` | extraction         | clean-page rescale  |
//! | `PixelXyxy`      | clean-page rescale | augmentation        |
//! | `FractionalXywh` | post-augmentation  | persisted JSON      |
//!
//! A box always knows which one it is in, and conversions go through
//! [`BoundingBox::to_pixel_xyxy`], [`BoundingBox::to_fractional_xyxy`] and
//! [`BoundingBox::to_fractional_xywh`]. Each conversion needs the page size
//! the box refers to; fractional boxes are page-size independent, which is
//! what lets a box measured on the 1500 px tagged render land on the 1024 px
//! clean render.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxConvention {
    /// `[x1, y1, x2, y2]` in pixels.
    PixelXyxy,
    /// `[x1, y1, x2, y2]` as fractions of page width/height.
    FractionalXyxy,
    /// `[x, y, w, h]` as fractions of page width/height.
    FractionalXywh,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub convention: BoxConvention,
    pub coords: [f64; 4],
}

impl BoundingBox {
    pub fn pixel_xyxy(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            convention: BoxConvention::PixelXyxy,
            coords: [x1, y1, x2, y2],
        }
    }

    pub fn fractional_xyxy(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            convention: BoxConvention::FractionalXyxy,
            coords: [x1, y1, x2, y2],
        }
    }

    pub fn fractional_xywh(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            convention: BoxConvention::FractionalXywh,
            coords: [x, y, w, h],
        }
    }

    /// Corner form in pixels of a `width × height` page.
    pub fn to_pixel_xyxy(&self, width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        let [a, b, c, d] = self.coords;
        match self.convention {
            BoxConvention::PixelXyxy => *self,
            BoxConvention::FractionalXyxy => Self::pixel_xyxy(a * w, b * h, c * w, d * h),
            BoxConvention::FractionalXywh => {
                Self::pixel_xyxy(a * w, b * h, (a + c) * w, (b + d) * h)
            }
        }
    }

    /// Corner form as fractions of a `width × height` page.
    pub fn to_fractional_xyxy(&self, width: u32, height: u32) -> Self {
        let [a, b, c, d] = self.coords;
        match self.convention {
            BoxConvention::FractionalXyxy => *self,
            BoxConvention::FractionalXywh => Self::fractional_xyxy(a, b, a + c, b + d),
            BoxConvention::PixelXyxy => {
                let (w, h) = (f64::from(width), f64::from(height));
                Self::fractional_xyxy(a / w, b / h, c / w, d / h)
            }
        }
    }

    /// Origin-and-size form as fractions of a `width × height` page.
    pub fn to_fractional_xywh(&self, width: u32, height: u32) -> Self {
        match self.convention {
            BoxConvention::FractionalXywh => *self,
            BoxConvention::FractionalXyxy => {
                let [x1, y1, x2, y2] = self.coords;
                Self::fractional_xywh(x1, y1, x2 - x1, y2 - y1)
            }
            BoxConvention::PixelXyxy => {
                let [x1, y1, x2, y2] = self.coords;
                let (w, h) = (f64::from(width), f64::from(height));
                Self::fractional_xywh(x1 / w, y1 / h, (x2 - x1) / w, (y2 - y1) / h)
            }
        }
    }

    /// Swap flipped corners so that `x1 ≤ x2` and `y1 ≤ y2`.
    ///
    /// Only meaningful for corner conventions; `FractionalXywh` is returned
    /// unchanged.
    pub fn ordered(&self) -> Self {
        match self.convention {
            BoxConvention::FractionalXywh => *self,
            _ => {
                let [x1, y1, x2, y2] = self.coords;
                Self {
                    convention: self.convention,
                    coords: [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)],
                }
            }
        }
    }

    /// Clamp a pixel box to the page and truncate it to whole pixels.
    pub fn snapped(&self, width: u32, height: u32) -> Self {
        let [x1, y1, x2, y2] = self.to_pixel_xyxy(width, height).ordered().coords;
        let clamp_x = |v: f64| v.clamp(0.0, f64::from(width)).trunc();
        let clamp_y = |v: f64| v.clamp(0.0, f64::from(height)).trunc();
        Self::pixel_xyxy(clamp_x(x1), clamp_y(y1), clamp_x(x2), clamp_y(y2))
    }
}
