//! Pipeline stages of one generation job.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the render or augmentation backend swapped without touching the
//! rest.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ build ──▶ render ──▶ extract ──▶ strip ──▶ render ──▶ augment ──▶ persist
//! (HTTP)   (tagged)  (service  (contours)            (clean)    (remap)     (staging)
//!                     + pdfium)
//! ```
//!
//! 1. [`fetch`]   — GET the page with a bounded timeout
//! 2. [`render`]  — document → PDF via the conversion service, PDF → pages
//!    via pdfium on the blocking pool; calls into one service are serialised
//! 3. [`extract`] — recover `(word, box)` pairs from the tagged render
//! 4. [`augment`] — randomised transforms that carry the boxes along
//! 5. [`persist`] — PNG + JSON pairs in the worker's staging directory
//!
//! Document building and color stripping live in [`crate::builder`] and
//! [`crate::document`]; the sequencing lives in [`crate::worker`].

pub mod augment;
pub mod extract;
pub mod fetch;
pub mod persist;
pub mod render;
