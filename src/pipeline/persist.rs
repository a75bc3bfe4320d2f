//! Staging writes: one PNG plus its `<image>.json` annotation per page.
//!
//! The image is written first and the annotation second, each through a
//! temp file in the same directory that is renamed into place. A crash can
//! therefore leave an image without an annotation (rejected at merge), but
//! never a truncated file under its final name.

use crate::bbox::{BoundingBox, BoxConvention};
use crate::error::{JobError, PairRejection};
use crate::pipeline::extract::Annotation;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk annotation format: page-normalised `[x, y, w, h]` boxes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationFile {
    pub words: Vec<String>,
    pub bboxes: Vec<[f64; 4]>,
}

impl AnnotationFile {
    /// Pair words with boxes of the same page. Every box is converted to
    /// `FractionalXywh` against `width × height`.
    pub fn new(words: Vec<String>, boxes: &[BoundingBox], width: u32, height: u32) -> Self {
        let bboxes = boxes
            .iter()
            .map(|b| match b.convention {
                BoxConvention::FractionalXywh => b.coords,
                _ => b.to_fractional_xywh(width, height).coords,
            })
            .collect();
        Self { words, bboxes }
    }

    pub fn is_consistent(&self) -> bool {
        self.words.len() == self.bboxes.len()
    }

    pub fn read(path: &Path) -> Result<Self, PairRejection> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PairRejection::MissingAnnotation(path.to_path_buf())
            } else {
                PairRejection::Unreadable {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                }
            }
        })?;
        serde_json::from_str(&text).map_err(|e| PairRejection::Unreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// `im_<slot>_<page>.png`, zero-padded so that name order is slot order.
pub fn staging_image_name(slot: usize, page: usize) -> String {
    format!("im_{slot:06}_{page:03}.png")
}

/// `<image>.json` beside the image.
pub fn annotation_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

/// `<stem>_colored.png` beside the image.
pub fn colored_path(image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    image.with_file_name(format!("{stem}_colored.png"))
}

/// Paths of one written pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPair {
    pub image: PathBuf,
    pub annotation: PathBuf,
}

/// Write `image` and its annotation into `dir` under `name`.
pub fn write_pair(
    dir: &Path,
    name: &str,
    image: &RgbImage,
    annotation: &AnnotationFile,
) -> Result<StagedPair, JobError> {
    let image_path = dir.join(name);
    let annotation_path = annotation_path(&image_path);

    write_png(&image_path, image)?;

    let json = serde_json::to_vec(annotation).map_err(|e| persist_err(&annotation_path, e))?;
    write_atomic(&annotation_path, &json)?;

    debug!(
        "Staged {} ({} words)",
        image_path.display(),
        annotation.words.len()
    );
    Ok(StagedPair {
        image: image_path,
        annotation: annotation_path,
    })
}

/// Write the tagged render with every detected box outlined in red.
pub fn write_debug_image(
    path: &Path,
    colored: &RgbImage,
    annotations: &[Annotation],
) -> Result<(), JobError> {
    let (w, h) = colored.dimensions();
    let mut canvas = colored.clone();
    for a in annotations {
        let [x1, y1, x2, y2] = a.bbox.to_pixel_xyxy(w, h).ordered().coords;
        let (width, height) = ((x2 - x1).round() as u32, (y2 - y1).round() as u32);
        if width == 0 || height == 0 {
            continue;
        }
        let rect = Rect::at(x1.round() as i32, y1.round() as i32).of_size(width, height);
        draw_hollow_rect_mut(&mut canvas, rect, Rgb([255, 0, 0]));
    }
    write_png(path, &canvas)
}

fn write_png(path: &Path, image: &RgbImage) -> Result<(), JobError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| persist_err(path, e))?;
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), JobError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| persist_err(path, e))?;
    tmp.write_all(bytes).map_err(|e| persist_err(path, e))?;
    tmp.persist(path).map_err(|e| persist_err(path, e.error))?;
    Ok(())
}

fn persist_err(path: &Path, e: impl std::fmt::Display) -> JobError {
    JobError::Persist {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn names_sort_by_slot_then_page() {
        let mut names = vec![
            staging_image_name(10, 0),
            staging_image_name(2, 1),
            staging_image_name(2, 0),
        ];
        names.sort();
        assert_eq!(
            names,
            ["im_000002_000.png", "im_000002_001.png", "im_000010_000.png"]
        );
    }

    #[test]
    fn sibling_paths() {
        let img = Path::new("/tmp/x/im_000001_000.png");
        assert_eq!(
            annotation_path(img),
            PathBuf::from("/tmp/x/im_000001_000.png.json")
        );
        assert_eq!(
            colored_path(img),
            PathBuf::from("/tmp/x/im_000001_000_colored.png")
        );
    }

    #[test]
    fn annotation_file_converts_to_xywh() {
        let boxes = [BoundingBox::pixel_xyxy(10.0, 20.0, 60.0, 40.0)];
        let file = AnnotationFile::new(vec!["w".into()], &boxes, 100, 100);
        assert_eq!(file.bboxes, vec![[0.1, 0.2, 0.5, 0.2]]);
        assert!(file.is_consistent());
    }

    #[test]
    fn writes_pair_and_reads_it_back() {
        let dir = TempDir::new().unwrap();
        let image = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
        let annotation = AnnotationFile {
            words: vec!["a".into(), "b".into()],
            bboxes: vec![[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 0.5, 0.5]],
        };
        let pair = write_pair(dir.path(), "im_000000_000.png", &image, &annotation).unwrap();
        assert!(pair.image.exists());
        assert_eq!(AnnotationFile::read(&pair.annotation).unwrap(), annotation);
        let decoded = image::open(&pair.image).unwrap();
        assert_eq!(decoded.width(), 8);
    }

    #[test]
    fn read_reports_missing_and_garbage() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.png.json");
        assert!(matches!(
            AnnotationFile::read(&missing),
            Err(PairRejection::MissingAnnotation(_))
        ));

        let garbage = dir.path().join("bad.png.json");
        std::fs::write(&garbage, "{not json").unwrap();
        assert!(matches!(
            AnnotationFile::read(&garbage),
            Err(PairRejection::Unreadable { .. })
        ));
    }

    #[test]
    fn debug_image_outlines_boxes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbg.png");
        let page = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let ann = Annotation {
            word: "w".into(),
            bbox: BoundingBox::fractional_xyxy(0.1, 0.1, 0.5, 0.3),
        };
        write_debug_image(&path, &page, &[ann]).unwrap();
        let out = image::open(&path).unwrap().to_rgb8();
        assert_eq!(*out.get_pixel(10, 10), Rgb([255, 0, 0]));
        assert_eq!(*out.get_pixel(30, 20), Rgb([255, 255, 255]));
    }
}
