//! One worker process: a conversion service, a bounded job pool, a staging
//! directory.
//!
//! ## Job state machine
//!
//! ```text
//! Fetch → BuildColored → RenderColored → Extract → StripColor → RenderClean
//!       → AugmentAndRemap → Persist
//! ```
//!
//! Every stage returns `Result<_, JobError>`; the first error ends the job and
//! is logged by [`GenerationWorker::run`]. Sibling jobs never see it.
//!
//! ## Concurrency
//!
//! Up to `max_threads` jobs are in flight at once (`buffer_unordered`).
//! Fetches overlap freely, extraction and persistence run on the blocking
//! pool, and calls into the conversion service go through the worker's
//! [`SerializedRenderer`], so there is never more than one in flight.

use crate::bbox::BoundingBox;
use crate::builder::DocumentBuilder;
use crate::color::ColorAllocator;
use crate::config::GeneratorConfig;
use crate::error::{JobError, SynthError};
use crate::pipeline::augment::{augmenter_for, finalize_boxes, reconcile_box_count};
use crate::pipeline::extract::{AnnotationExtractor, PageAnnotations};
use crate::pipeline::fetch::{fetch_page, http_client};
use crate::pipeline::persist::{
    colored_path, staging_image_name, write_debug_image, write_pair, AnnotationFile,
};
use crate::pipeline::render::{
    RasterOptions, RenderClient, RenderedPage, SerializedRenderer, UnoRenderClient,
};
use crate::service::ConversionService;
use futures::stream::{self, StreamExt};
use image::imageops::{self, FilterType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name of the per-worker counters inside its staging directory.
pub const REPORT_FILE: &str = "worker_report.json";

// ── Manifest and report ──────────────────────────────────────────────────

/// Everything a worker process needs, handed over as JSON by the
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerManifest {
    pub worker_index: usize,
    /// Global index of `urls[0]`. Job slots (and staging names) continue
    /// from here.
    pub first_slot: usize,
    pub urls: Vec<String>,
    pub port: u16,
    pub uno_port: u16,
    pub staging_dir: PathBuf,
    pub config: GeneratorConfig,
}

impl WorkerManifest {
    pub fn read(path: &Path) -> Result<Self, SynthError> {
        let text = std::fs::read_to_string(path).map_err(|e| SynthError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| SynthError::ConfigLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), SynthError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| SynthError::Internal(format!("manifest serialization: {e}")))?;
        std::fs::write(path, json).map_err(|e| SynthError::io(path, e))
    }
}

/// Counters of one worker process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub images_written: usize,
}

impl WorkerReport {
    pub fn read(dir: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(dir.join(REPORT_FILE)).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn write(&self, dir: &Path) -> Result<(), SynthError> {
        let path = dir.join(REPORT_FILE);
        let json = serde_json::to_vec(self)
            .map_err(|e| SynthError::Internal(format!("report serialization: {e}")))?;
        std::fs::write(&path, json).map_err(|e| SynthError::io(path, e))
    }

    pub fn merge(&mut self, other: &WorkerReport) {
        self.jobs_succeeded += other.jobs_succeeded;
        self.jobs_failed += other.jobs_failed;
        self.images_written += other.images_written;
    }
}

// ── Worker ───────────────────────────────────────────────────────────────

/// Runs generation jobs against one render backend and writes their pairs
/// into one staging directory.
pub struct GenerationWorker<R> {
    config: Arc<GeneratorConfig>,
    renderer: SerializedRenderer<R>,
    http: reqwest::Client,
    out_dir: PathBuf,
}

impl<R: RenderClient> GenerationWorker<R> {
    /// `renderer` is wrapped in a [`SerializedRenderer`]; callers pass the
    /// bare client.
    pub fn new(
        config: GeneratorConfig,
        renderer: R,
        out_dir: impl Into<PathBuf>,
    ) -> Result<Self, SynthError> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir).map_err(|e| SynthError::io(&out_dir, e))?;
        let http = http_client(config.fetch_timeout_secs)
            .map_err(|e| SynthError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            config: Arc::new(config),
            renderer: SerializedRenderer::new(renderer),
            http,
            out_dir,
        })
    }

    /// Run one job per URL, `max_threads` at a time. `urls[i]` runs as slot
    /// `first_slot + i`.
    pub async fn run(&self, first_slot: usize, urls: &[String]) -> WorkerReport {
        let start = Instant::now();
        let results: Vec<Result<usize, JobError>> = stream::iter(urls.iter().enumerate())
            .map(|(i, url)| {
                let slot = first_slot + i;
                async move {
                    let result = self.process_url(slot, url).await;
                    if let Err(ref e) = result {
                        warn!("Job {slot} ({url}) failed: {e}");
                    }
                    result
                }
            })
            .buffer_unordered(self.config.max_threads)
            .collect()
            .await;

        let mut report = WorkerReport::default();
        for result in results {
            match result {
                Ok(images) => {
                    report.jobs_succeeded += 1;
                    report.images_written += images;
                }
                Err(_) => report.jobs_failed += 1,
            }
        }
        info!(
            "Worker finished {} jobs in {:.1}s: {} ok, {} failed, {} images",
            urls.len(),
            start.elapsed().as_secs_f64(),
            report.jobs_succeeded,
            report.jobs_failed,
            report.images_written
        );
        report
    }

    /// Fetch `url` and run the rest of the job on its HTML.
    pub async fn process_url(&self, slot: usize, url: &str) -> Result<usize, JobError> {
        let html = fetch_page(&self.http, url, self.config.fetch_timeout_secs).await?;
        self.process_html(slot, &html).await
    }

    /// Build, render twice, extract, augment and persist one page of HTML.
    ///
    /// Returns the number of image/annotation pairs written. Pages on which
    /// no word was recovered are not written.
    pub async fn process_html(&self, slot: usize, html: &str) -> Result<usize, JobError> {
        let config = &self.config;
        let seed = match config.seed {
            Some(seed) => seed.wrapping_add(slot as u64),
            None => rand::random(),
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let augment_seed: u64 = rng.random();

        let allocator = ColorAllocator::with_channel_step(
            config.effective_color_capacity(),
            config.color_channel_step,
        );
        let (mut document, registry) =
            DocumentBuilder::new(config.style.clone(), rng).build(html, allocator)?;
        if document.word_count() == 0 {
            debug!("Job {slot}: no words in page, nothing to render");
            return Ok(0);
        }
        debug!(
            "Job {slot}: {} blocks, {} words",
            document.blocks.len(),
            document.word_count()
        );

        let tagged = self
            .renderer
            .render(
                &document,
                RasterOptions::tagged(config.tagged_dpi, config.tagged_max_pixels),
            )
            .await?;

        let extracted = tokio::task::spawn_blocking(move || {
            let extractor = AnnotationExtractor::new(&registry);
            tagged
                .into_iter()
                .map(|page| {
                    let found = extractor.extract(&page.image);
                    (page, found)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| JobError::Internal(format!("extraction task panicked: {e}")))?;

        document.strip_colors();
        let clean = self
            .renderer
            .render(
                &document,
                RasterOptions::clean(config.clean_dpi, config.clean_max_pixels),
            )
            .await?;

        if clean.len() != extracted.len() {
            warn!(
                "Job {slot}: tagged render has {} pages, clean render {}; using the first {}",
                extracted.len(),
                clean.len(),
                extracted.len().min(clean.len())
            );
        }
        let pages: Vec<PagePair> = extracted
            .into_iter()
            .zip(clean)
            .map(|((tagged, found), clean)| PagePair {
                tagged,
                found,
                clean,
            })
            .collect();

        let config = Arc::clone(&self.config);
        let out_dir = self.out_dir.clone();
        tokio::task::spawn_blocking(move || {
            persist_pages(&config, &out_dir, slot, augment_seed, pages)
        })
        .await
        .map_err(|e| JobError::Internal(format!("persist task panicked: {e}")))?
    }
}

/// One page of a job: the tagged render, what was found on it, and the
/// matching clean render.
pub struct PagePair {
    pub tagged: RenderedPage,
    pub found: PageAnnotations,
    pub clean: RenderedPage,
}

/// Augment, resize and stage every page that carries annotations.
///
/// Boxes are moved from the tagged page into the clean page's pixel space
/// by their fractional coordinates, so a small size difference between the
/// two passes scales proportionally.
pub fn persist_pages(
    config: &GeneratorConfig,
    out_dir: &Path,
    slot: usize,
    augment_seed: u64,
    pages: Vec<PagePair>,
) -> Result<usize, JobError> {
    let mut written = 0;
    for (page, pair) in pages.into_iter().enumerate() {
        let annotations = &pair.found.annotations;
        if annotations.is_empty() {
            debug!("Job {slot} page {page}: no words recovered, skipped");
            continue;
        }

        let (w, h) = pair.clean.image.dimensions();
        let words: Vec<String> = annotations.iter().map(|a| a.word.clone()).collect();
        let boxes: Vec<BoundingBox> = annotations
            .iter()
            .map(|a| a.bbox.to_pixel_xyxy(w, h))
            .collect();

        let mut augmenter =
            augmenter_for(&config.augmentation, augment_seed.wrapping_add(page as u64));
        let (augmented, moved) = augmenter.augment(&pair.clean.image, &boxes);
        let moved = reconcile_box_count(boxes.len(), moved)?;
        let (aw, ah) = augmented.dimensions();
        let boxes = finalize_boxes(&moved, aw, ah);

        let annotation = AnnotationFile::new(words, &boxes, aw, ah);
        let resized = imageops::resize(
            &augmented,
            config.image_size,
            config.image_size,
            FilterType::Triangle,
        );
        let staged = write_pair(
            out_dir,
            &staging_image_name(slot, page),
            &resized,
            &annotation,
        )?;
        if config.debug {
            write_debug_image(&colored_path(&staged.image), &pair.tagged.image, annotations)?;
        }
        written += 1;
    }
    Ok(written)
}

// ── Process entry point ──────────────────────────────────────────────────

/// Body of a worker process: start the conversion service, run every job in
/// the manifest, stop the service, write [`REPORT_FILE`].
///
/// Errors are fatal to this worker process only.
pub async fn run_worker(manifest: WorkerManifest) -> Result<WorkerReport, SynthError> {
    let WorkerManifest {
        worker_index,
        first_slot,
        urls,
        port,
        uno_port,
        staging_dir,
        config,
    } = manifest;
    info!(
        "Worker {worker_index}: {} URLs, service ports {port}/{uno_port}",
        urls.len()
    );

    let service = ConversionService::start(
        &config.service_command,
        port,
        uno_port,
        config.service_startup_timeout_secs,
    )
    .await?;
    let client = UnoRenderClient::new(port, config.render_timeout_secs).map_err(|e| {
        SynthError::ServiceStart {
            port,
            detail: e.to_string(),
        }
    })?;

    let worker = GenerationWorker::new(config, client, &staging_dir)?;
    let report = worker.run(first_slot, &urls).await;
    service.shutdown().await;

    report.write(&staging_dir)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorAllocator;
    use crate::config::AugmentationConfig;
    use crate::pipeline::persist::annotation_path;
    use image::{Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use tempfile::TempDir;

    fn page(image: RgbImage) -> RenderedPage {
        RenderedPage { image, dpi: 200 }
    }

    fn quiet_config(debug: bool) -> GeneratorConfig {
        GeneratorConfig::builder()
            .image_size(64)
            .debug(debug)
            .augmentation(AugmentationConfig::disabled())
            .build()
            .unwrap()
    }

    /// Tagged page with two word rectangles and its clean counterpart at a
    /// different resolution.
    fn two_word_page() -> PagePair {
        let mut alloc = ColorAllocator::new(8);
        let hello = alloc.tag("hello").unwrap();
        let world = alloc.tag("world").unwrap();
        let registry = alloc.into_registry();

        let mut tagged = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        draw_filled_rect_mut(&mut tagged, Rect::at(20, 20).of_size(60, 20), hello.to_rgb());
        draw_filled_rect_mut(&mut tagged, Rect::at(100, 60).of_size(80, 20), world.to_rgb());
        let found = AnnotationExtractor::new(&registry).extract(&tagged);
        assert_eq!(found.annotations.len(), 2);

        PagePair {
            tagged: page(tagged),
            found,
            clean: page(RgbImage::from_pixel(100, 50, Rgb([250, 250, 250]))),
        }
    }

    #[test]
    fn pages_are_staged_with_consistent_annotations() {
        let dir = TempDir::new().unwrap();
        let written = persist_pages(&quiet_config(false), dir.path(), 7, 1, vec![two_word_page()])
            .unwrap();
        assert_eq!(written, 1);

        let image = dir.path().join("im_000007_000.png");
        let staged = image::open(&image).unwrap();
        assert_eq!((staged.width(), staged.height()), (64, 64));

        let annotation = AnnotationFile::read(&annotation_path(&image)).unwrap();
        assert!(annotation.is_consistent());
        let mut words = annotation.words.clone();
        words.sort();
        assert_eq!(words, ["hello", "world"]);
        for [x, y, w, h] in &annotation.bboxes {
            assert!((0.0..=1.0).contains(x) && (0.0..=1.0).contains(y));
            assert!(*w > 0.0 && *h > 0.0);
        }
        assert!(!dir.path().join("im_000007_000_colored.png").exists());
    }

    #[test]
    fn boxes_keep_their_fractional_position_across_passes() {
        let dir = TempDir::new().unwrap();
        persist_pages(&quiet_config(false), dir.path(), 0, 1, vec![two_word_page()]).unwrap();
        let annotation =
            AnnotationFile::read(&dir.path().join("im_000000_000.png.json")).unwrap();
        let i = annotation.words.iter().position(|w| w == "hello").unwrap();
        // 20..80 × 20..40 on 200×100 is 0.1..0.4 × 0.2..0.4 on any page size.
        let [x, y, w, h] = annotation.bboxes[i];
        assert!((x - 0.1).abs() < 0.02, "x = {x}");
        assert!((y - 0.2).abs() < 0.03, "y = {y}");
        assert!((w - 0.3).abs() < 0.02, "w = {w}");
        assert!((h - 0.2).abs() < 0.03, "h = {h}");
    }

    #[test]
    fn debug_mode_writes_colored_twin() {
        let dir = TempDir::new().unwrap();
        persist_pages(&quiet_config(true), dir.path(), 3, 1, vec![two_word_page()]).unwrap();
        let colored = image::open(dir.path().join("im_000003_000_colored.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(colored.dimensions(), (200, 100));
        assert_eq!(*colored.get_pixel(20, 20), Rgb([255, 0, 0]));
    }

    #[test]
    fn pages_without_words_are_skipped() {
        let dir = TempDir::new().unwrap();
        let blank = PagePair {
            tagged: page(RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]))),
            found: PageAnnotations::default(),
            clean: page(RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]))),
        };
        let written =
            persist_pages(&quiet_config(false), dir.path(), 0, 1, vec![blank, two_word_page()])
                .unwrap();
        assert_eq!(written, 1);
        assert!(!dir.path().join("im_000000_000.png").exists());
        assert!(dir.path().join("im_000000_001.png").exists());
    }

    #[test]
    fn manifest_survives_the_process_boundary() {
        let dir = TempDir::new().unwrap();
        let manifest = WorkerManifest {
            worker_index: 1,
            first_slot: 4,
            urls: vec!["https://ru.wikipedia.org/wiki/A".into()],
            port: 2001,
            uno_port: 2003,
            staging_dir: dir.path().join("tmp_process_1"),
            config: GeneratorConfig::default(),
        };
        let path = dir.path().join("manifest.json");
        manifest.write(&path).unwrap();
        let back = WorkerManifest::read(&path).unwrap();
        assert_eq!(back.first_slot, 4);
        assert_eq!(back.urls, manifest.urls);
        assert_eq!((back.port, back.uno_port), (2001, 2003));
        assert_eq!(back.config.image_size, 244);
    }

    #[test]
    fn unreadable_manifest_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            WorkerManifest::read(&path),
            Err(SynthError::ConfigLoad { .. })
        ));
    }

    #[test]
    fn reports_merge_and_persist() {
        let dir = TempDir::new().unwrap();
        let mut total = WorkerReport::default();
        let a = WorkerReport {
            jobs_succeeded: 3,
            jobs_failed: 1,
            images_written: 5,
        };
        a.write(dir.path()).unwrap();
        total.merge(&WorkerReport::read(dir.path()).unwrap());
        total.merge(&a);
        assert_eq!(total.jobs_succeeded, 6);
        assert_eq!(total.images_written, 10);
        assert!(WorkerReport::read(&dir.path().join("missing")).is_none());
    }
}
