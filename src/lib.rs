//! # docsynth
//!
//! Synthesize document-image datasets with word-level bounding boxes.
//!
//! ## How boxes are recovered
//!
//! Every word of a document is painted in its own color (text and
//! background alike), so after rendering each word is a solid rectangle of a
//! color that maps back to exactly one word. The rectangles are found with
//! contour detection, their colors looked up in the registry, and the
//! resulting boxes carried over to a second, clean render of the same
//! document. No OCR is involved, so the labels are exact.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Wikipedia
//!  │
//!  ├─ 1. Crawl    BFS over article links (language / namespace filter)
//!  ├─ 2. Split    contiguous URL chunks, one per worker process
//!  │
//!  │   per worker process (own conversion service, bounded job pool)
//!  ├─ 3. Build    HTML → styled document, one tag color per word
//!  ├─ 4. Render   tagged pass → PDF → pages (pdfium, spawn_blocking)
//!  ├─ 5. Extract  colored quadrilaterals → (word, box)
//!  ├─ 6. Render   clean pass, same layout
//!  ├─ 7. Augment  noise / blur / shift, boxes remapped
//!  ├─ 8. Stage    im_<slot>_<page>.png + .png.json
//!  │
//!  └─ 9. Merge    validate, renumber image_<n>.png, drop staging dirs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsynth::{crawl, CrawlConfig, GeneratorConfig, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let urls = crawl(&CrawlConfig::default(), None).await?;
//!     let config = GeneratorConfig::builder()
//!         .out_dir("dataset")
//!         .num_processes(2)
//!         .ports(vec![2000, 2001, 2002, 2003])
//!         .build()?;
//!     let report = Orchestrator::new(config).run(urls).await?;
//!     eprintln!("{} images, {} invalid", report.images_merged, report.invalid_pairs);
//!     Ok(())
//! }
//! ```
//!
//! The program running the orchestrator must also handle the worker
//! subcommand (`worker --manifest <path>`, see [`worker::run_worker`]); the
//! bundled `docsynth` binary does.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsynth` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ## Runtime requirements
//!
//! * a conversion service runnable as `python3 -m unoserver.server`
//!   (override with [`GeneratorConfigBuilder::service_command`])
//! * the pdfium shared library, found via `PDFIUM_LIB_PATH`, the working
//!   directory, or the system library path

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bbox;
pub mod builder;
pub mod color;
pub mod config;
pub mod crawl;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod service;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bbox::{BoundingBox, BoxConvention};
pub use builder::DocumentBuilder;
pub use color::{Color, ColorAllocator, ColorRegistry};
pub use config::{AugmentationConfig, CrawlConfig, GeneratorConfig, GeneratorConfigBuilder, StyleConfig};
pub use crawl::crawl;
pub use document::{Document, TagState};
pub use error::{JobError, RenderError, SynthError};
pub use orchestrator::{merge_staging_dirs, split_urls_to_chunks, MergeReport, Orchestrator, RunReport};
pub use pipeline::extract::{Annotation, AnnotationExtractor};
pub use pipeline::persist::AnnotationFile;
pub use pipeline::render::{RenderClient, SerializedRenderer, UnoRenderClient};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use worker::{GenerationWorker, WorkerManifest, WorkerReport};
