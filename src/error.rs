//! Error types for the docsynth library.
//!
//! Failures fall into three scopes, and each scope has its own type:
//!
//! * [`SynthError`] — **Fatal** to a run or to one worker process: invalid
//!   configuration, unusable output directories, a conversion service that
//!   never came up. Sibling worker processes are unaffected.
//!
//! * [`JobError`] — **Non-fatal**: one URL failed somewhere between fetch and
//!   persist. The worker logs it and moves on to the next job.
//!
//! * [`RenderError`], [`ColorExhausted`], [`ExtractionMiss`] and
//!   [`PairRejection`] — stage-level detail that is either wrapped into a
//!   [`JobError`] or only counted (extraction misses, merge rejections).

use crate::color::Color;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the orchestrator and worker entry points.
#[derive(Debug, Error)]
pub enum SynthError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A JSON config or manifest could not be read or parsed.
    #[error("Failed to load '{path}': {detail}")]
    ConfigLoad { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create, read, move or delete something on disk.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Conversion service errors ─────────────────────────────────────────
    /// The conversion service process could not be spawned.
    #[error("Failed to start conversion service on port {port}: {detail}")]
    ServiceStart { port: u16, detail: String },

    /// The service was spawned but never accepted connections.
    #[error("Conversion service on port {port} not reachable after {secs}s")]
    ServiceUnhealthy { port: u16, secs: u64 },

    // ── Orchestration errors ──────────────────────────────────────────────
    /// A worker process could not be launched.
    #[error("Failed to launch worker process {index}: {detail}")]
    WorkerSpawn { index: usize, detail: String },

    /// The crawler could not produce a single URL.
    #[error("Crawl from '{start}' produced no URLs: {reason}")]
    CrawlFailed { start: String, reason: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SynthError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SynthError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal failure of a single generation job.
///
/// Returned by each stage of [`crate::worker::GenerationWorker`] and caught at
/// the job boundary; it never reaches sibling jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// Network failure or non-success HTTP status while fetching the page.
    #[error("Fetch of '{url}' failed: {reason}")]
    Fetch { url: String, reason: String },

    /// The fetch exceeded its timeout.
    #[error("Fetch of '{url}' timed out after {secs}s")]
    FetchTimeout { url: String, secs: u64 },

    /// The conversion service or the rasteriser failed.
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    /// The document outgrew its color palette.
    #[error(transparent)]
    ColorExhausted(#[from] ColorExhausted),

    /// The augmenter returned fewer boxes than it was given.
    #[error("Augmentation returned {got} boxes for {expected} inputs")]
    AugmentationCountMismatch { expected: usize, got: usize },

    /// Writing the image or annotation to the staging directory failed.
    #[error("Failed to persist '{path}': {detail}")]
    Persist { path: PathBuf, detail: String },

    /// Unexpected internal error (panicked blocking task etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a call into the render backend.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// Connection refused or reset by the conversion service.
    #[error("conversion service unavailable at {endpoint}: {detail}")]
    ServiceUnavailable { endpoint: String, detail: String },

    /// The call did not finish within the configured timeout.
    #[error("render call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The service answered with an RPC fault (usually malformed input).
    #[error("conversion service fault: {0}")]
    Fault(String),

    /// The service answered with something that is not a valid RPC response.
    #[error("unexpected response from conversion service: {0}")]
    Protocol(String),

    /// pdfium failed to load or rasterise the converted PDF.
    #[error("rasterisation failed: {0}")]
    Rasterisation(String),
}

/// The color palette ran out before the document was complete.
///
/// Indicates a word budget that is too large for the configured palette
/// capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("color palette exhausted after {capacity} colors")]
pub struct ColorExhausted {
    pub capacity: usize,
}

/// Why a contour did not produce an annotation. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExtractionMiss {
    /// The polygon approximation did not have exactly four vertices.
    #[error("contour approximates to {vertices} vertices")]
    NotQuadrilateral { vertices: usize },

    /// The sampled color is not in the registry.
    #[error("color {0} is not registered")]
    UnregisteredColor(Color),
}

/// Why a staged image/annotation pair was discarded during merge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairRejection {
    #[error("image '{0}' not found")]
    MissingImage(PathBuf),

    #[error("annotation '{0}' not found")]
    MissingAnnotation(PathBuf),

    #[error("annotation '{path}' unreadable: {detail}")]
    Unreadable { path: PathBuf, detail: String },

    #[error("annotation '{path}' has {words} words but {bboxes} bboxes")]
    CountMismatch {
        path: PathBuf,
        words: usize,
        bboxes: usize,
    },
}
