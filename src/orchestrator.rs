//! Run-level orchestration: partition, launch, join, merge.
//!
//! ```text
//!            ┌─ worker 0 (service 0) ─▶ out/tmp_process_0 ─┐
//! URLs ─▶ split ─ worker 1 (service 1) ─▶ out/tmp_process_1 ─┼─▶ merge ─▶ out/image_N.png
//!            └─ worker k (service k) ─▶ out/tmp_process_k ─┘
//! ```
//!
//! Workers are separate OS processes running this crate's binary with the
//! hidden `worker --manifest <path>` subcommand. A crashed or failed worker
//! only loses its own jobs; whatever it staged is still merged.

use crate::config::GeneratorConfig;
use crate::error::{PairRejection, SynthError};
use crate::pipeline::persist::{annotation_path, colored_path, AnnotationFile};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::worker::{WorkerManifest, WorkerReport};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "manifest.json";

/// Split `items` into `k` contiguous chunks whose sizes differ by at most
/// one, larger chunks first.
pub fn split_urls_to_chunks<T: Clone>(items: &[T], k: usize) -> Vec<Vec<T>> {
    if k == 0 {
        return Vec::new();
    }
    let (chunk, rem) = (items.len() / k, items.len() % k);
    (0..k)
        .map(|i| {
            let start = i * chunk + i.min(rem);
            let end = start + chunk + usize::from(i < rem);
            items[start..end].to_vec()
        })
        .collect()
}

/// Create one empty staging directory per worker.
///
/// With `remove_existing_dir`, the output directory and any stale staging
/// directories are deleted first.
pub fn prepare_staging(config: &GeneratorConfig) -> Result<Vec<PathBuf>, SynthError> {
    let staging: Vec<PathBuf> = (0..config.num_processes)
        .map(|i| config.staging_dir(i))
        .collect();

    if config.remove_existing_dir {
        for dir in std::iter::once(&config.out_dir).chain(staging.iter()) {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => debug!("Removed {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SynthError::io(dir, e)),
            }
        }
    }
    for dir in &staging {
        std::fs::create_dir_all(dir).map_err(|e| SynthError::io(dir, e))?;
    }
    Ok(staging)
}

// ── Merge ────────────────────────────────────────────────────────────────

/// Outcome of [`merge_staging_dirs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: usize,
    pub invalid: usize,
}

/// Move every valid pair from `staging_dirs` into `out_dir` as
/// `image_<n>.png` + `image_<n>.png.json`, numbering from 0.
///
/// Directories are visited in the given order and candidates within one
/// directory in sorted name order, so numbering does not depend on which
/// job finished first. A pair is valid when both files exist and the
/// annotation has as many boxes as words. Invalid pairs are counted and
/// left behind; the staging directories are deleted afterwards. Missing
/// staging directories are skipped.
pub fn merge_staging_dirs(
    staging_dirs: &[PathBuf],
    out_dir: &Path,
) -> Result<MergeReport, SynthError> {
    std::fs::create_dir_all(out_dir).map_err(|e| SynthError::io(out_dir, e))?;
    let mut report = MergeReport::default();

    for dir in staging_dirs {
        let candidates = match staged_candidates(dir) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Staging dir {} missing, skipped", dir.display());
                continue;
            }
            Err(e) => return Err(SynthError::io(dir, e)),
        };

        for image in candidates {
            if let Err(rejection) = validate_pair(&image) {
                warn!("Discarding staged pair: {rejection}");
                report.invalid += 1;
                continue;
            }
            let target = out_dir.join(format!("image_{}.png", report.merged));
            if let Err(e) = move_pair(&image, &target) {
                warn!("Discarding staged pair: {e}");
                report.invalid += 1;
                continue;
            }
            let colored = colored_path(&image);
            if colored.exists() {
                if let Err(e) = move_file(&colored, &colored_path(&target)) {
                    warn!("Colored twin not moved: {e}");
                }
            }
            report.merged += 1;
        }

        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Failed to remove staging dir {}: {e}", dir.display());
        }
    }

    info!(
        "Merged {} pairs into {} ({} invalid)",
        report.merged,
        out_dir.display(),
        report.invalid
    );
    Ok(report)
}

/// Image paths of every pair started in `dir`: images that exist plus
/// images named by an annotation, without colored twins.
fn staged_candidates(dir: &Path) -> std::io::Result<BTreeSet<PathBuf>> {
    let mut out = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(image) = name.strip_suffix(".json") {
            if image.ends_with(".png") {
                out.insert(dir.join(image));
            }
        } else if name.ends_with(".png") && !name.ends_with("_colored.png") {
            out.insert(path);
        }
    }
    Ok(out)
}

fn validate_pair(image: &Path) -> Result<(), PairRejection> {
    let annotation = annotation_path(image);
    if !image.is_file() {
        return Err(PairRejection::MissingImage(image.to_path_buf()));
    }
    let file = AnnotationFile::read(&annotation)?;
    if !file.is_consistent() {
        return Err(PairRejection::CountMismatch {
            path: annotation,
            words: file.words.len(),
            bboxes: file.bboxes.len(),
        });
    }
    Ok(())
}

/// Move image then annotation; a half-moved pair is taken back out of
/// `out_dir`.
fn move_pair(image: &Path, target: &Path) -> Result<(), SynthError> {
    move_file(image, target)?;
    if let Err(e) = move_file(&annotation_path(image), &annotation_path(target)) {
        if let Err(undo) = std::fs::rename(target, image) {
            warn!("Failed to restore {}: {undo}", image.display());
            let _ = std::fs::remove_file(target);
        }
        return Err(e);
    }
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<(), SynthError> {
    std::fs::rename(from, to).map_err(|e| SynthError::io(from, e))
}

// ── Run report ───────────────────────────────────────────────────────────

/// Aggregate outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub urls: usize,
    pub images_merged: usize,
    pub invalid_pairs: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub workers_failed: usize,
    pub elapsed: Duration,
}

impl RunReport {
    fn ratio(num: f64, den: f64) -> f64 {
        if den > 0.0 {
            num / den
        } else {
            0.0
        }
    }

    pub fn urls_per_sec(&self) -> f64 {
        Self::ratio(self.urls as f64, self.elapsed.as_secs_f64())
    }

    pub fn images_per_sec(&self) -> f64 {
        Self::ratio(self.images_merged as f64, self.elapsed.as_secs_f64())
    }

    pub fn secs_per_url(&self) -> f64 {
        Self::ratio(self.elapsed.as_secs_f64(), self.urls as f64)
    }

    pub fn secs_per_image(&self) -> f64 {
        Self::ratio(self.elapsed.as_secs_f64(), self.images_merged as f64)
    }

    pub fn images_per_url(&self) -> f64 {
        Self::ratio(self.images_merged as f64, self.urls as f64)
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Partitions URLs over worker processes and merges what they stage.
///
/// # Example
/// ```rust,no_run
/// use docsynth::{GeneratorConfig, Orchestrator};
///
/// # async fn demo() -> Result<(), docsynth::SynthError> {
/// let config = GeneratorConfig::builder().out_dir("dataset").build()?;
/// let urls = vec!["https://ru.wikipedia.org/wiki/Rust".to_string()];
/// let report = Orchestrator::new(config).run(urls).await?;
/// println!("{} images", report.images_merged);
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    config: GeneratorConfig,
    progress: ProgressCallback,
    worker_exe: Option<PathBuf>,
    log_filter: Option<String>,
}

impl Orchestrator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoopProgressCallback),
            worker_exe: None,
            log_filter: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Program started for each worker. Must accept
    /// `worker --manifest <path>`. Default: the current executable.
    pub fn with_worker_executable(mut self, exe: impl Into<PathBuf>) -> Self {
        self.worker_exe = Some(exe.into());
        self
    }

    /// `RUST_LOG` value for worker processes. Default: inherited.
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Generate a dataset from `urls`.
    ///
    /// Fails only on problems with the output directories; failed jobs and
    /// failed workers are counted in the report.
    pub async fn run(&self, urls: Vec<String>) -> Result<RunReport, SynthError> {
        let start = Instant::now();
        let config = &self.config;
        let staging = prepare_staging(config)?;
        let chunks = split_urls_to_chunks(&urls, config.num_processes);

        let exe = match &self.worker_exe {
            Some(exe) => exe.clone(),
            None => std::env::current_exe().map_err(|e| SynthError::io("current_exe", e))?,
        };

        let mut report = RunReport {
            urls: urls.len(),
            ..RunReport::default()
        };
        let mut children = Vec::new();
        let mut first_slot = 0;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let count = chunk.len();
            if count == 0 {
                debug!("Worker {index} has no URLs, not started");
                continue;
            }
            match self.spawn_worker(&exe, index, first_slot, chunk, &staging[index]) {
                Ok(child) => children.push((index, child)),
                Err(e) => {
                    warn!("{e}");
                    report.workers_failed += 1;
                    self.progress.on_worker_finished(index, false);
                }
            }
            first_slot += count;
        }
        info!(
            "Launched {} worker processes for {} URLs",
            children.len(),
            urls.len()
        );
        self.progress.on_workers_started(children.len(), urls.len());

        let progress = &self.progress;
        let exits = join_all(children.into_iter().map(|(index, mut child)| async move {
            let success = match child.wait().await {
                Ok(status) if status.success() => true,
                Ok(status) => {
                    warn!("Worker {index} exited with {status}");
                    false
                }
                Err(e) => {
                    warn!("Failed to wait for worker {index}: {e}");
                    false
                }
            };
            progress.on_worker_finished(index, success);
            success
        }))
        .await;
        report.workers_failed += exits.iter().filter(|ok| !**ok).count();

        let mut jobs = WorkerReport::default();
        for dir in &staging {
            if let Some(r) = WorkerReport::read(dir) {
                jobs.merge(&r);
            }
        }
        report.jobs_succeeded = jobs.jobs_succeeded;
        report.jobs_failed = jobs.jobs_failed;

        let merge = merge_staging_dirs(&staging, &config.out_dir)?;
        self.progress.on_merge_complete(merge.merged, merge.invalid);
        report.images_merged = merge.merged;
        report.invalid_pairs = merge.invalid;
        report.elapsed = start.elapsed();
        Ok(report)
    }

    fn spawn_worker(
        &self,
        exe: &Path,
        index: usize,
        first_slot: usize,
        urls: Vec<String>,
        staging_dir: &Path,
    ) -> Result<tokio::process::Child, SynthError> {
        let (port, uno_port) =
            self.config
                .service_ports(index)
                .ok_or_else(|| SynthError::WorkerSpawn {
                    index,
                    detail: "no port pair assigned".into(),
                })?;
        let manifest_path = staging_dir.join(MANIFEST_FILE);
        WorkerManifest {
            worker_index: index,
            first_slot,
            urls,
            port,
            uno_port,
            staging_dir: staging_dir.to_path_buf(),
            config: self.config.clone(),
        }
        .write(&manifest_path)?;

        let mut command = Command::new(exe);
        command
            .arg("worker")
            .arg("--manifest")
            .arg(&manifest_path)
            .kill_on_drop(true);
        if let Some(filter) = &self.log_filter {
            command.env("RUST_LOG", filter);
        }
        let child = command.spawn().map_err(|e| SynthError::WorkerSpawn {
            index,
            detail: format!("{}: {e}", exe.display()),
        })?;
        debug!("Worker {index} started (pid {:?})", child.id());
        Ok(child)
    }
}
