//! Configuration types for dataset generation.
//!
//! Run-level behaviour is controlled through [`GeneratorConfig`], built via
//! [`GeneratorConfigBuilder`]. Per-document style sampling lives in
//! [`StyleConfig`] (the JSON style file), augmentation in
//! [`AugmentationConfig`], and URL discovery in [`CrawlConfig`].
//!
//! Every type here is `Serialize + Deserialize`: the orchestrator hands each
//! worker process its complete configuration as a JSON manifest, so a worker
//! never re-derives settings from the command line.

use crate::color::ColorAllocator;
use crate::error::SynthError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a generation run.
///
/// # Example
/// ```rust
/// use docsynth::GeneratorConfig;
///
/// let config = GeneratorConfig::builder()
///     .out_dir("dataset")
///     .num_processes(2)
///     .ports(vec![2000, 2001, 2002, 2003])
///     .build()
///     .unwrap();
/// assert_eq!(config.service_ports(1), Some((2001, 2003)));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Final dataset directory. Worker staging dirs are created inside it.
    pub out_dir: PathBuf,

    /// Delete `out_dir` (and stale staging dirs) before the run. Default: false.
    pub remove_existing_dir: bool,

    /// Also persist the tagged render, with detected boxes outlined. Default: false.
    pub debug: bool,

    /// Side length of the square images written to the dataset. Default: 244.
    pub image_size: u32,

    /// Number of worker processes, each with its own conversion service. Default: 1.
    pub num_processes: usize,

    /// Concurrent jobs inside one worker process. Default: 8.
    ///
    /// Fetches and extraction overlap freely; render calls are serialised
    /// per process regardless of this value.
    pub max_threads: usize,

    /// Port pool for the conversion services. Worker `i` of `k` gets
    /// `(ports[i], ports[k + i])` as its (RPC port, office port) pair, so at
    /// least `2 × num_processes` ports are required. Default: `[2000, 2001]`.
    pub ports: Vec<u16>,

    /// DPI and longest-edge size of the tagged (colored) render. Default: 200 / 1500.
    pub tagged_dpi: u32,
    pub tagged_max_pixels: u32,

    /// DPI and longest-edge size of the clean render. Default: 200 / 1024.
    pub clean_dpi: u32,
    pub clean_max_pixels: u32,

    /// Page fetch timeout in seconds. Default: 30.
    pub fetch_timeout_secs: u64,

    /// Per-render-call timeout in seconds (convert + rasterise). Default: 120.
    pub render_timeout_secs: u64,

    /// How long to wait for a freshly spawned conversion service to accept
    /// connections. Default: 60.
    pub service_startup_timeout_secs: u64,

    /// Program and leading arguments that start one conversion service.
    /// `--port`, `--uno-port` and `--interface` are appended.
    /// Default: `python3 -m unoserver.server`.
    pub service_command: Vec<String>,

    /// Palette size per document. `None` → twice the word budget. Must exceed
    /// `style.max_words`.
    pub color_capacity: Option<usize>,

    /// Channel step between neighbouring palette colors. Default: 1.
    pub color_channel_step: u8,

    /// Seed for style sampling and augmentation. `None` → OS entropy.
    pub seed: Option<u64>,

    pub style: StyleConfig,

    pub augmentation: AugmentationConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("output"),
            remove_existing_dir: false,
            debug: false,
            image_size: 244,
            num_processes: 1,
            max_threads: 8,
            ports: vec![2000, 2001],
            tagged_dpi: 200,
            tagged_max_pixels: 1500,
            clean_dpi: 200,
            clean_max_pixels: 1024,
            fetch_timeout_secs: 30,
            render_timeout_secs: 120,
            service_startup_timeout_secs: 60,
            service_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "unoserver.server".to_string(),
            ],
            color_capacity: None,
            color_channel_step: 1,
            seed: None,
            style: StyleConfig::default(),
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl GeneratorConfig {
    /// Create a new builder for `GeneratorConfig`.
    pub fn builder() -> GeneratorConfigBuilder {
        GeneratorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Palette size used for each document.
    pub fn effective_color_capacity(&self) -> usize {
        self.color_capacity
            .unwrap_or_else(|| self.style.max_words.saturating_mul(2).max(1))
    }

    /// `(rpc_port, office_port)` for worker `index`.
    pub fn service_ports(&self, index: usize) -> Option<(u16, u16)> {
        if index >= self.num_processes {
            return None;
        }
        let rpc = *self.ports.get(index)?;
        let office = *self.ports.get(self.num_processes + index)?;
        Some((rpc, office))
    }

    /// Staging directory of worker `index`.
    pub fn staging_dir(&self, index: usize) -> PathBuf {
        self.out_dir.join(format!("tmp_process_{index}"))
    }

    fn validate(&self) -> Result<(), SynthError> {
        if self.num_processes == 0 {
            return Err(SynthError::InvalidConfig(
                "Number of processes must be ≥ 1".into(),
            ));
        }
        if self.max_threads == 0 {
            return Err(SynthError::InvalidConfig(
                "Threads per process must be ≥ 1".into(),
            ));
        }
        if self.ports.len() < 2 * self.num_processes {
            return Err(SynthError::InvalidConfig(format!(
                "{} processes need {} ports, got {}",
                self.num_processes,
                2 * self.num_processes,
                self.ports.len()
            )));
        }
        if self.image_size == 0 {
            return Err(SynthError::InvalidConfig("Image size must be ≥ 1".into()));
        }
        let palette = ColorAllocator::palette_size(
            self.effective_color_capacity(),
            self.color_channel_step,
        );
        if palette <= self.style.max_words {
            return Err(SynthError::InvalidConfig(format!(
                "Palette of {} colors (capacity {}, channel step {}) must exceed the word budget {}",
                palette,
                self.effective_color_capacity(),
                self.color_channel_step,
                self.style.max_words
            )));
        }
        if self.service_command.is_empty() {
            return Err(SynthError::InvalidConfig(
                "Service command must not be empty".into(),
            ));
        }
        self.style.validate()?;
        Ok(())
    }
}

/// Builder for [`GeneratorConfig`].
#[derive(Debug)]
pub struct GeneratorConfigBuilder {
    config: GeneratorConfig,
}

impl GeneratorConfigBuilder {
    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.out_dir = dir.into();
        self
    }

    pub fn remove_existing_dir(mut self, v: bool) -> Self {
        self.config.remove_existing_dir = v;
        self
    }

    pub fn debug(mut self, v: bool) -> Self {
        self.config.debug = v;
        self
    }

    pub fn image_size(mut self, px: u32) -> Self {
        self.config.image_size = px.max(1);
        self
    }

    pub fn num_processes(mut self, n: usize) -> Self {
        self.config.num_processes = n.max(1);
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.config.max_threads = n.max(1);
        self
    }

    pub fn ports(mut self, ports: Vec<u16>) -> Self {
        self.config.ports = ports;
        self
    }

    pub fn tagged_render(mut self, dpi: u32, max_pixels: u32) -> Self {
        self.config.tagged_dpi = dpi.clamp(72, 600);
        self.config.tagged_max_pixels = max_pixels.max(100);
        self
    }

    pub fn clean_render(mut self, dpi: u32, max_pixels: u32) -> Self {
        self.config.clean_dpi = dpi.clamp(72, 600);
        self.config.clean_max_pixels = max_pixels.max(100);
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs.max(1);
        self
    }

    pub fn service_startup_timeout_secs(mut self, secs: u64) -> Self {
        self.config.service_startup_timeout_secs = secs.max(1);
        self
    }

    pub fn service_command(mut self, command: Vec<String>) -> Self {
        self.config.service_command = command;
        self
    }

    pub fn color_capacity(mut self, capacity: usize) -> Self {
        self.config.color_capacity = Some(capacity);
        self
    }

    pub fn color_channel_step(mut self, step: u8) -> Self {
        self.config.color_channel_step = step.max(1);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn style(mut self, style: StyleConfig) -> Self {
        self.config.style = style;
        self
    }

    pub fn augmentation(mut self, augmentation: AugmentationConfig) -> Self {
        self.config.augmentation = augmentation;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GeneratorConfig, SynthError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Style ────────────────────────────────────────────────────────────────

/// Per-document style distribution, loaded from the JSON style file.
///
/// Probability lists are relative weights and need not sum to 1. Alignment
/// lists are ordered `[center, left, right, justify]`; line spacing lists
/// are ordered `[one_and_a_half, double]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Stop adding blocks once the document holds more words than this.
    pub max_words: usize,
    /// Probability of a two-column layout.
    pub p_2columns: f64,
    /// Body font size range in points, `[min, max)`.
    pub font_size_interval: [u32; 2],
    pub p_line_spacing: [f64; 2],
    pub p_text_alignment: [f64; 4],
    pub p_heading_bold: f64,
    /// Heading size relative to the body font, `[min, max)`.
    pub heading_relative_size_interval: [f64; 2],
    pub p_heading_alignment: [f64; 4],
    pub table_max_rows: usize,
    pub table_max_cols: usize,
    /// Font families to sample from.
    pub fonts: Vec<String>,
    /// Heading texts that are never added to a document.
    pub skip_headings: Vec<String>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            max_words: 1000,
            p_2columns: 0.2,
            font_size_interval: [8, 14],
            p_line_spacing: [0.5, 0.5],
            p_text_alignment: [0.1, 0.5, 0.1, 0.3],
            p_heading_bold: 0.5,
            heading_relative_size_interval: [1.0, 2.0],
            p_heading_alignment: [0.4, 0.5, 0.05, 0.05],
            table_max_rows: 20,
            table_max_cols: 6,
            fonts: [
                "Liberation Serif",
                "Liberation Sans",
                "DejaVu Sans",
                "DejaVu Serif",
                "Noto Sans",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            skip_headings: vec!["Contents".to_string()],
        }
    }
}

impl StyleConfig {
    /// Load a style file. Missing keys fall back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self, SynthError> {
        let text = std::fs::read_to_string(path).map_err(|e| SynthError::ConfigLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let style: StyleConfig =
            serde_json::from_str(&text).map_err(|e| SynthError::ConfigLoad {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        style.validate()?;
        Ok(style)
    }

    fn validate(&self) -> Result<(), SynthError> {
        let [lo, hi] = self.font_size_interval;
        if lo == 0 || lo >= hi {
            return Err(SynthError::InvalidConfig(format!(
                "font_size_interval must be [min, max) with 0 < min < max, got [{lo}, {hi}]"
            )));
        }
        let [rlo, rhi] = self.heading_relative_size_interval;
        if !(rlo > 0.0 && rlo <= rhi) {
            return Err(SynthError::InvalidConfig(format!(
                "heading_relative_size_interval must satisfy 0 < min ≤ max, got [{rlo}, {rhi}]"
            )));
        }
        for (name, weights) in [
            ("p_line_spacing", &self.p_line_spacing[..]),
            ("p_text_alignment", &self.p_text_alignment[..]),
            ("p_heading_alignment", &self.p_heading_alignment[..]),
        ] {
            if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
                return Err(SynthError::InvalidConfig(format!(
                    "{name} must hold non-negative weights with a positive sum"
                )));
            }
        }
        for (name, p) in [
            ("p_2columns", self.p_2columns),
            ("p_heading_bold", self.p_heading_bold),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SynthError::InvalidConfig(format!(
                    "{name} must be a probability, got {p}"
                )));
            }
        }
        if self.fonts.is_empty() {
            return Err(SynthError::InvalidConfig("fonts must not be empty".into()));
        }
        Ok(())
    }
}

// ── Augmentation ─────────────────────────────────────────────────────────

/// Probabilities and ranges for the built-in augmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Master switch. When false the identity augmenter is used.
    pub enabled: bool,
    /// Gaussian ink/texture noise.
    pub p_noise: f64,
    pub noise_sigma: [f64; 2],
    /// Global brightness multiplier.
    pub p_brightness: f64,
    pub brightness_range: [f32; 2],
    /// Gaussian blur of the whole page.
    pub p_blur: f64,
    pub blur_sigma: [f32; 2],
    /// Shrink and shift the page on a white canvas.
    pub p_shift: f64,
    pub scale_range: [f64; 2],
    /// Maximum shift as a fraction of the page size.
    pub max_shift_fraction: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            p_noise: 0.3,
            noise_sigma: [3.0, 10.0],
            p_brightness: 0.3,
            brightness_range: [0.9, 1.05],
            p_blur: 0.2,
            blur_sigma: [0.3, 1.0],
            p_shift: 0.2,
            scale_range: [0.9, 1.0],
            max_shift_fraction: 0.03,
        }
    }
}

impl AugmentationConfig {
    /// A config that never changes the image.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

// ── Crawl ────────────────────────────────────────────────────────────────

/// URL discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub start_page: String,
    /// Language codes that must appear in the host (`ru` → `ru.wikipedia.org`).
    pub languages: Vec<String>,
    /// Stop once this many URLs (start page included) are known.
    pub max_urls: usize,
    pub allowed_domain: String,
    pub path_prefix: String,
    pub fetch_timeout_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_page: "https://ru.wikipedia.org/wiki/%D0%97%D0%B0%D0%B3%D0%BB%D0%B0%D0%B2%D0%BD%D0%B0%D1%8F_%D1%81%D1%82%D1%80%D0%B0%D0%BD%D0%B8%D1%86%D0%B0".to_string(),
            languages: vec!["ru".to_string()],
            max_urls: 100,
            allowed_domain: "wikipedia.org".to_string(),
            path_prefix: "/wiki/".to_string(),
            fetch_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_build() {
        let config = GeneratorConfig::builder().build().unwrap();
        assert_eq!(config.image_size, 244);
        assert_eq!(config.service_ports(0), Some((2000, 2001)));
        assert_eq!(config.effective_color_capacity(), 2000);
    }

    #[test]
    fn ports_must_cover_processes() {
        let err = GeneratorConfig::builder()
            .num_processes(2)
            .ports(vec![2000, 2001, 2002])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("need 4 ports"), "got: {err}");
    }

    #[test]
    fn wide_channel_step_must_still_cover_word_budget() {
        // 256 / 64 = 4 levels per channel, 64 colors for a budget of 1000.
        let err = GeneratorConfig::builder()
            .color_channel_step(64)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Palette of 64 colors"), "got: {err}");

        // 256 / 16 = 16 levels, 4096 colors.
        let config = GeneratorConfig::builder().color_channel_step(16).build().unwrap();
        assert!(
            ColorAllocator::with_channel_step(config.effective_color_capacity(), 16).capacity()
                > config.style.max_words
        );
    }

    #[test]
    fn service_ports_pair_by_offset() {
        let config = GeneratorConfig::builder()
            .num_processes(3)
            .ports(vec![10, 11, 12, 20, 21, 22])
            .build()
            .unwrap();
        assert_eq!(config.service_ports(0), Some((10, 20)));
        assert_eq!(config.service_ports(2), Some((12, 22)));
        assert_eq!(config.service_ports(3), None);
    }

    #[test]
    fn color_capacity_must_exceed_budget() {
        let err = GeneratorConfig::builder()
            .color_capacity(1000)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must exceed"));
    }

    #[test]
    fn builder_clamps() {
        let config = GeneratorConfig::builder()
            .max_threads(0)
            .tagged_render(10, 5)
            .build()
            .unwrap();
        assert_eq!(config.max_threads, 1);
        assert_eq!(config.tagged_dpi, 72);
        assert_eq!(config.tagged_max_pixels, 100);
    }

    #[test]
    fn staging_dirs_live_under_out_dir() {
        let config = GeneratorConfig::builder().out_dir("/data/set").build().unwrap();
        assert_eq!(
            config.staging_dir(1),
            PathBuf::from("/data/set/tmp_process_1")
        );
    }

    #[test]
    fn style_file_partial_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_words": 250, "font_size_interval": [6, 12], "table_max_cols": 4}}"#
        )
        .unwrap();
        let style = StyleConfig::from_file(file.path()).unwrap();
        assert_eq!(style.max_words, 250);
        assert_eq!(style.font_size_interval, [6, 12]);
        assert_eq!(style.table_max_cols, 4);
        assert_eq!(style.table_max_rows, 20);
    }

    #[test]
    fn style_file_rejects_bad_interval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"font_size_interval": [12, 12]}}"#).unwrap();
        let err = StyleConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, SynthError::InvalidConfig(_)));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = GeneratorConfig::builder().seed(7).debug(true).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: GeneratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seed, Some(7));
        assert!(back.debug);
        assert_eq!(back.ports, config.ports);
    }
}
