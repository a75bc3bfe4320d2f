//! Document → PDF → page rasters.
//!
//! ## Two halves
//!
//! [`RenderClient::convert`] is the remote half: the serialized document is
//! posted to the conversion service over XML-RPC and comes back as PDF bytes.
//! [`RenderClient::rasterize`] is the local half: pdfium turns the PDF into
//! one RGB image per page.
//!
//! ## spawn_blocking
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering,
//! so rasterisation runs on the blocking pool rather than a runtime worker.
//!
//! ## One call at a time per service
//!
//! The conversion service is stateful and not safe for concurrent requests.
//! [`SerializedRenderer`] wraps any client with a per-process gate so that at
//! most one `convert` call is in flight; rasterisation stays concurrent.

use crate::document::Document;
use crate::error::RenderError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Rasterisation settings for one render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    pub dpi: u32,
    /// Longest edge in pixels; pages larger than this at `dpi` are scaled down.
    pub max_pixels: u32,
    /// Anti-aliasing of text, paths and images. Off for the tagged pass so
    /// word rectangles keep hard, single-color edges.
    pub smoothing: bool,
}

impl RasterOptions {
    pub fn tagged(dpi: u32, max_pixels: u32) -> Self {
        Self {
            dpi,
            max_pixels,
            smoothing: false,
        }
    }

    pub fn clean(dpi: u32, max_pixels: u32) -> Self {
        Self {
            dpi,
            max_pixels,
            smoothing: true,
        }
    }
}

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: RgbImage,
    pub dpi: u32,
}

/// Document → ordered page images.
pub trait RenderClient: Send + Sync {
    /// Convert a serialized document to `target_format` (e.g. `"pdf"`).
    fn convert(
        &self,
        document: &[u8],
        target_format: &str,
    ) -> impl Future<Output = Result<Vec<u8>, RenderError>> + Send;

    /// Rasterise every page of a PDF.
    fn rasterize(
        &self,
        pdf: Vec<u8>,
        options: RasterOptions,
    ) -> impl Future<Output = Result<Vec<RenderedPage>, RenderError>> + Send;

    /// Serialize `document` in its current state, convert it to PDF and
    /// rasterise it.
    fn render(
        &self,
        document: &Document,
        options: RasterOptions,
    ) -> impl Future<Output = Result<Vec<RenderedPage>, RenderError>> + Send {
        let html = document.to_html();
        async move {
            let pdf = self.convert(html.as_bytes(), "pdf").await?;
            self.rasterize(pdf, options).await
        }
    }
}

// ── Conversion service client ────────────────────────────────────────────

/// Input filter for HTML documents.
const HTML_IMPORT_FILTER: &str = "HTML (StarWriter)";

static RE_BASE64: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<base64>(.*?)</base64>").unwrap());
static RE_FAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<name>faultString</name>\s*<value>\s*(?:<string>)?(.*?)(?:</string>)?\s*</value>")
        .unwrap()
});

/// XML-RPC client for one conversion service instance, rasterising locally
/// with pdfium.
#[derive(Debug, Clone)]
pub struct UnoRenderClient {
    http: reqwest::Client,
    endpoint: String,
    timeout_secs: u64,
}

impl UnoRenderClient {
    pub fn new(port: u16, timeout_secs: u64) -> Result<Self, RenderError> {
        let endpoint = format!("http://127.0.0.1:{port}/RPC2");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RenderError::ServiceUnavailable {
                endpoint: endpoint.clone(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            http,
            endpoint,
            timeout_secs,
        })
    }
}

impl RenderClient for UnoRenderClient {
    async fn convert(&self, document: &[u8], target_format: &str) -> Result<Vec<u8>, RenderError> {
        let body = convert_request(document, target_format);
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RenderError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    RenderError::ServiceUnavailable {
                        endpoint: self.endpoint.clone(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                RenderError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                RenderError::Protocol(e.to_string())
            }
        })?;
        if !status.is_success() {
            return Err(RenderError::Protocol(format!("HTTP {status}")));
        }

        let pdf = parse_convert_response(&text)?;
        debug!(
            "Converted {} bytes → {} bytes {}",
            document.len(),
            pdf.len(),
            target_format
        );
        Ok(pdf)
    }

    async fn rasterize(
        &self,
        pdf: Vec<u8>,
        options: RasterOptions,
    ) -> Result<Vec<RenderedPage>, RenderError> {
        rasterize_pdf(pdf, options, self.timeout_secs).await
    }
}

/// XML-RPC `convert` call with the document passed inline.
fn convert_request(document: &[u8], target_format: &str) -> String {
    let data = STANDARD.encode(document);
    format!(
        "<?xml version=\"1.0\"?>\n<methodCall><methodName>convert</methodName><params>\
         <param><value><nil/></value></param>\
         <param><value><base64>{data}</base64></value></param>\
         <param><value><nil/></value></param>\
         <param><value><string>{target_format}</string></value></param>\
         <param><value><nil/></value></param>\
         <param><value><array><data></data></array></value></param>\
         <param><value><boolean>0</boolean></value></param>\
         <param><value><string>{HTML_IMPORT_FILTER}</string></value></param>\
         </params></methodCall>"
    )
}

fn parse_convert_response(xml: &str) -> Result<Vec<u8>, RenderError> {
    if xml.contains("<fault>") {
        let detail = RE_FAULT
            .captures(xml)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| "unknown fault".to_string());
        return Err(RenderError::Fault(detail));
    }
    let payload = RE_BASE64
        .captures(xml)
        .and_then(|c| c.get(1))
        .ok_or_else(|| RenderError::Protocol("response carries no base64 payload".into()))?;
    let compact: String = payload
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| RenderError::Protocol(format!("invalid base64 payload: {e}")))
}

// ── pdfium rasteriser ────────────────────────────────────────────────────

/// Rasterise a PDF on the blocking pool, bounded by `timeout_secs`.
pub async fn rasterize_pdf(
    pdf: Vec<u8>,
    options: RasterOptions,
    timeout_secs: u64,
) -> Result<Vec<RenderedPage>, RenderError> {
    let task = tokio::task::spawn_blocking(move || rasterize_blocking(&pdf, options));
    match tokio::time::timeout(Duration::from_secs(timeout_secs), task).await {
        Err(_) => Err(RenderError::Timeout { secs: timeout_secs }),
        Ok(Err(join)) => Err(RenderError::Rasterisation(format!(
            "render task panicked: {join}"
        ))),
        Ok(Ok(result)) => result,
    }
}

/// Bind pdfium from `PDFIUM_LIB_PATH`, the working directory, or the system.
fn bind_pdfium() -> Result<Pdfium, RenderError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path).or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
        }),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| RenderError::Rasterisation(format!("cannot load pdfium: {e}")))?;
    Ok(Pdfium::new(bindings))
}

fn rasterize_blocking(pdf: &[u8], options: RasterOptions) -> Result<Vec<RenderedPage>, RenderError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| RenderError::Rasterisation(format!("corrupt PDF: {e}")))?;

    let max = options.max_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(options.dpi as f32 / 72.0)
        .set_maximum_width(max)
        .set_maximum_height(max)
        .set_text_smoothing(options.smoothing)
        .set_path_smoothing(options.smoothing)
        .set_image_smoothing(options.smoothing);

    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Rasterisation(format!("page {}: {e}", idx + 1)))?;
        let image = bitmap.as_image().to_rgb8();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        pages.push(RenderedPage {
            image,
            dpi: options.dpi,
        });
    }
    Ok(pages)
}

// ── Serialisation gate ───────────────────────────────────────────────────

/// Allows at most one `convert` call in flight on the wrapped client.
pub struct SerializedRenderer<R> {
    inner: R,
    gate: Mutex<()>,
}

impl<R: RenderClient> SerializedRenderer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: RenderClient> RenderClient for SerializedRenderer<R> {
    async fn convert(&self, document: &[u8], target_format: &str) -> Result<Vec<u8>, RenderError> {
        let _guard = self.gate.lock().await;
        self.inner.convert(document, target_format).await
    }

    async fn rasterize(
        &self,
        pdf: Vec<u8>,
        options: RasterOptions,
    ) -> Result<Vec<RenderedPage>, RenderError> {
        self.inner.rasterize(pdf, options).await
    }
}
