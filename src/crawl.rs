//! Breadth-first discovery of article URLs.
//!
//! Starting from one page, every `a[href]` is resolved against its page and
//! kept when it looks like an article of the allowed site in one of the
//! wanted languages. Pages are visited in discovery order until enough URLs
//! are known.

use crate::config::CrawlConfig;
use crate::error::SynthError;
use crate::pipeline::fetch::{fetch_page, http_client};
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, warn};

static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("link selector"));

/// Whether `url` is an article page this crawl should keep.
pub fn is_candidate_url(url: &Url, config: &CrawlConfig) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    if !host.contains(&config.allowed_domain)
        || !config.languages.iter().any(|lang| host.contains(lang.as_str()))
    {
        return false;
    }
    let path = url.path();
    path.starts_with(&config.path_prefix) && !path.contains(':') && !path.contains("/wiki/Main_Page")
}

/// All links of a page, resolved against `base`, without fragments.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let page = Html::parse_document(html);
    page.select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect()
}

/// Crawl from `config.start_page` until `config.max_urls` URLs are known.
///
/// The start page counts towards the limit but is not returned. A failed
/// fetch ends the crawl early with whatever was found; only an empty result
/// is an error.
pub async fn crawl(
    config: &CrawlConfig,
    progress: Option<&ProgressCallback>,
) -> Result<Vec<String>, SynthError> {
    let start = Url::parse(&config.start_page).map_err(|e| SynthError::CrawlFailed {
        start: config.start_page.clone(),
        reason: e.to_string(),
    })?;
    let client = http_client(config.fetch_timeout_secs).map_err(|e| SynthError::CrawlFailed {
        start: config.start_page.clone(),
        reason: e.to_string(),
    })?;

    let mut urls = vec![start.to_string()];
    let mut seen: HashSet<String> = urls.iter().cloned().collect();
    let mut cursor = 0;
    let mut stop_reason: Option<String> = None;

    info!("Crawling from {} (limit {})", config.start_page, config.max_urls);
    while urls.len() < config.max_urls {
        let Some(current) = urls.get(cursor).cloned() else {
            debug!("Frontier exhausted after {} pages", cursor);
            break;
        };
        cursor += 1;

        let body = match fetch_page(&client, &current, config.fetch_timeout_secs).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Crawl stopped: {e}");
                stop_reason = Some(e.to_string());
                break;
            }
        };
        let base = match Url::parse(&current) {
            Ok(u) => u,
            Err(_) => continue,
        };

        for link in extract_links(&body, &base) {
            if urls.len() >= config.max_urls {
                break;
            }
            if !is_candidate_url(&link, config) {
                continue;
            }
            let link = link.to_string();
            if seen.insert(link.clone()) {
                urls.push(link);
                if let Some(cb) = progress {
                    cb.on_crawl_progress(urls.len(), config.max_urls);
                }
            }
        }
    }

    urls.remove(0);
    if urls.is_empty() {
        return Err(SynthError::CrawlFailed {
            start: config.start_page.clone(),
            reason: stop_reason.unwrap_or_else(|| "no matching links".to_string()),
        });
    }
    info!("Crawl collected {} URLs", urls.len());
    Ok(urls)
}
