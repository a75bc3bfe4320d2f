//! Page fetch with a bounded timeout.
//!
//! One shared `reqwest::Client` per worker process; the timeout is set on the
//! client so no fetch can block a pool slot indefinitely.

use crate::error::JobError;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("docsynth/", env!("CARGO_PKG_VERSION"));

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Build the HTTP client used for page fetches.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
}

/// GET `url` and return the body as text.
///
/// Any status other than 200 is a [`JobError::Fetch`]; a timeout is a
/// [`JobError::FetchTimeout`].
pub async fn fetch_page(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<String, JobError> {
    if !is_url(url) {
        return Err(JobError::Fetch {
            url: url.to_string(),
            reason: "not an http(s) URL".to_string(),
        });
    }

    let response = client.get(url).send().await.map_err(|e| map_err(url, timeout_secs, e))?;

    if response.status() != StatusCode::OK {
        return Err(JobError::Fetch {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| map_err(url, timeout_secs, e))?;
    debug!("Fetched {} ({} bytes)", url, body.len());
    Ok(body)
}

fn map_err(url: &str, timeout_secs: u64, e: reqwest::Error) -> JobError {
    if e.is_timeout() {
        JobError::FetchTimeout {
            url: url.to_string(),
            secs: timeout_secs,
        }
    } else {
        JobError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one request on a loopback port with `status_line` and no body.
    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let reply = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            let _ = socket.write_all(reply.as_bytes()).await;
        });
        format!("http://{addr}/wiki/X")
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://ru.wikipedia.org/wiki/X"));
        assert!(is_url("http://localhost:8080/"));
        assert!(!is_url("ftp://example.com"));
        assert!(!is_url("/local/path.html"));
    }

    #[tokio::test]
    async fn non_url_is_rejected_without_network() {
        let client = http_client(1).unwrap();
        let err = fetch_page(&client, "wiki/X", 1).await.unwrap_err();
        assert!(matches!(err, JobError::Fetch { .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_a_fetch_error() {
        // Port 9 (discard) is essentially never listening on loopback.
        let client = http_client(2).unwrap();
        let err = fetch_page(&client, "http://127.0.0.1:9/", 2)
            .await
            .unwrap_err();
        assert!(
            matches!(err, JobError::Fetch { .. } | JobError::FetchTimeout { .. }),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn not_found_is_a_fetch_error() {
        let url = serve_once("404 Not Found").await;
        let client = http_client(5).unwrap();
        let err = fetch_page(&client, &url, 5).await.unwrap_err();
        match err {
            JobError::Fetch { reason, .. } => assert!(reason.contains("404"), "{reason}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn only_200_is_accepted() {
        let url = serve_once("204 No Content").await;
        let client = http_client(5).unwrap();
        assert!(fetch_page(&client, &url, 5).await.is_err());

        let url = serve_once("200 OK").await;
        assert_eq!(fetch_page(&client, &url, 5).await.unwrap(), "");
    }
}
