#![cfg(feature = "web")]

use base64::{Engine as _, engine::general_purpose::STANDARD};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

lazy_static! {
    static ref DRIVE_PATH_ID: Regex = Regex::new(r"/d/([a-zA-Z0-9_-]+)").unwrap();
    static ref DRIVE_QUERY_ID: Regex = Regex::new(r"id=([a-zA-Z0-9_-]+)").unwrap();
}

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
const IMAGE_ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

/// Rewrite a Google Drive share link into a direct download link
///
/// Drive links point at a viewer page, not at the file. Both share formats
/// (`/file/d/<id>/view` and `open?id=<id>`) are recognised; any other URL is
/// returned unchanged.
pub fn convert_gdrive_url(url: &str) -> String {
    if url.contains("drive.google.com") {
        let id = DRIVE_PATH_ID
            .captures(url)
            .or_else(|| DRIVE_QUERY_ID.captures(url))
            .and_then(|caps| caps.get(1));
        if let Some(id) = id {
            return format!(
                "https://drive.google.com/uc?export=download&id={}",
                id.as_str()
            );
        }
    }
    url.to_string()
}

/// Downloads client logos and keeps them as `data:` URLs.
///
/// Email clients often block remote images, so the logo is embedded in the
/// report. Failed downloads are cached too: a broken logo link should not cost
/// a timeout on every page view.
pub struct LogoCache {
    client: reqwest::Client,
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Option<String>)>>,
}

impl LogoCache {
    pub fn new(client: reqwest::Client, ttl: Duration) -> Self {
        LogoCache {
            client,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_timeout(timeout: Duration, ttl: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client, ttl))
    }

    /// The logo as a `data:` URL, or `None` if it can't be fetched as an image.
    pub async fn data_url(&self, url: &str) -> Option<String> {
        let url = url.trim();
        if !url.starts_with("http") {
            return None;
        }

        if let Some(cached) = self.cached(url) {
            return cached;
        }

        let fetched = self.fetch(url).await;
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), (Instant::now(), fetched.clone()));
        fetched
    }

    fn cached(&self, url: &str) -> Option<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(url)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        let download = convert_gdrive_url(url);
        let response = match self
            .client
            .get(&download)
            .header(USER_AGENT, BROWSER_AGENT)
            .header(ACCEPT, IMAGE_ACCEPT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("logo download failed for {}: {}", download, e);
                return None;
            }
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        // Drive answers with an HTML page when the file is not shared publicly
        if !content_type.contains("image") {
            debug!("logo at {} is not an image ({})", download, content_type);
            return None;
        }

        let bytes = response.bytes().await.ok()?;
        Some(to_data_url(&content_type, &bytes))
    }
}

pub fn to_data_url(content_type: &str, bytes: &[u8]) -> String {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, extract::State, routing::get};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Serves `/logo.png` as an image and `/share` as the HTML page Drive shows
    // for files that are not public. Every request is counted.
    async fn serve(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route(
                "/logo.png",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    ([(CONTENT_TYPE, "image/png")], vec![1u8, 2, 3])
                }),
            )
            .route(
                "/share",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (
                        [(CONTENT_TYPE, "text/html; charset=utf-8")],
                        "<html>Solicita acceso</html>",
                    )
                }),
            )
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[test]
    fn test_drive_share_links() {
        assert_eq!(
            convert_gdrive_url("https://drive.google.com/file/d/1A2b_C-3/view?usp=sharing"),
            "https://drive.google.com/uc?export=download&id=1A2b_C-3"
        );
        assert_eq!(
            convert_gdrive_url("https://drive.google.com/open?id=XyZ_09"),
            "https://drive.google.com/uc?export=download&id=XyZ_09"
        );
    }

    #[test]
    fn test_other_urls_unchanged() {
        assert_eq!(
            convert_gdrive_url("https://cdn.example.com/logo.png"),
            "https://cdn.example.com/logo.png"
        );
        assert_eq!(
            convert_gdrive_url("https://drive.google.com/drive/folders"),
            "https://drive.google.com/drive/folders"
        );
    }

    #[test]
    fn test_data_url_drops_parameters() {
        assert_eq!(
            to_data_url("image/png; charset=binary", &[1, 2, 3]),
            "data:image/png;base64,AQID"
        );
    }

    #[tokio::test]
    async fn test_non_http_urls_are_skipped() {
        let cache = LogoCache::new(reqwest::Client::new(), Duration::from_secs(60));
        assert_eq!(cache.data_url("").await, None);
        assert_eq!(cache.data_url("logo.png").await, None);
        assert_eq!(cache.data_url("ftp://example.com/logo.png").await, None);
    }

    #[tokio::test]
    async fn test_image_is_embedded_and_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(hits.clone()).await;
        let cache = LogoCache::new(reqwest::Client::new(), Duration::from_secs(3600));
        let url = format!("{}/logo.png", base);

        assert_eq!(
            cache.data_url(&url).await.as_deref(),
            Some("data:image/png;base64,AQID")
        );
        assert_eq!(
            cache.data_url(&url).await.as_deref(),
            Some("data:image/png;base64,AQID")
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_html_page_is_not_a_logo_and_is_cached_too() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(hits.clone()).await;
        let cache = LogoCache::new(reqwest::Client::new(), Duration::from_secs(3600));
        let url = format!("{}/share", base);

        assert_eq!(cache.data_url(&url).await, None);
        assert_eq!(cache.data_url(&url).await, None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_fetched_again() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(hits.clone()).await;
        let cache = LogoCache::new(reqwest::Client::new(), Duration::ZERO);
        let url = format!("{}/logo.png", base);

        cache.data_url(&url).await;
        cache.data_url(&url).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
