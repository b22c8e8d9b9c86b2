use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use htmd::HtmlToMarkdown;
use jobscout_core::error::AppError;
use jobscout_core::organization::PostingLink;
use jobscout_core::traits::{FetchedPage, PageFetcher};
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

const MAX_CONTEXT_CHARS: usize = 200;

/// HTTP page fetcher using reqwest.
///
/// Downloads a page, converts it to Markdown text, and extracts its
/// links with display text and surrounding context. By default, SSRF
/// protection is **enabled** — requests to private/reserved IP ranges
/// are blocked. Use [`allow_private_urls`](Self::allow_private_urls) to
/// disable this (e.g., for CLI usage where the user controls the
/// machine).
pub struct ReqwestPageFetcher {
    client: Client,
    converter: Arc<HtmlToMarkdown>,
    timeout_secs: u64,
    ssrf_protection: bool,
}

impl Clone for ReqwestPageFetcher {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            converter: Arc::clone(&self.converter),
            timeout_secs: self.timeout_secs,
            ssrf_protection: self.ssrf_protection,
        }
    }
}

impl ReqwestPageFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let timeout_secs = timeout.as_secs();
        let client = Client::builder()
            .user_agent("jobscout/0.2 (careers-page scout)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Http(e.to_string()))?;

        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Ok(Self {
            client,
            converter: Arc::new(converter),
            timeout_secs,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    fn parse_page(&self, html: &str, base_url: &str) -> FetchedPage {
        let content = match self.converter.convert(html) {
            Ok(markdown) => markdown,
            Err(error) => {
                tracing::warn!(error = %error, "Markdown conversion failed, using raw HTML");
                html.to_string()
            }
        };
        FetchedPage {
            content,
            links: extract_links(html, base_url),
        }
    }
}

impl PageFetcher for ReqwestPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::Network(format!("Connection failed: {e}"))
            } else {
                AppError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Http(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| AppError::Http(format!("Failed to read response body: {e}")))?;

        Ok(self.parse_page(&html, url))
    }
}

/// Pull every anchor out of the page as a [`PostingLink`], absolutized
/// against the page URL, with the parent element's text as context.
fn extract_links(html: &str, base_url: &str) -> Vec<PostingLink> {
    let document = Html::parse_document(html);
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut links = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        let Some(url) = resolve_href(href, base.as_ref()) else {
            continue;
        };
        let text = collapse_whitespace(&element.text().collect::<String>());
        if text.is_empty() {
            continue;
        }
        let context = element
            .parent()
            .and_then(scraper::ElementRef::wrap)
            .map(|parent| collapse_whitespace(&parent.text().collect::<String>()))
            .map(|text| truncate(&text, MAX_CONTEXT_CHARS))
            .unwrap_or_default();

        links.push(PostingLink::new(url, text).with_context(context));
    }
    links
}

fn resolve_href(href: &str, base: Option<&Url>) -> Option<String> {
    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }
    base.and_then(|b| b.join(href).ok()).map(|u| u.to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::Http(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Http(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Http("URL has no host".to_string()))?;

    // An IP literal can be checked directly.
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::Http(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port().unwrap_or(match parsed.scheme() {
        "https" => 443,
        _ => 80,
    });
    let addr = format!("{host}:{port}");
    let addrs: Vec<_> = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| AppError::Network(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::Network(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for socket_addr in &addrs {
        if is_private_ip(socket_addr.ip()) {
            return Err(AppError::Http(format!(
                "SSRF blocked: {host} resolves to private/reserved IP {}",
                socket_addr.ip()
            )));
        }
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()           // 127.0.0.0/8
                || v4.is_private()     // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()  // 169.254.0.0/16 (cloud metadata!)
                || v4.is_unspecified() // 0.0.0.0
                || v4.is_broadcast()   // 255.255.255.255
                || v4.is_documentation() // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()       // ::1
                || v6.is_unspecified() // ::
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // IPv4-mapped IPv6 (::ffff:x.x.x.x) — check the embedded v4
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}
