use std::{net::IpAddr, time::Duration};

use common::error::AppError;
use dom_smoothie::{Article, Readability, TextMode};
use tracing::{info, warn};

use crate::pipeline::context::{FetchedContent, ParsedContent};

/// Fetch stage: plain HTTP GET with a mandatory timeout. No JS
/// rendering or screenshotting — a single resource fetch doesn't need a
/// browser, just bytes and a content-type.
pub async fn fetch_url(url: &str, timeout: Duration) -> Result<FetchedContent, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|_| AppError::Validation("Invalid URL".to_string()))?;
    ensure_ingestion_url_allowed(&parsed_url)?;

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(AppError::from)?;

    info!(%url, "fetching ingestion URL");
    let response = client.get(url).send().await?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?.to_vec();

    Ok(FetchedContent {
        bytes,
        content_type,
    })
}

/// Parse stage: readability extraction over fetched HTML bytes.
pub fn parse_content(fetched: &FetchedContent) -> Result<ParsedContent, AppError> {
    let html = String::from_utf8_lossy(&fetched.bytes).into_owned();
    let config = dom_smoothie::Config {
        text_mode: TextMode::Markdown,
        ..Default::default()
    };
    let mut readability = Readability::new(html, None, Some(config))?;
    let article: Article = readability.parse()?;

    Ok(ParsedContent {
        text: article.text_content.into(),
        title: Some(article.title).filter(|t| !t.is_empty()),
    })
}

/// SSRF guard for ingestion URLs: rejects non-http(s) schemes, missing
/// hosts, localhost, and private/link-local/loopback/unspecified/
/// multicast address ranges. Returns the sanitized host, suitable for use
/// in archive path components.
pub fn ensure_ingestion_url_allowed(url: &url::Url) -> Result<String, AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "Rejected ingestion URL due to unsupported scheme");
            return Err(AppError::Validation(
                "Unsupported URL scheme for ingestion".to_string(),
            ));
        }
    }

    let Some(host) = url.host_str() else {
        warn!(%url, "Rejected ingestion URL missing host");
        return Err(AppError::Validation(
            "URL is missing a host component".to_string(),
        ));
    };

    if host.eq_ignore_ascii_case("localhost") {
        warn!(%url, host, "Rejected ingestion URL to localhost");
        return Err(AppError::Validation(
            "Ingestion URL host is not allowed".to_string(),
        ));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        let is_disallowed = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
        };

        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || is_disallowed {
            warn!(%url, host, %ip, "Rejected ingestion URL pointing to restricted network range");
            return Err(AppError::Validation(
                "Ingestion URL host is not allowed".to_string(),
            ));
        }
    }

    Ok(host.replace(|c: char| !c.is_alphanumeric(), "_"))
}
