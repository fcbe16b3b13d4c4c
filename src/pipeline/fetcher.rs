use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header;
use tracing::debug;

use super::html::HtmlTextExtractor;
use crate::error::{PipelineError, PipelineResult};

pub const USER_AGENT: &str =
    "foundry-steward/0.1 (directory data verification; contact: directory maintainers)";
pub const CANDIDATE_PATHS: &[&str] = &["/about", "/info", "/studio", ""];
/// Anything shorter is treated as a blocked or script-only render.
pub const MIN_CONTENT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub text: String,
}

pub trait ContentFetcher {
    fn fetch(&self, base_url: &str) -> PipelineResult<FetchedPage>;
}

pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    with_scheme.trim_end_matches('/').to_string()
}

pub fn candidate_urls(base_url: &str) -> Vec<String> {
    let base = normalize_base_url(base_url);
    CANDIDATE_PATHS
        .iter()
        .map(|path| format!("{base}{path}"))
        .collect()
}

/// Walks the candidate pages in order and returns the first with enough text.
pub(crate) fn first_usable_page<F>(
    base_url: &str,
    extractor: &HtmlTextExtractor,
    mut load_html: F,
) -> PipelineResult<FetchedPage>
where
    F: FnMut(&str) -> std::result::Result<String, String>,
{
    let mut attempts = Vec::new();

    for url in candidate_urls(base_url) {
        match load_html(&url) {
            Ok(html) => {
                let text = extractor.extract(&html);
                let chars = text.chars().count();
                if chars > MIN_CONTENT_CHARS {
                    debug!(url = %url, chars, "candidate page accepted");
                    return Ok(FetchedPage { url, text });
                }
                attempts.push(format!("{url}: only {chars} chars of text"));
            }
            Err(reason) => attempts.push(format!("{url}: {reason}")),
        }
    }

    Err(PipelineError::FetchUnavailable {
        base_url: normalize_base_url(base_url),
        reason: attempts.join("; "),
    })
}

pub struct HttpFetcher {
    client: Client,
    extractor: HtmlTextExtractor,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/html,application/xhtml+xml"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("failed to build http client for content fetch")?;

        Ok(Self {
            client,
            extractor: HtmlTextExtractor::new().context("failed to compile html patterns")?,
        })
    }

    fn load_html(&self, url: &str) -> std::result::Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|error| format!("request failed: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("http status {status}"));
        }

        response
            .text()
            .map_err(|error| format!("body read failed: {error}"))
    }
}

impl ContentFetcher for HttpFetcher {
    fn fetch(&self, base_url: &str) -> PipelineResult<FetchedPage> {
        first_usable_page(base_url, &self.extractor, |url| self.load_html(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_scheme_and_loses_trailing_slash() {
        assert_eq!(normalize_base_url("acme.type/"), "https://acme.type");
        assert_eq!(normalize_base_url(" http://acme.type "), "http://acme.type");
    }

    #[test]
    fn candidates_follow_fixed_order_ending_with_bare_base() {
        assert_eq!(
            candidate_urls("acme.type"),
            vec![
                "https://acme.type/about",
                "https://acme.type/info",
                "https://acme.type/studio",
                "https://acme.type",
            ]
        );
    }

    #[test]
    fn first_usable_page_skips_errors_and_short_pages() {
        let extractor = HtmlTextExtractor::new().expect("patterns should compile");
        let long_text = "Acme Type is an independent foundry. ".repeat(10);
        let mut seen = Vec::new();

        let page = first_usable_page("acme.type", &extractor, |url| {
            seen.push(url.to_string());
            match url {
                "https://acme.type/about" => Err("http status 404 Not Found".to_string()),
                "https://acme.type/info" => Ok("<p>Loading...</p>".to_string()),
                _ => Ok(format!("<main>{long_text}</main>")),
            }
        })
        .expect("studio page should be accepted");

        assert_eq!(page.url, "https://acme.type/studio");
        assert_eq!(seen.len(), 3, "bare base must not be fetched after a hit");
    }

    #[test]
    fn exhausted_candidates_are_fetch_unavailable() {
        let extractor = HtmlTextExtractor::new().expect("patterns should compile");
        let error = first_usable_page("acme.type", &extractor, |_| Ok("<p>hi</p>".to_string()))
            .expect_err("short pages should not be accepted");

        assert_eq!(error.kind(), "fetch_unavailable");
        assert!(error.to_string().contains("https://acme.type"));
    }
}
