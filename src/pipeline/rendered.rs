use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::fetcher::{ContentFetcher, FetchedPage, USER_AGENT, first_usable_page};
use super::html::HtmlTextExtractor;
use crate::error::PipelineResult;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Renders candidates in a headless Chromium-compatible browser before extraction,
/// for sites that build their content client-side.
pub struct RenderedFetcher {
    browser_binary: PathBuf,
    timeout: Duration,
    extractor: HtmlTextExtractor,
}

impl RenderedFetcher {
    pub fn new(browser_binary: PathBuf, timeout: Duration) -> Result<Self> {
        Ok(Self {
            browser_binary,
            timeout,
            extractor: HtmlTextExtractor::new().context("failed to compile html patterns")?,
        })
    }

    fn render(&self, url: &str) -> std::result::Result<String, String> {
        let budget_ms = self.timeout.as_millis().max(1000) / 2;
        let child = Command::new(&self.browser_binary)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg(format!("--user-agent={USER_AGENT}"))
            .arg(format!("--virtual-time-budget={budget_ms}"))
            .arg("--dump-dom")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| {
                format!(
                    "failed to launch {}: {error}",
                    self.browser_binary.display()
                )
            })?;

        wait_with_deadline(child, self.timeout)
    }
}

impl ContentFetcher for RenderedFetcher {
    fn fetch(&self, base_url: &str) -> PipelineResult<FetchedPage> {
        first_usable_page(base_url, &self.extractor, |url| self.render(url))
    }
}

fn wait_with_deadline(mut child: Child, timeout: Duration) -> std::result::Result<String, String> {
    let Some(mut stdout) = child.stdout.take() else {
        return Err("browser stdout was not captured".to_string());
    };
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("render timed out after {} ms", timeout.as_millis()));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(error) => return Err(format!("failed to wait for browser: {error}")),
        }
    };

    let output = reader
        .join()
        .map_err(|_| "browser output reader panicked".to_string())?;

    if !status.success() {
        return Err(format!("browser exited with {status}"));
    }

    Ok(String::from_utf8_lossy(&output).into_owned())
}
