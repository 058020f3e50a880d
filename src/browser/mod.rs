//! Browser session lifecycle (spec §4.6): lazy acquire on first job, idle
//! teardown, screenshot on any terminal failure.
//!
//! Grounded on `monokrome-foiacquire/src/scrapers/browser/mod.rs`'s
//! `BrowserFetcher` (`Arc<Mutex<Browser>>`, `ensure_browser`, Chrome-path
//! discovery, spawned CDP event-handler task), narrowed from a general
//! stealth fetcher to a single-page authenticated session per spec §4.6
//! ("each session carries exactly one authenticated registry login").

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

fn find_chrome() -> anyhow::Result<std::path::PathBuf> {
    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(anyhow::anyhow!(
        "Chrome/Chromium not found; install it or set CHROME_PATH"
    ))
}

/// One authenticated browser context held by one worker (spec §4.6).
/// `credential_id` is set once `login` succeeds and is cleared on teardown,
/// so a successor job knows it must re-authenticate.
pub struct BrowserSession {
    browser: Arc<Mutex<Browser>>,
    page: Page,
    pub credential_id: Option<String>,
}

impl BrowserSession {
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Captures a screenshot on any terminal failure path (spec §4.6), as
    /// PNG bytes for upload alongside the failed job.
    pub async fn screenshot(&self) -> anyhow::Result<Vec<u8>> {
        self.page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .context("failed to capture error screenshot")
    }
}

/// Lazily acquires a [`BrowserSession`] and tears it down after
/// `idle_timeout` with no claim (spec §4.6).
pub struct BrowserSessionManager {
    idle_timeout: Duration,
    session: Mutex<Option<(BrowserSession, Instant)>>,
}

impl BrowserSessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            session: Mutex::new(None),
        }
    }

    /// Returns the live session, launching the browser on first call or
    /// after an idle teardown.
    pub async fn acquire(&self) -> anyhow::Result<tokio::sync::MappedMutexGuard<'_, BrowserSession>> {
        let mut guard = self.session.lock().await;

        let needs_fresh = match &*guard {
            None => true,
            Some((_, last_used)) => last_used.elapsed() > self.idle_timeout,
        };

        if needs_fresh {
            if guard.is_some() {
                info!("browser session idle past timeout, tearing down");
                *guard = None;
            }
            *guard = Some((Self::launch().await?, Instant::now()));
        }

        if let Some((_, last_used)) = guard.as_mut() {
            *last_used = Instant::now();
        }

        Ok(tokio::sync::MutexGuard::map(guard, |opt| &mut opt.as_mut().unwrap().0))
    }

    /// Tears down the session after a terminal failure; the next `acquire`
    /// launches a fresh one that must re-login (spec §4.6).
    pub async fn teardown(&self) {
        let mut guard = self.session.lock().await;
        *guard = None;
    }

    async fn launch() -> anyhow::Result<BrowserSession> {
        let chrome_path = find_chrome()?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    warn!("browser event handler task ending on error");
                    break;
                }
            }
        });

        let browser = Arc::new(Mutex::new(browser));
        let page = browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to open initial page")?;

        Ok(BrowserSession {
            browser,
            page,
            credential_id: None,
        })
    }
}
