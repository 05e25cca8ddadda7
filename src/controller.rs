use std::{
    path::PathBuf,
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};

use anyhow::Context as _;
use serde_json::json;

use crate::{
    error::{MaplapseError, MaplapseResult},
    webdriver::{Locator, WebDriverClient},
};

/// How the headless engine is launched.
///
/// The browser binary override exists for platforms where the binary lives in
/// a non-standard location (the original motivation was ARM-based macOS); it
/// is explicit configuration rather than runtime platform sniffing.
#[derive(Clone, Debug)]
pub struct BrowserConfig {
    /// Viewport in pixels. Both dimensions must be even: the encoder targets
    /// yuv420p, which subsamples chroma 2x2.
    pub viewport: (u32, u32),
    /// Path to the chromedriver binary (resolved via PATH by default).
    pub chromedriver: PathBuf,
    /// Explicit browser binary, when chromedriver should not auto-detect one.
    pub browser_binary: Option<PathBuf>,
    /// Required in environments without kernel-level sandbox support.
    pub no_sandbox: bool,
    pub disable_dev_shm: bool,
    /// How long to wait for chromedriver's /status to report ready.
    pub driver_startup_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            viewport: (1920, 940),
            chromedriver: PathBuf::from("chromedriver"),
            browser_binary: None,
            no_sandbox: true,
            disable_dev_shm: true,
            driver_startup_timeout: Duration::from_secs(10),
        }
    }
}

impl BrowserConfig {
    pub fn validate(&self) -> MaplapseResult<()> {
        let (w, h) = self.viewport;
        if w == 0 || h == 0 {
            return Err(MaplapseError::validation("viewport must be non-zero"));
        }
        if !w.is_multiple_of(2) || !h.is_multiple_of(2) {
            return Err(MaplapseError::validation(
                "viewport width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        Ok(())
    }

    fn capabilities(&self) -> serde_json::Value {
        let (w, h) = self.viewport;
        let mut args = vec![
            "--headless=new".to_string(),
            format!("--window-size={w},{h}"),
        ];
        if self.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        if self.disable_dev_shm {
            args.push("--disable-dev-shm-usage".to_string());
        }

        let mut chrome_options = json!({ "args": args });
        if let Some(binary) = &self.browser_binary {
            chrome_options["binary"] = json!(binary.to_string_lossy());
        }
        json!({ "alwaysMatch": { "goog:chromeOptions": chrome_options } })
    }
}

/// The one headless engine instance of a run: the driver process plus its
/// WebDriver session. Exclusively owned; the capture loop takes it by
/// `&mut`, which is what makes concurrent DOM mutation unrepresentable.
pub struct RenderSession {
    driver: Option<Child>,
    client: Option<WebDriverClient>,
}

impl RenderSession {
    pub(crate) fn client(&self) -> MaplapseResult<&WebDriverClient> {
        self.client
            .as_ref()
            .ok_or_else(|| MaplapseError::validation("render session is already closed"))
    }

    /// Tear the session down: delete the WebDriver session, then kill and
    /// reap the driver process. Idempotent; failures here are swallowed so
    /// teardown never masks whatever error caused it.
    pub fn close(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.quit();
        }
        if let Some(mut driver) = self.driver.take() {
            let _ = driver.kill();
            let _ = driver.wait();
            tracing::info!("render session closed");
        }
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owns the headless engine lifecycle: launch, readiness, mode selection.
pub struct Controller {
    cfg: BrowserConfig,
}

impl Controller {
    pub fn new(cfg: BrowserConfig) -> Self {
        Self { cfg }
    }

    /// Launch chromedriver, open a session and navigate it to `endpoint`.
    pub fn open(&self, endpoint: &str) -> MaplapseResult<RenderSession> {
        self.cfg.validate()?;

        let port = free_loopback_port()?;
        let base = format!("http://127.0.0.1:{port}");

        let child = Command::new(&self.cfg.chromedriver)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "failed to spawn chromedriver '{}' (is it installed?)",
                    self.cfg.chromedriver.display()
                )
            })?;

        let mut session = RenderSession {
            driver: Some(child),
            client: None,
        };

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(60))
            .build();

        let deadline = Instant::now() + self.cfg.driver_startup_timeout;
        while !WebDriverClient::driver_ready(&agent, &base) {
            if Instant::now() > deadline {
                session.close();
                return Err(MaplapseError::Other(anyhow::anyhow!(
                    "chromedriver did not report ready within {:?}",
                    self.cfg.driver_startup_timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        let client = match WebDriverClient::new_session(agent, &base, self.cfg.capabilities()) {
            Ok(client) => client,
            Err(err) => {
                session.close();
                return Err(err);
            }
        };
        session.client = Some(client);

        tracing::info!(endpoint, "navigating render session");
        if let Err(err) = session.client()?.goto(endpoint) {
            session.close();
            return Err(err);
        }
        Ok(session)
    }

    /// Poll for the map anchor until it appears or the timeout elapses.
    ///
    /// On timeout the current URL and page markup are fetched first, so the
    /// propagated error tells the operator what the page actually looked like.
    pub fn wait_ready(
        &self,
        session: &mut RenderSession,
        anchor_selector: &str,
        timeout: Duration,
    ) -> MaplapseResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match session.client()?.find_element(Locator::Css, anchor_selector) {
                Ok(_) => {
                    tracing::info!(anchor = anchor_selector, "page ready");
                    return Ok(());
                }
                Err(MaplapseError::ControlNotFound(_)) => {
                    if Instant::now() > deadline {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(other) => return Err(other),
            }
        }

        let client = session.client()?;
        let url = client
            .current_url()
            .unwrap_or_else(|_| "<unavailable>".to_string());
        let page_source = truncate_page_source(
            client
                .page_source()
                .unwrap_or_else(|_| "<unavailable>".to_string()),
        );

        Err(MaplapseError::RenderTimeout {
            message: format!("anchor '{anchor_selector}' not present within {timeout:?}"),
            url,
            page_source,
        })
    }

    /// Click the view-mode button carrying the given visible label.
    pub fn select_mode(&self, session: &mut RenderSession, mode_label: &str) -> MaplapseResult<()> {
        // The label is interpolated into a single-quoted XPath string; a
        // quote inside it would produce an invalid query and a confusing
        // driver error instead of a clean rejection.
        if mode_label.contains('\'') {
            return Err(MaplapseError::validation(format!(
                "mode label '{mode_label}' must not contain single quotes"
            )));
        }
        let xpath = format!("//button[contains(text(), '{mode_label}')]");
        let element = session
            .client()?
            .find_element(Locator::XPath, &xpath)
            .map_err(|err| match err {
                MaplapseError::ControlNotFound(_) => MaplapseError::control_not_found(format!(
                    "no control with visible label '{mode_label}' \
                     (incompatible page version?)"
                )),
                other => other,
            })?;
        session.client()?.click(&element)?;
        tracing::info!(mode = mode_label, "visualization mode selected");
        Ok(())
    }
}

const PAGE_SOURCE_LIMIT: usize = 4096;

/// Cap diagnostic markup at [`PAGE_SOURCE_LIMIT`] bytes, cutting only on a
/// char boundary: the page is arbitrary UTF-8 and a mid-character truncate
/// would panic on the very path that exists to report a failure.
fn truncate_page_source(mut source: String) -> String {
    if source.len() > PAGE_SOURCE_LIMIT {
        let mut cut = PAGE_SOURCE_LIMIT;
        while !source.is_char_boundary(cut) {
            cut -= 1;
        }
        source.truncate(cut);
    }
    source
}

fn free_loopback_port() -> MaplapseResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .context("reserve a loopback port for chromedriver")?;
    let port = listener
        .local_addr()
        .context("resolve reserved loopback port")?
        .port();
    Ok(port)
}
