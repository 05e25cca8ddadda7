//! Minimal blocking W3C WebDriver client.
//!
//! The pipeline drives a single session through a handful of endpoints
//! (navigate, find, click, execute, screenshot), all plain JSON over HTTP, so
//! a thin client on top of `ureq` keeps the whole automation path synchronous
//! and dependency-light — the same stance taken with the system `ffmpeg`
//! binary for encoding.

use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use crate::error::{MaplapseError, MaplapseResult};

/// W3C element identifier key in wire payloads.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Locator strategies the pipeline uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locator {
    Css,
    XPath,
}

impl Locator {
    fn wire_name(self) -> &'static str {
        match self {
            Locator::Css => "css selector",
            Locator::XPath => "xpath",
        }
    }
}

#[derive(Deserialize)]
struct WdReply<T> {
    value: T,
}

#[derive(Deserialize)]
struct NewSessionValue {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// One WebDriver session against a running driver process.
pub struct WebDriverClient {
    agent: ureq::Agent,
    base: String,
    session_id: String,
}

impl WebDriverClient {
    /// Whether the driver at `base` reports itself ready to accept a session.
    pub fn driver_ready(agent: &ureq::Agent, base: &str) -> bool {
        agent
            .get(&format!("{base}/status"))
            .call()
            .ok()
            .and_then(|resp| resp.into_json::<serde_json::Value>().ok())
            .and_then(|body| body["value"]["ready"].as_bool())
            .unwrap_or(false)
    }

    /// Create a session with the given W3C capabilities object.
    pub fn new_session(
        agent: ureq::Agent,
        base: impl Into<String>,
        capabilities: serde_json::Value,
    ) -> MaplapseResult<Self> {
        let base = base.into();
        let reply: WdReply<NewSessionValue> = agent
            .post(&format!("{base}/session"))
            .send_json(json!({ "capabilities": capabilities }))
            .map_err(|e| wire_error("create session", e))?
            .into_json()
            .map_err(|e| wire_error_io("parse create-session reply", e))?;

        tracing::debug!(session = %reply.value.session_id, "webdriver session created");
        Ok(Self {
            agent,
            base,
            session_id: reply.value.session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}{path}", self.base, self.session_id)
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        ctx: &str,
    ) -> MaplapseResult<T> {
        let reply: WdReply<T> = self
            .agent
            .get(&self.session_url(path))
            .call()
            .map_err(|e| wire_error(ctx, e))?
            .into_json()
            .map_err(|e| wire_error_io(ctx, e))?;
        Ok(reply.value)
    }

    fn post_value(
        &self,
        path: &str,
        body: serde_json::Value,
        ctx: &str,
    ) -> MaplapseResult<serde_json::Value> {
        let reply: WdReply<serde_json::Value> = self
            .agent
            .post(&self.session_url(path))
            .send_json(body)
            .map_err(|e| wire_error(ctx, e))?
            .into_json()
            .map_err(|e| wire_error_io(ctx, e))?;
        Ok(reply.value)
    }

    pub fn goto(&self, url: &str) -> MaplapseResult<()> {
        self.post_value("/url", json!({ "url": url }), "navigate")?;
        Ok(())
    }

    pub fn current_url(&self) -> MaplapseResult<String> {
        self.get_value("/url", "read current url")
    }

    pub fn page_source(&self) -> MaplapseResult<String> {
        self.get_value("/source", "read page source")
    }

    /// Find one element; absence maps to [`MaplapseError::ControlNotFound`] so
    /// callers can either treat it as fatal or keep polling.
    pub fn find_element(&self, locator: Locator, selector: &str) -> MaplapseResult<String> {
        let value = self.post_value(
            "/element",
            json!({ "using": locator.wire_name(), "value": selector }),
            "find element",
        )?;
        value[ELEMENT_KEY]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                MaplapseError::control_not_found(format!(
                    "driver reply for '{selector}' carried no element id"
                ))
            })
    }

    pub fn click(&self, element_id: &str) -> MaplapseResult<()> {
        self.post_value(
            &format!("/element/{element_id}/click"),
            json!({}),
            "click element",
        )?;
        Ok(())
    }

    /// Execute a synchronous script in the page, returning its result.
    pub fn execute(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> MaplapseResult<serde_json::Value> {
        self.post_value(
            "/execute/sync",
            json!({ "script": script, "args": args }),
            "execute script",
        )
    }

    /// Capture the viewport as PNG bytes.
    pub fn screenshot_png(&self) -> MaplapseResult<Vec<u8>> {
        let encoded: String = self.get_value("/screenshot", "take screenshot")?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| wire_error_msg("decode screenshot", &e.to_string()))
    }

    /// Delete the session. Best-effort on the teardown path; errors are
    /// surfaced so the caller decides whether to swallow them.
    pub fn quit(&self) -> MaplapseResult<()> {
        self.agent
            .delete(&self.session_url(""))
            .call()
            .map_err(|e| wire_error("delete session", e))?;
        Ok(())
    }
}

fn wire_error(ctx: &str, err: ureq::Error) -> MaplapseError {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_json::<serde_json::Value>().unwrap_or_default();
            let kind = body["value"]["error"].as_str().unwrap_or("").to_string();
            let message = body["value"]["message"].as_str().unwrap_or("").to_string();
            if kind == "no such element" {
                MaplapseError::control_not_found(message)
            } else {
                wire_error_msg(ctx, &format!("driver returned {code} {kind}: {message}"))
            }
        }
        other => wire_error_msg(ctx, &other.to_string()),
    }
}

fn wire_error_io(ctx: &str, err: std::io::Error) -> MaplapseError {
    wire_error_msg(ctx, &err.to_string())
}

fn wire_error_msg(ctx: &str, detail: &str) -> MaplapseError {
    MaplapseError::Other(anyhow::anyhow!("webdriver {ctx}: {detail}"))
}
