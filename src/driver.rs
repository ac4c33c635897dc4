//! UI-driving capability: the trait the core consumes, plus an HTTP
//! implementation that speaks to a local browser-automation service.
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("network error: {0}")]
    Network(String),
    #[error("automation service error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid driver endpoint: {0}")]
    Endpoint(String),
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        DriverError::Network(err.to_string())
    }
}

/// Result of observing whether the page shows a logged-in surface.
/// `Inconclusive` is reserved for observations that could not be made at
/// all; callers treat it as not logged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginProbe {
    LoggedIn,
    NotLoggedIn,
    Inconclusive,
}

/// Everything the core needs from a browser. One implementor drives one
/// session at a time; `open_session` binds it to a persistent profile
/// directory and `close_session` must be called on every exit path.
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn open_session(&self, profile_dir: &Path) -> DriverResult<()>;
    async fn goto(&self, url: &str) -> DriverResult<()>;
    async fn fill(&self, locator: &str, text: &str) -> DriverResult<()>;
    async fn click(&self, locator: &str) -> DriverResult<()>;
    /// Pick an option in a native select element.
    async fn select(&self, locator: &str, value: &str) -> DriverResult<()>;
    /// Visible text of the page body.
    async fn body_text(&self) -> DriverResult<String>;
    async fn page_html(&self) -> DriverResult<String>;
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;
    /// Wait for asynchronous rendering before the next observation.
    async fn settle(&self, wait: Duration);
    async fn close_session(&self) -> DriverResult<()>;
}

/// Driver backed by a browserless-style automation service: one POST
/// endpoint per page operation, optional token passed as a query param.
pub struct HttpDriver {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for HttpDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDriver")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpDriver {
    pub fn new(base_url: &str, token: Option<&str>) -> DriverResult<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| DriverError::Endpoint(e.to_string()))?;
        let http = Client::builder()
            .user_agent("postfleet/0.1")
            .timeout(Duration::from_secs(90))
            .no_proxy()
            .build()
            .expect("reqwest client");
        Ok(Self {
            http,
            base_url,
            token: token.map(String::from),
        })
    }

    fn endpoint(&self, op: &str) -> DriverResult<Url> {
        let mut url = self
            .base_url
            .join(op)
            .map_err(|e| DriverError::Endpoint(e.to_string()))?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    async fn post(&self, op: &str, body: serde_json::Value) -> DriverResult<reqwest::Response> {
        let endpoint = self.endpoint(op)?;
        debug!(%endpoint, "driver request");
        let res = self.http.post(endpoint).json(&body).send().await?;
        let status = res.status();
        if !status.is_success() {
            let message = res.text().await.unwrap_or_default();
            return Err(DriverError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(res)
    }
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

#[async_trait]
impl UiDriver for HttpDriver {
    async fn open_session(&self, profile_dir: &Path) -> DriverResult<()> {
        self.post(
            "session/open",
            json!({ "profileDir": profile_dir.to_string_lossy(), "headless": true }),
        )
        .await?;
        Ok(())
    }

    async fn goto(&self, url: &str) -> DriverResult<()> {
        self.post("page/goto", json!({ "url": url })).await?;
        Ok(())
    }

    async fn fill(&self, locator: &str, text: &str) -> DriverResult<()> {
        self.post("page/fill", json!({ "locator": locator, "text": text }))
            .await?;
        Ok(())
    }

    async fn click(&self, locator: &str) -> DriverResult<()> {
        self.post("page/click", json!({ "locator": locator })).await?;
        Ok(())
    }

    async fn select(&self, locator: &str, value: &str) -> DriverResult<()> {
        self.post(
            "page/select",
            json!({ "locator": locator, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn body_text(&self) -> DriverResult<String> {
        let res = self.post("page/text", json!({ "locator": "body" })).await?;
        let payload: TextResponse = res.json().await?;
        Ok(payload.text)
    }

    async fn page_html(&self) -> DriverResult<String> {
        let res = self.post("page/content", json!({})).await?;
        Ok(res.text().await?)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let res = self.post("page/screenshot", json!({})).await?;
        Ok(res.bytes().await?.to_vec())
    }

    async fn settle(&self, wait: Duration) {
        tokio::time::sleep(wait).await;
    }

    async fn close_session(&self) -> DriverResult<()> {
        self.post("session/close", json!({})).await?;
        Ok(())
    }
}

/// Capture a named debug artifact pair (`{name}.png`, `{name}.html`) under
/// `debug_dir`. Artifact capture is diagnostics only: failures are logged
/// and swallowed so they can never mask the failure being diagnosed.
pub async fn dump_page(driver: &dyn UiDriver, debug_dir: &Path, name: &str) -> Option<PathBuf> {
    if let Err(err) = tokio::fs::create_dir_all(debug_dir).await {
        warn!(?err, dir = %debug_dir.display(), "cannot create debug dir");
        return None;
    }
    let png = debug_dir.join(format!("{name}.png"));
    match driver.screenshot().await {
        Ok(bytes) => {
            if let Err(err) = tokio::fs::write(&png, bytes).await {
                warn!(?err, path = %png.display(), "failed to write screenshot");
            }
        }
        Err(err) => warn!(?err, name, "screenshot capture failed"),
    }
    match driver.page_html().await {
        Ok(html) => {
            let path = debug_dir.join(format!("{name}.html"));
            if let Err(err) = tokio::fs::write(&path, html).await {
                warn!(?err, path = %path.display(), "failed to write page html");
            }
        }
        Err(err) => warn!(?err, name, "html capture failed"),
    }
    Some(png)
}
