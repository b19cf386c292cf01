use crate::config::{FetchConfig, FetchMode};
use crate::fetch::{FetchError, RenderSession, RenderWait, Renderer};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub enum DashboardRenderer {
    Browser(BrowserRenderer),
    Http(HttpRenderer),
    File(FileRenderer),
}

impl DashboardRenderer {
    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(match config.mode {
            FetchMode::Browser => DashboardRenderer::Browser(BrowserRenderer::from_config(config)),
            FetchMode::Http => DashboardRenderer::Http(HttpRenderer::from_config(config)),
            FetchMode::File => {
                let path = config.file_path.clone().ok_or_else(|| {
                    FetchError::Unavailable("fetch.file_path missing for file mode".to_string())
                })?;
                DashboardRenderer::File(FileRenderer::new(path))
            }
        })
    }
}

pub enum DashboardSession {
    Browser(BrowserSession),
    Http(HttpSession),
    File(FileSession),
}

impl Renderer for DashboardRenderer {
    type Session = DashboardSession;

    async fn open(&self) -> Result<Self::Session, FetchError> {
        Ok(match self {
            DashboardRenderer::Browser(r) => DashboardSession::Browser(r.open().await?),
            DashboardRenderer::Http(r) => DashboardSession::Http(r.open().await?),
            DashboardRenderer::File(r) => DashboardSession::File(r.open().await?),
        })
    }
}

impl RenderSession for DashboardSession {
    async fn render(&mut self, url: &str, wait: &RenderWait) -> Result<String, FetchError> {
        match self {
            DashboardSession::Browser(s) => s.render(url, wait).await,
            DashboardSession::Http(s) => s.render(url, wait).await,
            DashboardSession::File(s) => s.render(url, wait).await,
        }
    }

    async fn close(self) {
        match self {
            DashboardSession::Browser(s) => s.close().await,
            DashboardSession::Http(s) => s.close().await,
            DashboardSession::File(s) => s.close().await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserRenderer {
    headless: bool,
    window: (u32, u32),
    args: Vec<String>,
}

impl BrowserRenderer {
    pub fn from_config(config: &FetchConfig) -> Self {
        let mut args = config.chrome_args.clone();
        if let Some(user_agent) = &config.user_agent {
            args.push(format!("--user-agent={user_agent}"));
        }
        Self {
            headless: config.headless,
            window: (config.window_width, config.window_height),
            args,
        }
    }
}

pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl Renderer for BrowserRenderer {
    type Session = BrowserSession;

    async fn open(&self) -> Result<Self::Session, FetchError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.window.0, self.window.1)
            .args(self.args.iter().cloned());
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(FetchError::Session)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(session_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler stopped");
                    break;
                }
            }
        });

        info!(headless = self.headless, "browser launched");
        Ok(BrowserSession { browser, handler })
    }
}

// Dropping a tab handle leaves the tab open; it must be closed explicitly.
#[allow(async_fn_in_trait)]
pub trait Tab {
    async fn close_tab(self);
}

impl Tab for Page {
    async fn close_tab(self) {
        if let Err(err) = self.close().await {
            debug!(error = %err, "failed to close page");
        }
    }
}

// Closes the tab on every exit path of `work`.
pub async fn with_tab<T: Tab, R>(tab: T, work: impl AsyncFnOnce(&T) -> R) -> R {
    let result = work(&tab).await;
    tab.close_tab().await;
    result
}

impl BrowserSession {
    async fn load_and_read(
        &self,
        page: &Page,
        url: &str,
        wait: &RenderWait,
    ) -> Result<String, FetchError> {
        let load = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, CdpError>(())
        };
        timeout(wait.page_load_timeout, load)
            .await
            .map_err(|_| {
                FetchError::Timeout(format!(
                    "page load of {url} exceeded {:?}",
                    wait.page_load_timeout
                ))
            })?
            .map_err(session_error)?;

        self.wait_for_marker(page, wait).await?;
        page.content().await.map_err(session_error)
    }

    async fn wait_for_marker(&self, page: &Page, wait: &RenderWait) -> Result<(), FetchError> {
        let selector = serde_json::to_string(&wait.marker_selector)
            .map_err(|err| FetchError::Session(err.to_string()))?;
        let script = format!("document.querySelector({selector}) !== null");
        let deadline = Instant::now() + wait.marker_timeout;

        loop {
            let present = page
                .evaluate(script.as_str())
                .await
                .map_err(session_error)?
                .into_value::<bool>()
                .unwrap_or(false);
            if present {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FetchError::Timeout(format!(
                    "marker {} not present after {:?}",
                    wait.marker_selector, wait.marker_timeout
                )));
            }
            sleep(MARKER_POLL_INTERVAL).await;
        }
    }
}

impl RenderSession for BrowserSession {
    async fn render(&mut self, url: &str, wait: &RenderWait) -> Result<String, FetchError> {
        // A blank tab that cannot open in time may still appear later, so the
        // whole browser is treated as faulted.
        let page = timeout(wait.page_load_timeout, self.browser.new_page("about:blank"))
            .await
            .map_err(|_| FetchError::Session("browser did not open a tab".to_string()))?
            .map_err(session_error)?;

        with_tab(page, async |page: &Page| self.load_and_read(page, url, wait).await).await
    }

    async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            debug!(error = %err, "browser close command failed");
        }
        if let Err(err) = self.browser.wait().await {
            debug!(error = %err, "waiting for browser exit failed");
        }
        self.handler.abort();
    }
}

fn session_error(err: CdpError) -> FetchError {
    match err {
        CdpError::Timeout => FetchError::Timeout("cdp request timed out".to_string()),
        other => FetchError::Session(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct HttpRenderer {
    user_agent: Option<String>,
    request_timeout: Duration,
}

impl HttpRenderer {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            request_timeout: config.page_load_timeout(),
        }
    }
}

pub struct HttpSession {
    client: Client,
}

impl Renderer for HttpRenderer {
    type Session = HttpSession;

    async fn open(&self) -> Result<Self::Session, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(user_agent) = &self.user_agent {
            let value = HeaderValue::from_str(user_agent)
                .map_err(|err| FetchError::Session(format!("invalid user agent: {err}")))?;
            headers.insert(USER_AGENT, value);
        }

        let client = Client::builder()
            .timeout(self.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| FetchError::Session(format!("failed to build http client: {err}")))?;
        Ok(HttpSession { client })
    }
}

impl RenderSession for HttpSession {
    async fn render(&mut self, url: &str, wait: &RenderWait) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout(format!("request to {url} timed out"))
            } else {
                FetchError::Session(format!("request to {url} failed: {err}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Session(format!(
                "request to {url} failed with status {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Session(format!("failed to read body of {url}: {err}")))?;
        ensure_marker(body, wait)
    }

    async fn close(self) {}
}

#[derive(Debug, Clone)]
pub struct FileRenderer {
    path: PathBuf,
}

impl FileRenderer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

pub struct FileSession {
    path: PathBuf,
}

impl Renderer for FileRenderer {
    type Session = FileSession;

    async fn open(&self) -> Result<Self::Session, FetchError> {
        if !self.path.exists() {
            return Err(FetchError::Session(format!(
                "saved page {} does not exist",
                self.path.display()
            )));
        }
        Ok(FileSession {
            path: self.path.clone(),
        })
    }
}

impl RenderSession for FileSession {
    async fn render(&mut self, _url: &str, wait: &RenderWait) -> Result<String, FetchError> {
        let body = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            FetchError::Session(format!("failed to read {}: {err}", self.path.display()))
        })?;
        ensure_marker(body, wait)
    }

    async fn close(self) {}
}

fn ensure_marker(body: String, wait: &RenderWait) -> Result<String, FetchError> {
    if has_marker(&body, &wait.marker_selector)? {
        Ok(body)
    } else {
        Err(FetchError::Timeout(format!(
            "marker {} not present in page",
            wait.marker_selector
        )))
    }
}

fn has_marker(body: &str, marker_selector: &str) -> Result<bool, FetchError> {
    let selector = Selector::parse(marker_selector)
        .map_err(|err| FetchError::Session(format!("invalid marker selector: {err:?}")))?;
    Ok(Html::parse_document(body).select(&selector).next().is_some())
}
