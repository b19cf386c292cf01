use crate::config::IngestConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("rendering session failed: {0}")]
    Session(String),
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct RenderWait {
    pub marker_selector: String,
    pub page_load_timeout: Duration,
    pub marker_timeout: Duration,
}

impl RenderWait {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            marker_selector: config.source.marker_selector.clone(),
            page_load_timeout: config.fetch.page_load_timeout(),
            marker_timeout: config.fetch.marker_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub pause: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.fetch.max_attempts,
            pause: config.fetch.retry_pause(),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait Renderer {
    type Session: RenderSession;

    async fn open(&self) -> Result<Self::Session, FetchError>;
}

#[allow(async_fn_in_trait)]
pub trait RenderSession {
    async fn render(&mut self, url: &str, wait: &RenderWait) -> Result<String, FetchError>;

    async fn close(self);
}

#[allow(async_fn_in_trait)]
pub trait PageSource {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError>;

    // Must be safe to call more than once.
    async fn shutdown(&mut self);
}

pub struct PageFetcher<R: Renderer> {
    renderer: R,
    session: Option<R::Session>,
    wait: RenderWait,
    policy: RetryPolicy,
}

impl<R: Renderer> PageFetcher<R> {
    pub async fn start(
        renderer: R,
        wait: RenderWait,
        policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let session = renderer
            .open()
            .await
            .map_err(|err| FetchError::Unavailable(err.to_string()))?;
        info!("rendering session opened");

        Ok(Self {
            renderer,
            session: Some(session),
            wait,
            policy,
        })
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    async fn fetch_once(&mut self, url: &str) -> Result<String, FetchError> {
        if self.session.is_none() {
            let session = self.renderer.open().await?;
            info!("fresh rendering session opened");
            self.session = Some(session);
        }

        let Some(session) = self.session.as_mut() else {
            return Err(FetchError::Session("no rendering session".to_string()));
        };
        session.render(url, &self.wait).await
    }

    async fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            debug!("rendering session discarded");
        }
    }
}

impl<R: Renderer> PageSource for PageFetcher<R> {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.fetch_once(url).await {
                Ok(html) => {
                    debug!(%url, attempt, bytes = html.len(), "page rendered");
                    return Ok(html);
                }
                Err(err) => {
                    // A wedged session is never reused; timeouts keep it.
                    if !matches!(err, FetchError::Timeout(_)) {
                        self.discard_session().await;
                    }

                    if attempt < attempts {
                        warn!(%url, attempt, error = %err, "fetch failed; retrying");
                        tokio::time::sleep(self.policy.pause).await;
                    } else {
                        warn!(%url, attempt, error = %err, "fetch failed; attempts exhausted");
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Session("no fetch attempted".to_string())))
    }

    async fn shutdown(&mut self) {
        if self.session.is_some() {
            self.discard_session().await;
            info!("rendering session released");
        }
    }
}
