use anyhow::Result;
use incident_ingest::fetch::{
    FetchError, PageFetcher, PageSource, RenderSession, RenderWait, Renderer, RetryPolicy,
};
use incident_ingest::render::FileRenderer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const URL: &str = "https://dashboard.example.org/pfd/incidents";

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    renders: AtomicUsize,
}

/// Hands out sessions that replay a shared script of render outcomes.
struct ScriptedRenderer {
    script: Arc<Mutex<VecDeque<Result<String, FetchError>>>>,
    counters: Arc<Counters>,
    max_opens: usize,
}

impl ScriptedRenderer {
    fn new(script: Vec<Result<String, FetchError>>) -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let renderer = Self {
            script: Arc::new(Mutex::new(script.into())),
            counters: counters.clone(),
            max_opens: usize::MAX,
        };
        (renderer, counters)
    }

    fn with_max_opens(mut self, max_opens: usize) -> Self {
        self.max_opens = max_opens;
        self
    }
}

struct ScriptedSession {
    script: Arc<Mutex<VecDeque<Result<String, FetchError>>>>,
    counters: Arc<Counters>,
}

impl Renderer for ScriptedRenderer {
    type Session = ScriptedSession;

    async fn open(&self) -> Result<Self::Session, FetchError> {
        let opened = self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if opened >= self.max_opens {
            return Err(FetchError::Session("browser refused to start".to_string()));
        }
        Ok(ScriptedSession {
            script: self.script.clone(),
            counters: self.counters.clone(),
        })
    }
}

impl RenderSession for ScriptedSession {
    async fn render(&mut self, _url: &str, _wait: &RenderWait) -> Result<String, FetchError> {
        self.counters.renders.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Session("script exhausted".to_string())))
    }

    async fn close(self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait() -> RenderWait {
    RenderWait {
        marker_selector: "div.external-html".to_string(),
        page_load_timeout: Duration::from_secs(30),
        marker_timeout: Duration::from_secs(15),
    }
}

fn policy(max_attempts: u8) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        pause: Duration::from_millis(1500),
    }
}

fn timeout() -> Result<String, FetchError> {
    Err(FetchError::Timeout("marker never appeared".to_string()))
}

fn fault() -> Result<String, FetchError> {
    Err(FetchError::Session("target crashed".to_string()))
}

fn page() -> Result<String, FetchError> {
    Ok("<div class=\"external-html\"></div>".to_string())
}

#[tokio::test(start_paused = true)]
async fn timeout_retries_on_the_same_session() -> Result<()> {
    let (renderer, counters) = ScriptedRenderer::new(vec![timeout(), page()]);
    let mut fetcher = PageFetcher::start(renderer, wait(), policy(3)).await?;

    let started = tokio::time::Instant::now();
    let html = fetcher.fetch(URL).await?;
    assert!(html.contains("external-html"));
    assert_eq!(started.elapsed(), Duration::from_millis(1500));

    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
    assert_eq!(counters.renders.load(Ordering::SeqCst), 2);
    assert!(fetcher.has_session());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn session_fault_restarts_the_session() -> Result<()> {
    let (renderer, counters) = ScriptedRenderer::new(vec![fault(), page()]);
    let mut fetcher = PageFetcher::start(renderer, wait(), policy(3)).await?;

    fetcher.fetch(URL).await?;

    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert!(fetcher.has_session());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_return_last_error() -> Result<()> {
    let (renderer, counters) = ScriptedRenderer::new(vec![fault(), timeout(), timeout()]);
    let mut fetcher = PageFetcher::start(renderer, wait(), policy(3)).await?;

    let err = fetcher.fetch(URL).await.err();
    assert_eq!(
        err,
        Some(FetchError::Timeout("marker never appeared".to_string()))
    );
    assert_eq!(counters.renders.load(Ordering::SeqCst), 3);
    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_restart_counts_as_an_attempt() -> Result<()> {
    let (renderer, counters) = ScriptedRenderer::new(vec![fault(), page()]);
    let renderer = renderer.with_max_opens(1);
    let mut fetcher = PageFetcher::start(renderer, wait(), policy(2)).await?;

    let err = fetcher.fetch(URL).await.err();
    assert_eq!(
        err,
        Some(FetchError::Session("browser refused to start".to_string()))
    );
    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    assert_eq!(counters.renders.load(Ordering::SeqCst), 1);
    assert!(!fetcher.has_session());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_attempts_still_tries_once() -> Result<()> {
    let (renderer, counters) = ScriptedRenderer::new(vec![page()]);
    let mut fetcher = PageFetcher::start(renderer, wait(), policy(0)).await?;

    fetcher.fetch(URL).await?;
    assert_eq!(counters.renders.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn start_failure_is_unavailable() {
    let (renderer, _) = ScriptedRenderer::new(vec![]);
    let renderer = renderer.with_max_opens(0);

    let err = PageFetcher::start(renderer, wait(), policy(3)).await.err();
    assert!(matches!(err, Some(FetchError::Unavailable(_))));
}

#[tokio::test]
async fn shutdown_closes_the_session_once() -> Result<()> {
    let (renderer, counters) = ScriptedRenderer::new(vec![]);
    let mut fetcher = PageFetcher::start(renderer, wait(), policy(3)).await?;

    fetcher.shutdown().await;
    fetcher.shutdown().await;

    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert!(!fetcher.has_session());
    Ok(())
}

#[tokio::test]
async fn saved_page_without_marker_times_out() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blank.html");
    std::fs::write(&path, "<html><body><p>loading...</p></body></html>")?;

    let mut session = FileRenderer::new(path).open().await?;
    let err = session.render(URL, &wait()).await.err();
    assert!(matches!(err, Some(FetchError::Timeout(_))));
    session.close().await;
    Ok(())
}

#[tokio::test]
async fn saved_page_with_marker_is_returned() -> Result<()> {
    let fixture =
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/single_row.html");

    let mut session = FileRenderer::new(fixture).open().await?;
    let html = session.render(URL, &wait()).await?;
    assert!(html.contains("NATURAL GAS LEAK"));
    Ok(())
}

#[tokio::test]
async fn missing_saved_page_cannot_start() {
    let renderer = FileRenderer::new("does/not/exist.html".into());
    let err = PageFetcher::start(renderer, wait(), policy(1)).await.err();
    assert!(matches!(err, Some(FetchError::Unavailable(_))));
}
