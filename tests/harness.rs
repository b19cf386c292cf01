use anyhow::Result;
use incident_ingest::config::{FetchMode, StoreBackend, load_config, load_config_or_default};
use incident_ingest::fetch::{PageFetcher, RenderWait, RetryPolicy};
use incident_ingest::harness::run_harness;
use incident_ingest::pipeline::Pipeline;
use incident_ingest::render::DashboardRenderer;
use incident_ingest::store::{JsonStore, Store, open_store};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

#[tokio::test]
async fn harness_reports_stability_metrics() -> Result<()> {
    let env = setup_fixture_env()?;
    let config = load_config(&env.config_path)?;

    let report = run_harness(&config).await?;

    assert_eq!(report.first_cycle_parsed, 5);
    assert_eq!(report.first_cycle_rejected, 2);
    assert_eq!(report.first_cycle_admitted, 3);
    assert_eq!(report.first_cycle_duplicates, 0);
    assert_eq!(report.second_cycle_admitted, 0);
    assert_eq!(report.second_cycle_duplicates, 3);
    assert_eq!(report.total_events, 3);

    // A second harness run starts from an empty store again.
    let again = run_harness(&config).await?;
    assert_eq!(again.first_cycle_admitted, 3);

    Ok(())
}

#[tokio::test]
async fn changed_status_is_stored_as_a_new_event() -> Result<()> {
    let env = setup_fixture_env()?;
    let config = load_config(&env.config_path)?;

    let fetcher = PageFetcher::start(
        DashboardRenderer::from_config(&config.fetch)?,
        RenderWait::from_config(&config),
        RetryPolicy::from_config(&config),
    )
    .await?;
    let mut pipeline = Pipeline::from_config(&config, fetcher, open_store(&config.store)?)?;

    let first = pipeline.run_cycle(1).await;
    assert_eq!(first.admitted, 3);

    let page = env.root.join("dashboard.html");
    let html = fs::read_to_string(&page)?;
    fs::write(&page, html.replace("E272: On Scene", "E272: Available"))?;

    let second = pipeline.run_cycle(2).await;
    assert_eq!(second.admitted, 1);
    assert_eq!(second.duplicates, 2);
    pipeline.shutdown().await;

    let store = JsonStore::open(&env.root.join("state/events.json"))?;
    let views = store
        .events(None)?
        .iter()
        .map(|event| event.view())
        .collect::<Vec<_>>();
    assert_eq!(views.len(), 4);
    assert_eq!(views[0].datetime, "2024-08-22 14:05:00");
    assert_eq!(views[0].datetime_readable, "August 22, 2024 at 2:05 PM");
    assert_eq!(
        views
            .iter()
            .filter(|view| view.title == "NATURAL GAS LEAK")
            .count(),
        2
    );

    Ok(())
}

#[test]
fn config_paths_resolve_against_config_dir() -> Result<()> {
    let env = setup_fixture_env()?;
    let config = load_config(&env.config_path)?;

    assert_eq!(config.fetch.mode, FetchMode::File);
    assert_eq!(config.fetch.file_path, Some(env.root.join("dashboard.html")));
    assert_eq!(config.store.backend, StoreBackend::Json);
    assert_eq!(config.store.path, env.root.join("state/events.json"));
    assert_eq!(config.fetch.max_attempts, 2);
    assert_eq!(config.schedule.shutdown_grace_secs, 5);
    // Omitted sections fall back to defaults.
    assert_eq!(config.fetch.page_load_timeout_secs, 30);
    assert_eq!(config.timestamp.formats.len(), 8);

    Ok(())
}

#[test]
fn missing_config_falls_back_to_defaults() -> Result<()> {
    let temp = tempdir()?;
    let config = load_config_or_default(&temp.path().join("ingest.toml"))?;

    assert_eq!(config.fetch.mode, FetchMode::Browser);
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert_eq!(config.schedule.interval_secs, 600);
    assert!(config.source.url.starts_with("https://"));
    Ok(())
}

#[test]
fn invalid_configs_are_rejected() -> Result<()> {
    let temp = tempdir()?;
    let cases = [
        "[fetch]\nmax_attempts = 0\n",
        "[schedule]\ninterval_secs = 0\n",
        "[source]\nurl = \"not a url\"\n",
        "[source]\ncontainer_selector = \"div[\"\n",
        "[fetch]\nmode = \"file\"\n",
        "[timestamp]\nformats = []\n",
        "[timestamp]\nformats = [\"%Y-%m-%d %Q\"]\n",
        "[store]\nbackend = \"postgres\"\n",
    ];

    for (index, body) in cases.iter().enumerate() {
        let path = temp.path().join(format!("bad-{index}.toml"));
        fs::write(&path, body)?;
        assert!(load_config(&path).is_err(), "accepted config:\n{body}");
    }

    Ok(())
}

#[tokio::test]
async fn harness_refuses_live_modes() -> Result<()> {
    let temp = tempdir()?;
    let config = load_config_or_default(&temp.path().join("ingest.toml"))?;
    assert!(run_harness(&config).await.is_err());
    Ok(())
}

struct FixtureEnv {
    root: PathBuf,
    config_path: PathBuf,
}

fn setup_fixture_env() -> Result<FixtureEnv> {
    let temp = tempdir()?;
    let root = temp.keep();

    let fixture_root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    copy_dir(&fixture_root, &root)?;

    Ok(FixtureEnv {
        config_path: root.join("ingest.toml"),
        root,
    })
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else {
            fs::copy(src_path, dst_path)?;
        }
    }

    Ok(())
}
