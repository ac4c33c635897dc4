use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use postfleet::config::{Config, Credentials};
use postfleet::driver::{DriverError, DriverResult, UiDriver};
use postfleet::model::{CategoryResult, WorkItem};
use postfleet::orchestrator::Orchestrator;
use postfleet::otp::OtpSource;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct ScriptedDriver {
    texts: Arc<Mutex<VecDeque<String>>>,
    ops: Arc<Mutex<Vec<String>>>,
    fail_once_on: Arc<Mutex<Option<String>>>,
}

impl ScriptedDriver {
    fn with_texts(texts: &[&str]) -> Self {
        Self {
            texts: Arc::new(Mutex::new(texts.iter().map(|t| t.to_string()).collect())),
            ..Default::default()
        }
    }

    fn fail_once_on(self, op_fragment: &str) -> Self {
        *self.fail_once_on.lock().unwrap() = Some(op_fragment.to_string());
        self
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn count_ops(&self, fragment: &str) -> usize {
        self.ops().iter().filter(|op| op.contains(fragment)).count()
    }

    fn record(&self, op: String) -> DriverResult<()> {
        let mut fail = self.fail_once_on.lock().unwrap();
        if let Some(fragment) = fail.as_deref() {
            if op.contains(fragment) {
                *fail = None;
                return Err(DriverError::Network(format!("injected failure at {op}")));
            }
        }
        self.ops.lock().unwrap().push(op);
        Ok(())
    }
}

#[async_trait]
impl UiDriver for ScriptedDriver {
    async fn open_session(&self, profile_dir: &Path) -> DriverResult<()> {
        self.record(format!("open:{}", profile_dir.display()))
    }
    async fn goto(&self, url: &str) -> DriverResult<()> {
        self.record(format!("goto:{url}"))
    }
    async fn fill(&self, locator: &str, text: &str) -> DriverResult<()> {
        self.record(format!("fill:{locator}={text}"))
    }
    async fn click(&self, locator: &str) -> DriverResult<()> {
        self.record(format!("click:{locator}"))
    }
    async fn select(&self, locator: &str, value: &str) -> DriverResult<()> {
        self.record(format!("select:{locator}={value}"))
    }
    async fn body_text(&self) -> DriverResult<String> {
        let mut texts = self.texts.lock().unwrap();
        Ok(texts.pop_front().unwrap_or_default())
    }
    async fn page_html(&self) -> DriverResult<String> {
        Ok("<html></html>".into())
    }
    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Ok(vec![0u8])
    }
    async fn settle(&self, _wait: Duration) {}
    async fn close_session(&self) -> DriverResult<()> {
        self.record("close".into())
    }
}

/// OTP source that never has a code; none of these runs hits the
/// challenge screen.
struct NoOtp;

static NO_OTP: NoOtp = NoOtp;

#[async_trait]
impl OtpSource for NoOtp {
    async fn fetch(&self, _category: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

fn test_config(td: &TempDir, categories: &[&str]) -> Config {
    let mut cfg: Config = serde_yaml::from_str(postfleet::config::example()).unwrap();
    cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
    cfg.app.debug_dir = td.path().join("debug").to_string_lossy().to_string();
    cfg.otp.wait_seconds = 0;
    cfg.categories = categories.iter().map(|c| c.to_string()).collect();
    cfg
}

fn item(category: &str, url: &str, offset: ChronoDuration) -> WorkItem {
    WorkItem {
        title: "Title".into(),
        url: url.into(),
        target_time: Utc::now() + offset,
        category: category.into(),
    }
}

fn due_now(category: &str, url: &str) -> WorkItem {
    item(category, url, ChronoDuration::hours(-1))
}

fn always_creds(_category: &str) -> Option<Credentials> {
    Some(Credentials {
        email: "bot@example.com".into(),
        username: "bot_handle".into(),
        password: "hunter2".into(),
    })
}

fn alpha_has_no_creds(category: &str) -> Option<Credentials> {
    if category == "alpha" {
        None
    } else {
        always_creds(category)
    }
}

// Body text the feed shows when a session is live.
const FEED: &str = "For You Following";
// Anything without a marker: not logged in, no extra step, no otp.
const BLANK: &str = "some page";

#[tokio::test]
async fn failed_category_does_not_block_the_next() {
    let td = TempDir::new().unwrap();
    let cfg = test_config(&td, &["alpha", "beta"]);

    // alpha walks the full login and is rejected at the final probe;
    // beta reuses an existing session and posts.
    let driver = ScriptedDriver::with_texts(&[
        BLANK, BLANK, BLANK, BLANK, // alpha: probe, extra-check, otp-check, final probe
        FEED, // beta: initial probe succeeds
    ]);
    let buckets: HashMap<String, Vec<WorkItem>> = HashMap::from([
        ("alpha".to_string(), vec![due_now("alpha", "https://n/a1")]),
        ("beta".to_string(), vec![due_now("beta", "https://n/b1")]),
    ]);

    let orch = Orchestrator::new(&cfg, &driver, &NO_OTP).with_resolver(always_creds);
    let report = orch.run(&buckets).await;

    assert_eq!(report.attempted(), 2);
    assert!(matches!(
        report.outcomes[0].result,
        CategoryResult::AuthFailed(_)
    ));
    match &report.outcomes[1].result {
        CategoryResult::Completed(tally) => {
            assert_eq!(tally.posted, 1);
            assert_eq!(tally.failed, 0);
        }
        other => panic!("beta should complete, got {other:?}"),
    }
    // Both sessions were released.
    assert_eq!(driver.count_ops("close"), 2);
}

#[tokio::test]
async fn missing_credentials_skips_only_that_category() {
    let td = TempDir::new().unwrap();
    let cfg = test_config(&td, &["alpha", "beta"]);

    let driver = ScriptedDriver::with_texts(&[FEED]);
    let buckets: HashMap<String, Vec<WorkItem>> = HashMap::from([
        ("alpha".to_string(), vec![due_now("alpha", "https://n/a1")]),
        ("beta".to_string(), vec![due_now("beta", "https://n/b1")]),
    ]);

    let orch = Orchestrator::new(&cfg, &driver, &NO_OTP).with_resolver(alpha_has_no_creds);
    let report = orch.run(&buckets).await;

    assert!(matches!(
        report.outcomes[0].result,
        CategoryResult::SkippedMissingCredentials
    ));
    assert!(matches!(
        report.outcomes[1].result,
        CategoryResult::Completed(_)
    ));
    // alpha never opened a session.
    assert_eq!(driver.count_ops("open:"), 1);
}

#[tokio::test]
async fn empty_bucket_is_skipped_without_a_session() {
    let td = TempDir::new().unwrap();
    let cfg = test_config(&td, &["alpha"]);

    let driver = ScriptedDriver::default();
    let buckets: HashMap<String, Vec<WorkItem>> =
        HashMap::from([("alpha".to_string(), vec![])]);

    let orch = Orchestrator::new(&cfg, &driver, &NO_OTP).with_resolver(always_creds);
    let report = orch.run(&buckets).await;

    assert!(matches!(
        report.outcomes[0].result,
        CategoryResult::SkippedNoItems
    ));
    assert!(driver.ops().is_empty());
}

#[tokio::test]
async fn item_failure_continues_with_remaining_items() {
    let td = TempDir::new().unwrap();
    let cfg = test_config(&td, &["alpha"]);

    let driver = ScriptedDriver::with_texts(&[FEED]).fail_once_on("tweetButtonInline");
    let buckets: HashMap<String, Vec<WorkItem>> = HashMap::from([(
        "alpha".to_string(),
        vec![
            due_now("alpha", "https://n/first"),
            due_now("alpha", "https://n/second"),
        ],
    )]);

    let orch = Orchestrator::new(&cfg, &driver, &NO_OTP).with_resolver(always_creds);
    let report = orch.run(&buckets).await;

    match &report.outcomes[0].result {
        CategoryResult::Completed(tally) => {
            assert_eq!(tally.posted, 1);
            assert_eq!(tally.failed, 1);
        }
        other => panic!("expected completed with one failure, got {other:?}"),
    }
    // Both items reached the composer.
    assert_eq!(driver.count_ops("tweetTextarea_0"), 2);
}

#[tokio::test]
async fn abort_mode_stops_category_on_first_item_failure() {
    let td = TempDir::new().unwrap();
    let mut cfg = test_config(&td, &["alpha"]);
    cfg.app.abort_on_item_failure = true;

    let driver = ScriptedDriver::with_texts(&[FEED]).fail_once_on("tweetButtonInline");
    let buckets: HashMap<String, Vec<WorkItem>> = HashMap::from([(
        "alpha".to_string(),
        vec![
            due_now("alpha", "https://n/first"),
            due_now("alpha", "https://n/second"),
        ],
    )]);

    let orch = Orchestrator::new(&cfg, &driver, &NO_OTP).with_resolver(always_creds);
    let report = orch.run(&buckets).await;

    match &report.outcomes[0].result {
        CategoryResult::Aborted { done, .. } => {
            assert_eq!(done.posted, 0);
        }
        other => panic!("expected aborted category, got {other:?}"),
    }
    // The second item was never attempted, but the session was released.
    assert_eq!(driver.count_ops("tweetTextarea_0"), 1);
    assert_eq!(driver.count_ops("close"), 1);
}

#[tokio::test]
async fn future_item_goes_through_the_schedule_dialog() {
    let td = TempDir::new().unwrap();
    let cfg = test_config(&td, &["alpha"]);

    let driver = ScriptedDriver::with_texts(&[FEED]);
    let buckets: HashMap<String, Vec<WorkItem>> = HashMap::from([(
        "alpha".to_string(),
        vec![item("alpha", "https://n/later", ChronoDuration::days(2))],
    )]);

    let orch = Orchestrator::new(&cfg, &driver, &NO_OTP).with_resolver(always_creds);
    let report = orch.run(&buckets).await;

    match &report.outcomes[0].result {
        CategoryResult::Completed(tally) => {
            assert_eq!(tally.scheduled, 1);
            assert_eq!(tally.posted, 0);
        }
        other => panic!("expected one scheduled item, got {other:?}"),
    }
    let ops = driver.ops();
    assert!(ops.iter().any(|op| op.contains("scheduleOption")));
    assert!(ops.iter().any(|op| op.starts_with("fill:input[type='date']=")));
    assert!(ops
        .iter()
        .any(|op| op.contains("select#SELECTOR_6=AM") || op.contains("select#SELECTOR_6=PM")));
    assert!(ops.iter().any(|op| op.contains("tweetButton']")));
}

#[tokio::test]
async fn unknown_bucket_categories_are_ignored() {
    let td = TempDir::new().unwrap();
    let cfg = test_config(&td, &["alpha"]);

    let driver = ScriptedDriver::default();
    // A bucket for a category the config does not know about.
    let buckets: HashMap<String, Vec<WorkItem>> =
        HashMap::from([("ghost".to_string(), vec![due_now("ghost", "https://n/g")])]);

    let orch = Orchestrator::new(&cfg, &driver, &NO_OTP).with_resolver(always_creds);
    let report = orch.run(&buckets).await;

    assert_eq!(report.attempted(), 1);
    assert!(matches!(
        report.outcomes[0].result,
        CategoryResult::SkippedNoItems
    ));
    assert!(driver.ops().is_empty());
}
