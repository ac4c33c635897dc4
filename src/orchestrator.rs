//! Multi-category run loop. Each category binds exclusively to its own
//! browser profile; categories run strictly sequentially, and a failure
//! in one never prevents the rest from being attempted.
use crate::auth::{authenticate, AuthParams};
use crate::config::{self, Config, Credentials};
use crate::decide::{decide, PublishPolicy};
use crate::driver::{dump_page, DriverError, UiDriver};
use crate::model::{
    AuthFailure, CategoryOutcome, CategoryResult, ItemTally, PublishAction, RunReport,
    ScheduleSlot, WorkItem,
};
use crate::otp::{OtpPolicy, OtpSource};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info, instrument, warn};

/// Locators for the compose/schedule surfaces.
#[derive(Debug, Clone)]
pub struct ComposerParams {
    pub home_url: String,
    pub text_area: String,
    pub inline_post_button: String,
    pub compose_button: String,
    pub schedule_option: String,
    pub date_input: String,
    pub hour_select: String,
    pub minute_select: String,
    pub meridiem_select: String,
    pub schedule_confirm: String,
    pub final_post_button: String,
}

impl Default for ComposerParams {
    fn default() -> Self {
        Self {
            home_url: "https://x.com/home".into(),
            text_area: "div[data-testid='tweetTextarea_0']".into(),
            inline_post_button: "button[data-testid='tweetButtonInline']".into(),
            compose_button: "[data-testid='SideNav_NewTweet_Button']".into(),
            schedule_option: "button[data-testid='scheduleOption']".into(),
            date_input: "input[type='date']".into(),
            hour_select: "select#SELECTOR_4".into(),
            minute_select: "select#SELECTOR_5".into(),
            meridiem_select: "select#SELECTOR_6".into(),
            schedule_confirm: "button[data-testid='scheduledConfirmationPrimaryAction']".into(),
            final_post_button: "button[data-testid='tweetButton']".into(),
        }
    }
}

/// Everything one run needs. Credentials come through `resolve` so tests
/// can inject triples without touching the process environment.
pub struct Orchestrator<'a> {
    driver: &'a dyn UiDriver,
    otp: &'a dyn OtpSource,
    cfg: &'a Config,
    auth_params: AuthParams,
    publish_policy: PublishPolicy,
    composer: ComposerParams,
    resolve: fn(&str) -> Option<Credentials>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(cfg: &'a Config, driver: &'a dyn UiDriver, otp: &'a dyn OtpSource) -> Self {
        let otp_policy = OtpPolicy {
            attempts: cfg.otp.attempts,
            wait: cfg.otp_wait(),
        };
        Self {
            driver,
            otp,
            cfg,
            auth_params: AuthParams::new(cfg.settle(), cfg.long_settle(), otp_policy),
            publish_policy: PublishPolicy {
                post_now_margin: cfg.post_now_margin(),
                target_zone: cfg.target_zone(),
            },
            composer: ComposerParams::default(),
            resolve: config::resolve_credentials,
        }
    }

    pub fn with_resolver(mut self, resolve: fn(&str) -> Option<Credentials>) -> Self {
        self.resolve = resolve;
        self
    }

    pub fn with_auth_params(mut self, params: AuthParams) -> Self {
        self.auth_params = params;
        self
    }

    /// Process every configured category, in config order, isolating
    /// failures per category.
    #[instrument(skip_all)]
    pub async fn run(&self, buckets: &HashMap<String, Vec<WorkItem>>) -> RunReport {
        let mut report = RunReport::default();
        for category in &self.cfg.categories {
            let items = buckets.get(category.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let result = self.process_category(category, items).await;
            match &result {
                CategoryResult::Completed(tally) => info!(
                    category,
                    posted = tally.posted,
                    scheduled = tally.scheduled,
                    failed = tally.failed,
                    "category finished"
                ),
                CategoryResult::SkippedNoItems => info!(category, "no pending items, skipping"),
                CategoryResult::SkippedMissingCredentials => {
                    warn!(category, "missing credentials, skipping")
                }
                CategoryResult::AuthFailed(failure) => {
                    error!(category, kind = failure.kind(), %failure, "authentication failed")
                }
                CategoryResult::Aborted { done, error } => error!(
                    category,
                    posted = done.posted,
                    scheduled = done.scheduled,
                    %error,
                    "category aborted on item failure"
                ),
            }
            report.outcomes.push(CategoryOutcome {
                category: category.clone(),
                result,
            });
        }
        report
    }

    async fn process_category(&self, category: &str, items: &[WorkItem]) -> CategoryResult {
        if items.is_empty() {
            return CategoryResult::SkippedNoItems;
        }
        let Some(creds) = (self.resolve)(category) else {
            return CategoryResult::SkippedMissingCredentials;
        };

        let profile_dir = self.cfg.profile_dir(category);
        if let Err(err) = tokio::fs::create_dir_all(&profile_dir).await {
            warn!(?err, category, "cannot create profile dir, skipping");
            return CategoryResult::SkippedMissingCredentials;
        }

        info!(category, items = items.len(), "starting category session");
        if let Err(err) = self.driver.open_session(&profile_dir).await {
            self.release(category).await;
            return CategoryResult::AuthFailed(AuthFailure::Driver(err));
        }

        // Session is open from here on; every exit path below must pass
        // through `release`.
        let result = self.drive_category(category, &creds, items).await;
        self.release(category).await;
        result
    }

    async fn drive_category(
        &self,
        category: &str,
        creds: &Credentials,
        items: &[WorkItem],
    ) -> CategoryResult {
        let debug_dir = self.cfg.debug_dir(category);
        let session = match authenticate(
            category,
            creds,
            self.driver,
            self.otp,
            &self.auth_params,
            &self.cfg.profile_dir(category),
            &debug_dir,
        )
        .await
        {
            Ok(session) => session,
            Err(failure) => return CategoryResult::AuthFailed(failure),
        };
        info!(category, reused = session.reused, "session ready");

        let now = Utc::now();
        let mut tally = ItemTally::default();
        for (idx, item) in items.iter().enumerate() {
            let item_id = item_id(idx, item);
            let action = decide(item.target_time, now, &self.publish_policy);
            match self.publish(item, &action, &item_id, &debug_dir).await {
                Ok(()) => match action {
                    PublishAction::PostNow => {
                        tally.posted += 1;
                        info!(category, item = %item_id, "posted");
                    }
                    PublishAction::Schedule(slot) => {
                        tally.scheduled += 1;
                        info!(category, item = %item_id, date = %slot.date, "scheduled");
                    }
                },
                Err(err) => {
                    warn!(category, item = %item_id, %err, "item publish failed");
                    dump_page(self.driver, &debug_dir, &format!("item_{item_id}_failed")).await;
                    if self.cfg.app.abort_on_item_failure {
                        return CategoryResult::Aborted {
                            done: tally,
                            error: anyhow::Error::from(err),
                        };
                    }
                    tally.failed += 1;
                }
            }
        }
        CategoryResult::Completed(tally)
    }

    /// Publish one item through the web UI according to its action.
    async fn publish(
        &self,
        item: &WorkItem,
        action: &PublishAction,
        item_id: &str,
        debug_dir: &Path,
    ) -> Result<(), DriverError> {
        match action {
            PublishAction::PostNow => self.post_now(item, item_id, debug_dir).await,
            PublishAction::Schedule(slot) => self.schedule(item, slot, item_id, debug_dir).await,
        }
    }

    async fn post_now(
        &self,
        item: &WorkItem,
        item_id: &str,
        debug_dir: &Path,
    ) -> Result<(), DriverError> {
        let c = &self.composer;
        self.driver.goto(&c.home_url).await?;
        self.driver.settle(self.cfg.settle()).await;
        self.driver.fill(&c.text_area, &item.compose_text()).await?;
        self.driver.settle(self.cfg.settle()).await;
        self.driver.click(&c.inline_post_button).await?;
        self.driver.settle(self.cfg.long_settle()).await;
        dump_page(self.driver, debug_dir, &format!("item_{item_id}_posted")).await;
        Ok(())
    }

    async fn schedule(
        &self,
        item: &WorkItem,
        slot: &ScheduleSlot,
        item_id: &str,
        debug_dir: &Path,
    ) -> Result<(), DriverError> {
        let c = &self.composer;
        self.driver.goto(&c.home_url).await?;
        self.driver.settle(self.cfg.settle()).await;
        self.driver.click(&c.compose_button).await?;
        self.driver.settle(self.cfg.settle()).await;
        self.driver.fill(&c.text_area, &item.compose_text()).await?;
        self.driver.click(&c.schedule_option).await?;
        self.driver.settle(self.cfg.settle()).await;
        // NaiveDate displays as YYYY-MM-DD, which is what the input takes.
        self.driver.fill(&c.date_input, &slot.date.to_string()).await?;
        self.driver.select(&c.hour_select, &slot.hour).await?;
        self.driver.select(&c.minute_select, &slot.minute).await?;
        self.driver.select(&c.meridiem_select, &slot.meridiem).await?;
        self.driver.click(&c.schedule_confirm).await?;
        self.driver.settle(self.cfg.settle()).await;
        self.driver.click(&c.final_post_button).await?;
        self.driver.settle(self.cfg.long_settle()).await;
        dump_page(self.driver, debug_dir, &format!("item_{item_id}_scheduled")).await;
        Ok(())
    }

    /// Close the category's browser session. Best effort: a close failure
    /// is logged but never replaces the category's real outcome.
    async fn release(&self, category: &str) {
        if let Err(err) = self.driver.close_session().await {
            warn!(?err, category, "failed to close session");
        }
    }
}

/// Stable per-item identifier used in logs and artifact names.
fn item_id(idx: usize, item: &WorkItem) -> String {
    let tail = item.url.rsplit('/').next().unwrap_or("item");
    format!("{}_{}", idx + 1, tail)
}
