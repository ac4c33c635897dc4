use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One raw row as fetched from the backing store. Everything is optional
/// because rows are loosely typed upstream; validation happens at the
/// boundary before anything enters the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRow {
    pub title: Option<String>,
    pub url: Option<String>,
    pub time: Option<String>,
    pub bot: Option<String>,
}

/// A validated piece of content to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub title: String,
    pub url: String,
    pub target_time: DateTime<Utc>,
    pub category: String,
}

impl WorkItem {
    /// Validate a raw row into a `WorkItem`. Returns the reason when the
    /// row is unusable so the caller can log and skip it.
    pub fn from_row(row: &RawRow) -> Result<WorkItem, ValidationFailure> {
        let url = match row.url.as_deref() {
            Some(u) if !u.trim().is_empty() => u.trim().to_string(),
            _ => return Err(ValidationFailure::MissingUrl),
        };
        let time = row
            .time
            .as_deref()
            .ok_or(ValidationFailure::MissingTime)?;
        let target_time = parse_row_time(time).ok_or(ValidationFailure::BadTime)?;
        let category = match row.bot.as_deref() {
            Some(b) if !b.trim().is_empty() => b.trim().to_string(),
            _ => return Err(ValidationFailure::MissingCategory),
        };
        Ok(WorkItem {
            title: row.title.clone().unwrap_or_else(|| "No Title".to_string()),
            url,
            target_time,
            category,
        })
    }

    /// The text submitted to the composer: quoted title, blank line, url.
    pub fn compose_text(&self) -> String {
        format!("\"{}\"\n\n{}", self.title, self.url)
    }
}

/// Parse a stored timestamp. Accepts RFC 3339 with offset, or a naive
/// ISO timestamp (with optional trailing `Z`) treated as UTC.
fn parse_row_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    chrono::NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|n| n.and_utc())
}

/// Why a raw row was rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("row has no url")]
    MissingUrl,
    #[error("row has no target time")]
    MissingTime,
    #[error("row target time is unparsable")]
    BadTime,
    #[error("row has no category tag")]
    MissingCategory,
}

/// Schedule dialog fields, exactly as the web UI expects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub date: NaiveDate,
    /// 12-hour clock, no leading zero; midnight and noon are "12".
    pub hour: String,
    /// Zero-padded.
    pub minute: String,
    /// "AM" or "PM".
    pub meridiem: String,
}

/// What to do with one item: publish immediately or schedule for later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishAction {
    PostNow,
    Schedule(ScheduleSlot),
}

/// Terminal failure of the authentication state machine.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("login completed but the logged-in marker never appeared")]
    CredentialsRejected,
    #[error("one-time passcode not available after {attempts} attempts")]
    OtpTimeout { attempts: u32 },
    #[error("ui driver failed: {0}")]
    Driver(#[from] crate::driver::DriverError),
}

impl AuthFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthFailure::CredentialsRejected => "credentials_rejected",
            AuthFailure::OtpTimeout { .. } => "otp_timeout",
            AuthFailure::Driver(_) => "driver_error",
        }
    }
}

/// Per-item publish tally for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemTally {
    pub posted: usize,
    pub scheduled: usize,
    pub failed: usize,
}

/// How one category's run ended.
#[derive(Debug)]
pub enum CategoryResult {
    /// Session obtained and every item attempted.
    Completed(ItemTally),
    /// Nothing pending for this category.
    SkippedNoItems,
    /// A credential env var was absent.
    SkippedMissingCredentials,
    /// Authentication reached a terminal failure.
    AuthFailed(AuthFailure),
    /// An item failure aborted the category (abort-on-item-failure mode).
    Aborted { done: ItemTally, error: anyhow::Error },
}

impl CategoryResult {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CategoryResult::AuthFailed(_) | CategoryResult::Aborted { .. }
        ) || matches!(self, CategoryResult::Completed(t) if t.failed > 0)
    }
}

#[derive(Debug)]
pub struct CategoryOutcome {
    pub category: String,
    pub result: CategoryResult,
}

/// Outcome of a whole run across categories.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<CategoryOutcome>,
}

impl RunReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed_categories(&self) -> impl Iterator<Item = &CategoryOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_failure())
    }
}
