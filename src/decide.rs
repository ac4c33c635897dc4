//! Publish decision engine. Pure: timestamps in, `PublishAction` out.
use crate::model::{PublishAction, ScheduleSlot};
use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};

/// Decision inputs that do not vary per item.
#[derive(Debug, Clone, Copy)]
pub struct PublishPolicy {
    /// Items due within this margin of "now" are posted immediately.
    pub post_now_margin: Duration,
    /// Zone the schedule dialog operates in.
    pub target_zone: FixedOffset,
}

/// Decide whether an item goes out now or gets a schedule slot.
///
/// The boundary is inclusive: an item due exactly at `now + margin`
/// posts immediately.
pub fn decide(
    target_time: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &PublishPolicy,
) -> PublishAction {
    if target_time <= now + policy.post_now_margin {
        PublishAction::PostNow
    } else {
        PublishAction::Schedule(schedule_slot(target_time, policy.target_zone))
    }
}

/// Convert a UTC target into the dialog's local date and 12-hour fields.
fn schedule_slot(target_time: DateTime<Utc>, zone: FixedOffset) -> ScheduleSlot {
    let local = target_time.with_timezone(&zone);
    // hour12 yields 1..=12, so midnight and noon come out as 12 already.
    let (is_pm, hour) = local.hour12();
    ScheduleSlot {
        date: local.date_naive(),
        hour: hour.to_string(),
        minute: format!("{:02}", local.minute()),
        meridiem: if is_pm { "PM" } else { "AM" }.to_string(),
    }
}
