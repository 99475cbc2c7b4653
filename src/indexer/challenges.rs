//! Signals handed to the challenge and trending consumers after commit.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::state::keys::{CHALLENGE_EVENT_QUEUE, TASK_QUEUE, TRENDING_CHALLENGE_WEEK};
use crate::state::{SharedState, StateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeEventKind {
    ProfileUpdate,
    ConnectVerified,
    ReferralSignup,
    ReferredSignup,
    MobileInstall,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeEvent {
    pub event: ChallengeEventKind,
    pub block_number: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<JsonValue>,
}

impl ChallengeEvent {
    pub fn new(event: ChallengeEventKind, block_number: i64, user_id: i64) -> Self {
        Self {
            event,
            block_number,
            user_id,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: JsonValue) -> Self {
        self.extra = Some(extra);
        self
    }
}

pub async fn dispatch_challenge_events(
    state: &dyn SharedState,
    events: &[ChallengeEvent],
) -> Result<(), StateError> {
    if events.is_empty() {
        return Ok(());
    }
    let encoded = events
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StateError::Encode(e.to_string()))?;
    state.push(CHALLENGE_EVENT_QUEUE, &encoded).await?;
    tracing::debug!("Dispatched {} challenge events", encoded.len());
    Ok(())
}

const ROLLOVER_HOUR: i64 = 19;

/// Start of the trending week containing `at`. Weeks roll over every
/// Friday at 19:00 UTC.
pub fn trending_week_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let since_friday = (at.weekday().num_days_from_monday() + 7
        - Weekday::Fri.num_days_from_monday())
        % 7;
    let friday = at.date_naive() - Duration::days(i64::from(since_friday));
    let start = friday.and_time(NaiveTime::default()).and_utc() + Duration::hours(ROLLOVER_HOUR);
    if start > at {
        start - Duration::weeks(1)
    } else {
        start
    }
}

/// Queue the weekly trending calculation the first time a block from a new
/// trending week is indexed. Returns whether the task was queued.
pub async fn check_trending_challenge(
    state: &dyn SharedState,
    block_timestamp: i64,
) -> Result<bool, StateError> {
    let at = DateTime::from_timestamp(block_timestamp, 0).ok_or_else(|| {
        StateError::Encode(format!("block timestamp {} out of range", block_timestamp))
    })?;
    let week_start = trending_week_start(at);
    let week = week_start.timestamp();
    let last = state
        .get(TRENDING_CHALLENGE_WEEK)
        .await?
        .and_then(|v| v.parse::<i64>().ok());
    if last.is_some_and(|last| last >= week) {
        return Ok(false);
    }

    let task = json!({
        "task": "calculate_trending_challenges",
        "date": at.format("%Y-%m-%d").to_string(),
    });
    state.push(TASK_QUEUE, &[task.to_string()]).await?;
    state
        .set(TRENDING_CHALLENGE_WEEK, &week.to_string(), None)
        .await?;
    tracing::info!(
        "Queued trending challenge calculation for week starting {}",
        week_start
    );
    Ok(true)
}
