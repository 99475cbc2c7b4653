use serde_json::{json, Value as JsonValue};

use crate::db::DbError;
use crate::indexer::challenges::{ChallengeEvent, ChallengeEventKind};
use crate::models::{repo, UserEvents};

use super::ApplyContext;

/// Fold the metadata `events` map into the user's set-once signup facts.
pub(super) async fn update_user_events(
    ctx: &mut ApplyContext<'_>,
    user_id: i64,
    events: &JsonValue,
    txhash: &str,
) -> Result<(), DbError> {
    let Some(events) = events.as_object() else {
        return Ok(());
    };
    let block_number = ctx.block.number;

    let existing: Option<UserEvents> = repo::current(ctx.tx, UserEvents::key_for(user_id)).await?;
    let mut next = match &existing {
        Some(row) => row.clone(),
        None => UserEvents {
            user_id,
            ..Default::default()
        },
    };
    next.meta = ctx.meta(txhash);

    let mut changed = false;
    if let Some(referrer) = events.get("referrer").and_then(JsonValue::as_i64) {
        if next.referrer.is_none() {
            next.referrer = Some(referrer);
            changed = true;
            ctx.effects.challenge_events.push(
                ChallengeEvent::new(ChallengeEventKind::ReferralSignup, block_number, referrer)
                    .with_extra(json!({ "referred_user_id": user_id })),
            );
            ctx.effects.challenge_events.push(ChallengeEvent::new(
                ChallengeEventKind::ReferredSignup,
                block_number,
                user_id,
            ));
        }
    }
    if let Some(true) = events.get("is_mobile_user").and_then(JsonValue::as_bool) {
        if !next.is_mobile_user {
            next.is_mobile_user = true;
            changed = true;
            ctx.effects.challenge_events.push(ChallengeEvent::new(
                ChallengeEventKind::MobileInstall,
                block_number,
                user_id,
            ));
        }
    }

    if existing.is_none() || changed {
        repo::flush_versions(ctx.tx, &[next]).await?;
    }
    Ok(())
}
