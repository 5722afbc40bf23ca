//! Card derivation and post-fetch queue narrowing. Both are pure functions of
//! the fetched records; nothing here touches the store.

use chrono::{DateTime, Utc};

use super::filters::{Queue, HOT_SCORE_THRESHOLD};
use super::types::{
    BoardRecord, Card, CardBadges, CardOwner, CardTask, ConsentChannel, OwnerRef, Stage,
};

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let joined = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// "first last", then email, then phone, then the record id.
pub fn display_name(record: &BoardRecord) -> String {
    full_name(record.first_name.as_deref(), record.last_name.as_deref())
        .or_else(|| non_empty(record.email.as_deref()))
        .or_else(|| non_empty(record.phone.as_deref()))
        .unwrap_or_else(|| record.id.to_string())
}

pub fn owner_name(owner: &OwnerRef) -> String {
    full_name(owner.first_name.as_deref(), owner.last_name.as_deref())
        .or_else(|| non_empty(owner.email.as_deref()))
        .unwrap_or_else(|| owner.id.to_string())
}

/// Most recent known interaction, walking from the activity rollup down to
/// the record's own timestamps.
pub fn last_interaction(record: &BoardRecord) -> DateTime<Utc> {
    let rollup = record.activity_rollup.as_ref();
    rollup
        .and_then(|r| r.last_touchpoint_at)
        .or_else(|| rollup.and_then(|r| r.last_reply_at))
        .or(record.last_activity_at)
        .or(record.stage_entered_at)
        .unwrap_or(record.updated_at)
}

pub fn age_hours(entered: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    ((now - entered).num_minutes() / 60).max(0)
}

pub fn rounded_score(score: Option<f64>) -> Option<i64> {
    score.filter(|s| s.is_finite()).map(|s| s.round() as i64)
}

fn next_task(record: &BoardRecord) -> Option<CardTask> {
    // Earliest due first, undated last; the first of equal keys wins.
    record
        .open_tasks
        .iter()
        .min_by_key(|t| (t.due_at.is_none(), t.due_at))
        .map(|t| CardTask {
            id: t.id,
            title: t.title.clone(),
            due_at: t.due_at,
        })
}

pub fn derive_card(record: &BoardRecord, stage: &Stage, now: DateTime<Utc>) -> Card {
    Card {
        deal_id: record.id,
        contact_id: record.contact_id,
        name: display_name(record),
        email: non_empty(record.email.as_deref()),
        phone: non_empty(record.phone.as_deref()),
        age_hours: age_hours(record.effective_stage_entry(), now),
        score: rounded_score(record.lead_score),
        owner: record.owner.as_ref().map(|o| CardOwner {
            id: o.id,
            name: owner_name(o),
        }),
        badges: CardBadges {
            sla: stage.sla.is_breached(record, now),
            dup: record.duplicate_of.is_some(),
            consent_sms: record.has_consent(ConsentChannel::Sms),
            consent_email: record.has_consent(ConsentChannel::Email),
        },
        last_activity_at: last_interaction(record),
        next_task: next_task(record),
    }
}

impl Queue {
    /// Unrecognized queues keep everything.
    pub fn retains(&self, card: &Card) -> bool {
        match self {
            Self::All | Self::Other(_) => true,
            Self::Unassigned => card.owner.is_none(),
            Self::Hot => card.score.unwrap_or(0) as f64 >= HOT_SCORE_THRESHOLD,
            Self::Overdue => card.badges.sla,
        }
    }
}

pub fn apply_queue(cards: Vec<Card>, queue: Option<&Queue>) -> Vec<Card> {
    match queue {
        Some(queue) => cards.into_iter().filter(|c| queue.retains(c)).collect(),
        None => cards,
    }
}
