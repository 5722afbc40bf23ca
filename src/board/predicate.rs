//! The single "where" expression shared by count and scan paths. Counts and
//! cards agree because both are computed from the same `BoardPredicate`.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::filters::{BoardFilters, Queue, HOT_SCORE_THRESHOLD};
use super::sla;
use super::types::{BoardRecord, ScoreTier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageScope {
    One(Uuid),
    Many(Vec<Uuid>),
}

impl StageScope {
    pub fn contains(&self, stage_id: Uuid) -> bool {
        match self {
            Self::One(id) => *id == stage_id,
            Self::Many(ids) => ids.contains(&stage_id),
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        match self {
            Self::One(id) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerClause {
    Any,
    Unassigned,
    Is(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardPredicate {
    pub tenant_id: Uuid,
    pub pipeline_id: Uuid,
    pub stages: StageScope,
    pub owner: OwnerClause,
    pub score_tiers: Vec<ScoreTier>,
    pub preapproved_only: bool,
    pub min_lead_score: Option<f64>,
    /// Effective last activity must be at or after this instant.
    pub active_since: Option<DateTime<Utc>>,
    /// Set only for bulk breach counts.
    pub breached_before: Option<DateTime<Utc>>,
}

pub fn build_predicate(
    tenant_id: Uuid,
    pipeline_id: Uuid,
    stages: StageScope,
    filters: &BoardFilters,
    now: DateTime<Utc>,
) -> BoardPredicate {
    let owner = if filters.queue == Some(Queue::Unassigned) {
        OwnerClause::Unassigned
    } else if let Some(owner_id) = filters.owner_id {
        OwnerClause::Is(owner_id)
    } else {
        OwnerClause::Any
    };

    let min_lead_score = (filters.queue == Some(Queue::Hot)).then_some(HOT_SCORE_THRESHOLD);

    // A window reaching past the representable range restricts nothing.
    let active_since = filters
        .last_activity_days
        .filter(|days| *days > 0)
        .and_then(|days| now.checked_sub_signed(Duration::days(i64::from(days))));

    BoardPredicate {
        tenant_id,
        pipeline_id,
        stages,
        owner,
        score_tiers: filters.score_tier.clone(),
        preapproved_only: filters.preapproved_only,
        min_lead_score,
        active_since,
        breached_before: None,
    }
}

impl BoardPredicate {
    /// Same predicate narrowed to records breaching the given SLA threshold.
    pub fn with_breach(&self, threshold: DateTime<Utc>) -> Self {
        Self {
            breached_before: Some(threshold),
            ..self.clone()
        }
    }

    pub fn with_stages(&self, stages: StageScope) -> Self {
        Self {
            stages,
            ..self.clone()
        }
    }

    pub fn matches(&self, record: &BoardRecord) -> bool {
        if record.deleted_at.is_some()
            || record.tenant_id != self.tenant_id
            || record.pipeline_id != self.pipeline_id
            || !self.stages.contains(record.stage_id)
        {
            return false;
        }

        let owner_ok = match &self.owner {
            OwnerClause::Any => true,
            OwnerClause::Unassigned => record.owner.is_none(),
            OwnerClause::Is(id) => record.owner_id() == Some(*id),
        };
        if !owner_ok {
            return false;
        }

        if !self.score_tiers.is_empty()
            && !record
                .score_tier
                .is_some_and(|tier| self.score_tiers.contains(&tier))
        {
            return false;
        }

        if self.preapproved_only && !record.is_preapproved() {
            return false;
        }

        if let Some(min) = self.min_lead_score {
            if !record.lead_score.is_some_and(|score| score >= min) {
                return false;
            }
        }

        if let Some(since) = self.active_since {
            let last = record
                .last_activity_at
                .unwrap_or_else(|| record.effective_stage_entry());
            if last < since {
                return false;
            }
        }

        if let Some(threshold) = self.breached_before {
            if !sla::breaches(record, threshold) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::filters::parse_filters;
    use crate::board::test_support::{owned_by, record_in, TENANT, PIPELINE};

    #[test]
    fn test_base_scope_excludes_deleted_and_foreign() {
        let now = Utc::now();
        let stage = Uuid::new_v4();
        let predicate = build_predicate(
            TENANT,
            PIPELINE,
            StageScope::One(stage),
            &BoardFilters::default(),
            now,
        );

        let record = record_in(stage, now);
        assert!(predicate.matches(&record));

        let mut deleted = record.clone();
        deleted.deleted_at = Some(now);
        assert!(!predicate.matches(&deleted));

        let mut foreign = record.clone();
        foreign.tenant_id = Uuid::new_v4();
        assert!(!predicate.matches(&foreign));

        let other_stage = record_in(Uuid::new_v4(), now);
        assert!(!predicate.matches(&other_stage));
    }

    #[test]
    fn test_unassigned_queue_overrides_owner() {
        let now = Utc::now();
        let stage = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let filters = parse_filters(Some(&format!(
            r#"{{"ownerId":"{owner}","queueId":"unassigned"}}"#
        )));
        let predicate = build_predicate(TENANT, PIPELINE, StageScope::One(stage), &filters, now);
        assert_eq!(predicate.owner, OwnerClause::Unassigned);

        assert!(predicate.matches(&record_in(stage, now)));
        assert!(!predicate.matches(&owned_by(record_in(stage, now), owner)));
    }

    #[test]
    fn test_hot_queue_requires_score() {
        let now = Utc::now();
        let stage = Uuid::new_v4();
        let filters = parse_filters(Some(r#"{"queueId":"hot"}"#));
        let predicate = build_predicate(TENANT, PIPELINE, StageScope::One(stage), &filters, now);

        let mut record = record_in(stage, now);
        assert!(!predicate.matches(&record));
        record.lead_score = Some(79.9);
        assert!(!predicate.matches(&record));
        record.lead_score = Some(80.0);
        assert!(predicate.matches(&record));
    }

    #[test]
    fn test_tier_and_preapproved_overlays() {
        let now = Utc::now();
        let stage = Uuid::new_v4();
        let filters = parse_filters(Some(r#"{"scoreTier":["A"],"preapprovedOnly":true}"#));
        let predicate = build_predicate(TENANT, PIPELINE, StageScope::One(stage), &filters, now);

        let mut record = record_in(stage, now);
        record.score_tier = Some(ScoreTier::A);
        assert!(!predicate.matches(&record));

        record.lead_fit = Some(crate::board::types::LeadFit { preapproved: true });
        assert!(predicate.matches(&record));

        record.score_tier = Some(ScoreTier::B);
        assert!(!predicate.matches(&record));
    }

    #[test]
    fn test_last_activity_days_uses_stage_entry_when_inactive() {
        let now = Utc::now();
        let stage = Uuid::new_v4();
        let filters = parse_filters(Some(r#"{"lastActivityDays":3}"#));
        let predicate = build_predicate(TENANT, PIPELINE, StageScope::One(stage), &filters, now);

        assert!(predicate.matches(&record_in(stage, now - Duration::days(2))));
        assert!(!predicate.matches(&record_in(stage, now - Duration::days(4))));

        let mut active = record_in(stage, now - Duration::days(10));
        active.last_activity_at = Some(now - Duration::hours(1));
        assert!(predicate.matches(&active));
    }

    #[test]
    fn test_zero_days_is_no_restriction() {
        let now = Utc::now();
        let filters = parse_filters(Some(r#"{"lastActivityDays":0}"#));
        let predicate =
            build_predicate(TENANT, PIPELINE, StageScope::Many(vec![]), &filters, now);
        assert_eq!(predicate.active_since, None);
    }

    #[test]
    fn test_huge_activity_window_is_no_restriction() {
        let now = Utc::now();
        let stage = Uuid::new_v4();
        for raw in [
            r#"{"lastActivityDays":100000000}"#,
            r#"{"lastActivityDays":"4000000000"}"#,
            r#"{"lastActivityDays":1e300}"#,
        ] {
            let filters = parse_filters(Some(raw));
            let predicate =
                build_predicate(TENANT, PIPELINE, StageScope::One(stage), &filters, now);
            assert_eq!(predicate.active_since, None, "input {raw}");
            assert!(predicate.matches(&record_in(stage, now - Duration::days(5000))));
        }
    }
}
