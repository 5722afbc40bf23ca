//! Stage SLA policy and the breach rule shared by bulk counts and card badges.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::BoardRecord;

/// Per-stage service level. A stage without an SLA never breaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum SlaPolicy {
    #[default]
    NoSla,
    Minutes(u32),
}

impl From<Option<u32>> for SlaPolicy {
    fn from(minutes: Option<u32>) -> Self {
        match minutes {
            Some(m) => Self::Minutes(m),
            None => Self::NoSla,
        }
    }
}

impl From<SlaPolicy> for Option<u32> {
    fn from(policy: SlaPolicy) -> Self {
        policy.minutes()
    }
}

impl SlaPolicy {
    pub fn minutes(&self) -> Option<u32> {
        match self {
            Self::NoSla => None,
            Self::Minutes(m) => Some(*m),
        }
    }

    /// Records whose last activity is older than this instant are in breach.
    pub fn threshold(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::NoSla => None,
            Self::Minutes(m) => Some(now - Duration::minutes(i64::from(*m))),
        }
    }

    pub fn is_breached(&self, record: &BoardRecord, now: DateTime<Utc>) -> bool {
        match self.threshold(now) {
            Some(threshold) => breaches(record, threshold),
            None => false,
        }
    }
}

/// `last_activity_at < threshold`, or no activity and the stage entry is older
/// than the threshold.
pub fn breaches(record: &BoardRecord, threshold: DateTime<Utc>) -> bool {
    match record.last_activity_at {
        Some(last) => last < threshold,
        None => record.effective_stage_entry() < threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::test_support::record_in;
    use uuid::Uuid;

    #[test]
    fn test_no_sla_never_breaches() {
        let now = Utc::now();
        let mut record = record_in(Uuid::new_v4(), now - Duration::days(30));
        record.last_activity_at = Some(now - Duration::days(29));
        assert!(!SlaPolicy::NoSla.is_breached(&record, now));
        assert_eq!(SlaPolicy::NoSla.threshold(now), None);
    }

    #[test]
    fn test_breach_falls_back_to_stage_entry() {
        let now = Utc::now();
        let record = record_in(Uuid::new_v4(), now - Duration::minutes(90));
        assert!(SlaPolicy::Minutes(60).is_breached(&record, now));
        assert!(!SlaPolicy::Minutes(120).is_breached(&record, now));
    }

    #[test]
    fn test_recent_activity_clears_breach() {
        let now = Utc::now();
        let mut record = record_in(Uuid::new_v4(), now - Duration::hours(10));
        record.last_activity_at = Some(now - Duration::minutes(5));
        assert!(!SlaPolicy::Minutes(60).is_breached(&record, now));

        record.last_activity_at = Some(now - Duration::minutes(61));
        assert!(SlaPolicy::Minutes(60).is_breached(&record, now));
    }

    #[test]
    fn test_missing_stage_entry_uses_created_at() {
        let now = Utc::now();
        let mut record = record_in(Uuid::new_v4(), now);
        record.stage_entered_at = None;
        record.created_at = now - Duration::hours(3);
        assert!(SlaPolicy::Minutes(60).is_breached(&record, now));
    }

    #[test]
    fn test_sla_policy_serde_as_optional_minutes() {
        let policy: SlaPolicy = serde_json::from_str("45").unwrap();
        assert_eq!(policy, SlaPolicy::Minutes(45));
        let policy: SlaPolicy = serde_json::from_str("null").unwrap();
        assert_eq!(policy, SlaPolicy::NoSla);
        assert_eq!(serde_json::to_string(&SlaPolicy::Minutes(5)).unwrap(), "5");
    }
}
