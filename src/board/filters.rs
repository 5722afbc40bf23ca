//! Board filter parsing. Malformed input never fails a request: anything that
//! cannot be understood is dropped and the remaining filters still apply.

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::types::ScoreTier;

pub const HOT_SCORE_THRESHOLD: f64 = 80.0;

/// Named post-fetch card queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Queue {
    All,
    Unassigned,
    Hot,
    Overdue,
    Other(String),
}

impl Queue {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match trimmed {
            "all" => Self::All,
            "unassigned" => Self::Unassigned,
            "hot" => Self::Hot,
            "overdue" => Self::Overdue,
            _ => Self::Other(trimmed.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::All => "all",
            Self::Unassigned => "unassigned",
            Self::Hot => "hot",
            Self::Overdue => "overdue",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardFilters {
    pub owner_id: Option<Uuid>,
    pub score_tier: Vec<ScoreTier>,
    pub last_activity_days: Option<u32>,
    pub preapproved_only: bool,
    pub queue: Option<Queue>,
}

impl BoardFilters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_overdue_queue(&self) -> bool {
        self.queue == Some(Queue::Overdue)
    }

    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        Self {
            owner_id: obj.get("ownerId").and_then(parse_owner),
            score_tier: obj.get("scoreTier").map(parse_tiers).unwrap_or_default(),
            last_activity_days: obj.get("lastActivityDays").and_then(parse_days),
            preapproved_only: matches!(obj.get("preapprovedOnly"), Some(Value::Bool(true))),
            queue: obj
                .get("queueId")
                .and_then(Value::as_str)
                .and_then(Queue::parse),
        }
    }
}

/// Decodes the opaque `filters` payload. Invalid JSON or a non-object yields
/// the empty filter set.
pub fn parse_filters(raw: Option<&str>) -> BoardFilters {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return BoardFilters::default();
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(value) => BoardFilters::from_value(&value),
        Err(e) => {
            debug!("Ignoring unparseable board filters: {e}");
            BoardFilters::default()
        }
    }
}

fn parse_owner(value: &Value) -> Option<Uuid> {
    let owner = value.as_str()?.trim();
    if owner.is_empty() || owner == "all" {
        return None;
    }
    Uuid::parse_str(owner).ok()
}

fn parse_tiers(value: &Value) -> Vec<ScoreTier> {
    let raw: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };

    let mut tiers = Vec::new();
    for tier in raw.into_iter().filter_map(|s| s.parse::<ScoreTier>().ok()) {
        if !tiers.contains(&tier) {
            tiers.push(tier);
        }
    }
    tiers
}

fn parse_days(value: &Value) -> Option<u32> {
    let days = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !days.is_finite() {
        return None;
    }
    // Saturating float-to-int cast: negatives become 0, huge values clamp.
    Some(days.trunc().max(0.0) as u32)
}
