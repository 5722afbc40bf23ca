use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sla::SlaPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Stages in display order.
    pub fn ordered_stages(&self) -> Vec<&Stage> {
        let mut stages: Vec<&Stage> = self.stages.iter().collect();
        stages.sort_by_key(|s| s.order);
        stages
    }

    pub fn stage_ids(&self) -> Vec<Uuid> {
        self.ordered_stages().iter().map(|s| s.id).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub order: i32,
    #[serde(default, rename = "slaMinutes")]
    pub sla: SlaPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScoreTier {
    A,
    B,
    C,
    D,
}

impl std::fmt::Display for ScoreTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}

impl std::str::FromStr for ScoreTier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentChannel {
    Sms,
    Email,
}

impl std::fmt::Display for ConsentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sms => write!(f, "SMS"),
            Self::Email => write!(f, "EMAIL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    pub channel: ConsentChannel,
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTask {
    pub id: Uuid,
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadFit {
    pub preapproved: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRollup {
    pub last_touchpoint_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

/// A lead/deal as read from the data store. This service never writes records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub pipeline_id: Uuid,
    pub stage_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub stage_entered_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub owner: Option<OwnerRef>,
    pub lead_score: Option<f64>,
    pub score_tier: Option<ScoreTier>,
    pub lead_fit: Option<LeadFit>,
    #[serde(default)]
    pub consents: Vec<Consent>,
    #[serde(default)]
    pub open_tasks: Vec<OpenTask>,
    pub activity_rollup: Option<ActivityRollup>,
    pub duplicate_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BoardRecord {
    /// When the record entered its current stage, falling back to creation.
    pub fn effective_stage_entry(&self) -> DateTime<Utc> {
        self.stage_entered_at.unwrap_or(self.created_at)
    }

    pub fn owner_id(&self) -> Option<Uuid> {
        self.owner.as_ref().map(|o| o.id)
    }

    pub fn is_preapproved(&self) -> bool {
        self.lead_fit.as_ref().is_some_and(|f| f.preapproved)
    }

    pub fn has_consent(&self, channel: ConsentChannel) -> bool {
        self.consents
            .iter()
            .any(|c| c.granted && c.channel == channel)
    }

    /// Board reading order key: FIFO by stage entry with explicit tie-breaks.
    pub fn sort_key(&self) -> (DateTime<Utc>, DateTime<Utc>, Uuid) {
        (self.effective_stage_entry(), self.created_at, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrder {
    /// `(stage entry asc, created_at asc, id asc)`
    #[default]
    StageEntryAsc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardColumn {
    pub id: Uuid,
    pub name: String,
    pub count: u64,
    pub sla_breaches: u64,
    pub oldest_hours: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetrics {
    pub count: u64,
    pub sla_breaches: u64,
    pub oldest_hours: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardOwner {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardBadges {
    pub sla: bool,
    pub dup: bool,
    pub consent_sms: bool,
    pub consent_email: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTask {
    pub id: Uuid,
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub deal_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub age_hours: i64,
    pub score: Option<i64>,
    pub owner: Option<CardOwner>,
    pub badges: CardBadges,
    pub last_activity_at: DateTime<Utc>,
    pub next_task: Option<CardTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPage {
    pub rows: Vec<Card>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FiltersQuery {
    pub filters: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardsQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub filters: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub filters: serde_json::Value,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateViewRequest {
    pub name: String,
    #[serde(default)]
    pub filters: serde_json::Value,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateViewRequest {
    pub name: Option<String>,
    pub filters: Option<serde_json::Value>,
    pub is_default: Option<bool>,
}

impl UpdateViewRequest {
    pub fn set_default() -> Self {
        Self {
            is_default: Some(true),
            ..Self::default()
        }
    }
}
