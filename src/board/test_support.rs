use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::sla::SlaPolicy;
use super::types::{BoardRecord, OwnerRef, Pipeline, Stage};

pub const TENANT: Uuid = Uuid::from_u128(0x7e4a_0000_0000_0000_0000_0000_0000_0001);
pub const PIPELINE: Uuid = Uuid::from_u128(0x91be_0000_0000_0000_0000_0000_0000_0002);

/// A bare record in `stage_id` that entered (and was created) at `entered_at`.
pub fn record_in(stage_id: Uuid, entered_at: DateTime<Utc>) -> BoardRecord {
    BoardRecord {
        id: Uuid::new_v4(),
        tenant_id: TENANT,
        pipeline_id: PIPELINE,
        stage_id,
        contact_id: None,
        first_name: None,
        last_name: None,
        email: None,
        phone: None,
        stage_entered_at: Some(entered_at),
        last_activity_at: None,
        owner: None,
        lead_score: None,
        score_tier: None,
        lead_fit: None,
        consents: Vec::new(),
        open_tasks: Vec::new(),
        activity_rollup: None,
        duplicate_of: None,
        created_at: entered_at,
        updated_at: entered_at,
        deleted_at: None,
    }
}

pub fn owned_by(mut record: BoardRecord, owner_id: Uuid) -> BoardRecord {
    record.owner = Some(OwnerRef {
        id: owner_id,
        first_name: None,
        last_name: None,
        email: None,
    });
    record
}

pub fn stage_with(sla: SlaPolicy) -> Stage {
    Stage {
        id: Uuid::new_v4(),
        pipeline_id: PIPELINE,
        tenant_id: TENANT,
        name: "Qualify".to_string(),
        order: 0,
        sla,
    }
}

/// Pipeline with one stage per entry, in order; `Some(m)` is an SLA of `m`
/// minutes.
pub fn pipeline_with(slas: &[Option<u32>]) -> (Pipeline, Vec<Uuid>) {
    let stages: Vec<Stage> = slas
        .iter()
        .enumerate()
        .map(|(i, minutes)| Stage {
            id: Uuid::new_v4(),
            pipeline_id: PIPELINE,
            tenant_id: TENANT,
            name: format!("Stage {i}"),
            order: i as i32,
            sla: SlaPolicy::from(*minutes),
        })
        .collect();
    let ids = stages.iter().map(|s| s.id).collect();
    (
        Pipeline {
            id: PIPELINE,
            tenant_id: TENANT,
            name: "Sales".to_string(),
            stages,
        },
        ids,
    )
}
