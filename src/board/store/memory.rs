use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BoardStore, CardCursor, StoreError};
use crate::board::predicate::BoardPredicate;
use crate::board::sla::SlaPolicy;
use crate::board::stream::{BoardEvent, BoardEventBus};
use crate::board::types::{BoardRecord, Pipeline, RecordOrder, Stage};

/// In-process store. Evaluates `BoardPredicate` directly, so it doubles as the
/// reference semantics for the SQL-backed store.
#[derive(Default)]
pub struct MemoryBoardStore {
    pipelines: RwLock<HashMap<Uuid, Pipeline>>,
    records: RwLock<HashMap<Uuid, BoardRecord>>,
    events: Option<BoardEventBus>,
}

impl MemoryBoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record writes are announced on `events` to live board subscribers.
    pub fn with_events(events: BoardEventBus) -> Self {
        Self {
            events: Some(events),
            ..Self::default()
        }
    }

    pub async fn insert_pipeline(&self, pipeline: Pipeline) {
        self.pipelines.write().await.insert(pipeline.id, pipeline);
    }

    pub async fn upsert_record(&self, record: BoardRecord) {
        let current = record.clone();
        let previous = self.records.write().await.insert(record.id, record);

        let Some(events) = &self.events else {
            return;
        };
        let policy = self.stage_policy(&current).await;
        for event in record_events(previous.as_ref(), &current, policy, Utc::now()) {
            events.publish(current.pipeline_id, event);
        }
    }

    async fn stage_policy(&self, record: &BoardRecord) -> SlaPolicy {
        self.pipelines
            .read()
            .await
            .get(&record.pipeline_id)
            .and_then(|p| p.stages.iter().find(|s| s.id == record.stage_id))
            .map(|s| s.sla)
            .unwrap_or_default()
    }

    async fn matching(&self, predicate: &BoardPredicate) -> Vec<BoardRecord> {
        let records = self.records.read().await;
        let mut matched: Vec<BoardRecord> = records
            .values()
            .filter(|r| predicate.matches(r))
            .cloned()
            .collect();
        matched.sort_by_key(BoardRecord::sort_key);
        matched
    }
}

/// What a write changed: creation, a stage move or an in-place update, plus
/// an SLA transition when the breach state in the current stage flipped.
fn record_events(
    previous: Option<&BoardRecord>,
    current: &BoardRecord,
    policy: SlaPolicy,
    now: DateTime<Utc>,
) -> Vec<BoardEvent> {
    let record_id = current.id;
    let stage_id = current.stage_id;
    let change = match previous {
        None => BoardEvent::RecordCreated { record_id, stage_id },
        Some(prev) if prev.stage_id != stage_id => BoardEvent::RecordMoved {
            record_id,
            from_stage_id: prev.stage_id,
            to_stage_id: stage_id,
        },
        Some(_) => BoardEvent::RecordUpdated { record_id, stage_id },
    };

    let breached = policy.is_breached(current, now);
    let was_breached = previous
        .filter(|prev| prev.stage_id == stage_id)
        .is_some_and(|prev| policy.is_breached(prev, now));

    let mut events = vec![change];
    if breached != was_breached {
        events.push(BoardEvent::SlaStateChanged {
            record_id,
            stage_id,
            breached,
        });
    }
    events
}

#[async_trait]
impl BoardStore for MemoryBoardStore {
    async fn find_pipeline(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
    ) -> Result<Option<Pipeline>, StoreError> {
        Ok(self
            .pipelines
            .read()
            .await
            .get(&pipeline_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_stage(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Option<Stage>, StoreError> {
        let pipeline = self.find_pipeline(tenant_id, pipeline_id).await?;
        Ok(pipeline.and_then(|p| {
            p.stages
                .into_iter()
                .find(|s| s.id == stage_id && s.tenant_id == tenant_id)
        }))
    }

    async fn find_records(
        &self,
        predicate: &BoardPredicate,
        order: RecordOrder,
        limit: usize,
        after: Option<&CardCursor>,
    ) -> Result<Vec<BoardRecord>, StoreError> {
        let RecordOrder::StageEntryAsc = order;
        Ok(self
            .matching(predicate)
            .await
            .into_iter()
            .filter(|r| after.map_or(true, |c| r.sort_key() > c.key()))
            .take(limit)
            .collect())
    }

    async fn count_records(&self, predicate: &BoardPredicate) -> Result<u64, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().filter(|r| predicate.matches(r)).count() as u64)
    }

    async fn grouped_counts(
        &self,
        predicate: &BoardPredicate,
    ) -> Result<HashMap<Uuid, u64>, StoreError> {
        let records = self.records.read().await;
        let mut counts = HashMap::new();
        for record in records.values().filter(|r| predicate.matches(r)) {
            *counts.entry(record.stage_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn find_first_record(
        &self,
        predicate: &BoardPredicate,
        order: RecordOrder,
    ) -> Result<Option<BoardRecord>, StoreError> {
        Ok(self
            .find_records(predicate, order, 1, None)
            .await?
            .into_iter()
            .next())
    }

    async fn oldest_per_stage(
        &self,
        predicate: &BoardPredicate,
    ) -> Result<HashMap<Uuid, DateTime<Utc>>, StoreError> {
        let mut oldest = HashMap::new();
        // Sorted ascending, so the first record seen per stage is the oldest.
        for record in self.matching(predicate).await {
            oldest
                .entry(record.stage_id)
                .or_insert_with(|| record.effective_stage_entry());
        }
        Ok(oldest)
    }
}
