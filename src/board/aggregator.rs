//! Per-stage totals, SLA breach counts and oldest-record age.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use log::trace;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use super::cards::age_hours;
use super::filters::BoardFilters;
use super::predicate::{build_predicate, BoardPredicate, StageScope};
use super::sla::SlaPolicy;
use super::store::{BoardStore, StoreError};
use super::types::{BoardColumn, Pipeline, RecordOrder, Stage, StageMetrics};

pub fn oldest_hours(oldest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    oldest.map_or(0, |entered| age_hours(entered, now))
}

pub struct StageAggregator {
    store: Arc<dyn BoardStore>,
}

impl StageAggregator {
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self { store }
    }

    /// Breach counts for every stage carrying an SLA. Stages sharing an SLA
    /// duration share a threshold, so each distinct duration is one grouped
    /// count; the groups run concurrently.
    async fn grouped_breaches(
        &self,
        base: &BoardPredicate,
        stages: &[&Stage],
        now: DateTime<Utc>,
    ) -> Result<HashMap<Uuid, u64>, StoreError> {
        let mut by_minutes: BTreeMap<u32, Vec<Uuid>> = BTreeMap::new();
        for stage in stages {
            if let SlaPolicy::Minutes(m) = stage.sla {
                by_minutes.entry(m).or_default().push(stage.id);
            }
        }

        let queries = by_minutes.into_iter().filter_map(|(minutes, ids)| {
            let threshold = SlaPolicy::Minutes(minutes).threshold(now)?;
            let predicate = base
                .with_stages(StageScope::Many(ids))
                .with_breach(threshold);
            let store = Arc::clone(&self.store);
            Some(async move { store.grouped_counts(&predicate).await })
        });

        let mut breaches = HashMap::new();
        for group in try_join_all(queries).await? {
            breaches.extend(group);
        }
        Ok(breaches)
    }

    pub async fn columns(
        &self,
        pipeline: &Pipeline,
        filters: &BoardFilters,
        now: DateTime<Utc>,
    ) -> Result<Vec<BoardColumn>, StoreError> {
        let stages = pipeline.ordered_stages();
        let predicate = build_predicate(
            pipeline.tenant_id,
            pipeline.id,
            StageScope::Many(pipeline.stage_ids()),
            filters,
            now,
        );

        let (totals, breaches, oldest) = tokio::try_join!(
            self.store.grouped_counts(&predicate),
            self.grouped_breaches(&predicate, &stages, now),
            self.store.oldest_per_stage(&predicate),
        )?;

        trace!(
            "Board columns for pipeline {}: {} stages, {} non-empty",
            pipeline.id,
            stages.len(),
            totals.len()
        );

        Ok(stages
            .into_iter()
            .map(|stage| {
                let total = totals.get(&stage.id).copied().unwrap_or(0);
                let sla_breaches = breaches.get(&stage.id).copied().unwrap_or(0);
                BoardColumn {
                    id: stage.id,
                    name: stage.name.clone(),
                    count: if filters.is_overdue_queue() {
                        sla_breaches
                    } else {
                        total
                    },
                    sla_breaches,
                    oldest_hours: oldest_hours(oldest.get(&stage.id).copied(), now),
                }
            })
            .collect())
    }

    pub async fn stage_metrics(
        &self,
        stage: &Stage,
        filters: &BoardFilters,
        now: DateTime<Utc>,
    ) -> Result<StageMetrics, StoreError> {
        let predicate = build_predicate(
            stage.tenant_id,
            stage.pipeline_id,
            StageScope::One(stage.id),
            filters,
            now,
        );

        let breach_count = async {
            match stage.sla.threshold(now) {
                Some(threshold) => self.store.count_records(&predicate.with_breach(threshold)).await,
                None => Ok(0),
            }
        };

        let (total, sla_breaches, oldest) = tokio::try_join!(
            self.store.count_records(&predicate),
            breach_count,
            self.store
                .find_first_record(&predicate, RecordOrder::StageEntryAsc),
        )?;

        Ok(StageMetrics {
            count: if filters.is_overdue_queue() {
                sla_breaches
            } else {
                total
            },
            sla_breaches,
            oldest_hours: oldest_hours(oldest.map(|r| r.effective_stage_entry()), now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::filters::parse_filters;
    use crate::board::store::MemoryBoardStore;
    use crate::board::test_support::{pipeline_with, record_in};
    use chrono::Duration;

    async fn seeded() -> (Arc<MemoryBoardStore>, Pipeline, Vec<Uuid>, DateTime<Utc>) {
        let now = Utc::now();
        let store = Arc::new(MemoryBoardStore::new());
        let (pipeline, stages) = pipeline_with(&[Some(60), None, Some(60)]);
        store.insert_pipeline(pipeline.clone()).await;

        // Stage 0: one breached (90m idle), one fresh.
        store
            .upsert_record(record_in(stages[0], now - Duration::minutes(90)))
            .await;
        store
            .upsert_record(record_in(stages[0], now - Duration::minutes(10)))
            .await;
        // Stage 1 has no SLA: ancient records never breach.
        store
            .upsert_record(record_in(stages[1], now - Duration::days(9)))
            .await;
        (store, pipeline, stages, now)
    }

    #[tokio::test]
    async fn test_columns_counts_breaches_and_oldest() {
        let (store, pipeline, stages, now) = seeded().await;
        let aggregator = StageAggregator::new(store);

        let columns = aggregator
            .columns(&pipeline, &BoardFilters::default(), now)
            .await
            .unwrap();

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].id, stages[0]);
        assert_eq!((columns[0].count, columns[0].sla_breaches), (2, 1));
        assert_eq!(columns[0].oldest_hours, 1);
        assert_eq!((columns[1].count, columns[1].sla_breaches), (1, 0));
        assert_eq!(columns[1].oldest_hours, 216);
        assert_eq!(
            (columns[2].count, columns[2].sla_breaches, columns[2].oldest_hours),
            (0, 0, 0)
        );
    }

    #[tokio::test]
    async fn test_overdue_queue_counts_breaches() {
        let (store, pipeline, _, now) = seeded().await;
        let aggregator = StageAggregator::new(store);
        let filters = parse_filters(Some(r#"{"queueId":"overdue"}"#));

        let columns = aggregator.columns(&pipeline, &filters, now).await.unwrap();
        for column in &columns {
            assert_eq!(column.count, column.sla_breaches);
        }
        assert_eq!(columns[0].count, 1);
    }

    #[tokio::test]
    async fn test_stage_metrics_match_columns() {
        let (store, pipeline, _, now) = seeded().await;
        let aggregator = StageAggregator::new(store);
        let filters = BoardFilters::default();

        let columns = aggregator.columns(&pipeline, &filters, now).await.unwrap();
        for (stage, column) in pipeline.ordered_stages().into_iter().zip(&columns) {
            let metrics = aggregator.stage_metrics(stage, &filters, now).await.unwrap();
            assert_eq!(metrics.count, column.count);
            assert_eq!(metrics.sla_breaches, column.sla_breaches);
            assert_eq!(metrics.oldest_hours, column.oldest_hours);
        }
    }
}
