use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{
    Array, BigInt, Bool, Double, Int4, Nullable, Text, Timestamptz, Uuid as DieselUuid,
};
use log::error;
use std::collections::HashMap;
use uuid::Uuid;

use super::{BoardStore, CardCursor, StoreError};
use crate::board::predicate::{BoardPredicate, OwnerClause};
use crate::board::sla::SlaPolicy;
use crate::board::types::{
    ActivityRollup, BoardRecord, Consent, ConsentChannel, LeadFit, OpenTask, OwnerRef, Pipeline,
    RecordOrder, Stage,
};
use crate::core::shared::utils::DbPool;

const ENTERED: &str = "COALESCE(r.stage_entered_at, r.created_at)";

#[derive(Debug, Clone, PartialEq)]
enum BindValue {
    Uuid(Uuid),
    Uuids(Vec<Uuid>),
    Texts(Vec<String>),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

/// A rendered `WHERE` body plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
struct SqlWhere {
    clauses: Vec<String>,
    binds: Vec<BindValue>,
}

impl SqlWhere {
    fn push_bind(&mut self, value: BindValue) -> String {
        self.binds.push(value);
        format!("${}", self.binds.len())
    }

    fn sql(&self) -> String {
        self.clauses.join(" AND ")
    }
}

fn render_predicate(predicate: &BoardPredicate) -> SqlWhere {
    let mut w = SqlWhere {
        clauses: Vec::new(),
        binds: Vec::new(),
    };

    let p = w.push_bind(BindValue::Uuid(predicate.tenant_id));
    w.clauses.push(format!("r.tenant_id = {p}"));
    let p = w.push_bind(BindValue::Uuid(predicate.pipeline_id));
    w.clauses.push(format!("r.pipeline_id = {p}"));
    let p = w.push_bind(BindValue::Uuids(predicate.stages.ids()));
    w.clauses.push(format!("r.stage_id = ANY({p})"));
    w.clauses.push("r.deleted_at IS NULL".to_string());

    match &predicate.owner {
        OwnerClause::Any => {}
        OwnerClause::Unassigned => w.clauses.push("r.owner_id IS NULL".to_string()),
        OwnerClause::Is(owner_id) => {
            let p = w.push_bind(BindValue::Uuid(*owner_id));
            w.clauses.push(format!("r.owner_id = {p}"));
        }
    }

    if !predicate.score_tiers.is_empty() {
        let tiers = predicate.score_tiers.iter().map(|t| t.to_string()).collect();
        let p = w.push_bind(BindValue::Texts(tiers));
        w.clauses.push(format!("r.score_tier = ANY({p})"));
    }

    if predicate.preapproved_only {
        w.clauses.push("r.preapproved IS TRUE".to_string());
    }

    if let Some(min) = predicate.min_lead_score {
        let p = w.push_bind(BindValue::Float(min));
        w.clauses.push(format!("r.lead_score >= {p}"));
    }

    if let Some(since) = predicate.active_since {
        let p = w.push_bind(BindValue::Timestamp(since));
        w.clauses
            .push(format!("COALESCE(r.last_activity_at, {ENTERED}) >= {p}"));
    }

    if let Some(threshold) = predicate.breached_before {
        let p = w.push_bind(BindValue::Timestamp(threshold));
        w.clauses.push(format!(
            "(r.last_activity_at < {p} OR (r.last_activity_at IS NULL AND {ENTERED} < {p}))"
        ));
    }

    w
}

fn order_clause(order: RecordOrder) -> String {
    match order {
        RecordOrder::StageEntryAsc => format!("{ENTERED} ASC, r.created_at ASC, r.id ASC"),
    }
}

fn bind_all<'a>(
    mut query: BoxedSqlQuery<'a, Pg, SqlQuery>,
    binds: Vec<BindValue>,
) -> BoxedSqlQuery<'a, Pg, SqlQuery> {
    for value in binds {
        query = match value {
            BindValue::Uuid(v) => query.bind::<DieselUuid, _>(v),
            BindValue::Uuids(v) => query.bind::<Array<DieselUuid>, _>(v),
            BindValue::Texts(v) => query.bind::<Array<Text>, _>(v),
            BindValue::Float(v) => query.bind::<Double, _>(v),
            BindValue::Timestamp(v) => query.bind::<Timestamptz, _>(v),
        };
    }
    query
}

#[derive(QueryableByName)]
struct PipelineRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    tenant_id: Uuid,
    #[diesel(sql_type = Text)]
    name: String,
}

#[derive(QueryableByName)]
struct StageRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    pipeline_id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    tenant_id: Uuid,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Int4)]
    stage_order: i32,
    #[diesel(sql_type = Nullable<Int4>)]
    sla_minutes: Option<i32>,
}

impl From<StageRow> for Stage {
    fn from(row: StageRow) -> Self {
        let sla = row
            .sla_minutes
            .and_then(|m| u32::try_from(m).ok())
            .map_or(SlaPolicy::NoSla, SlaPolicy::Minutes);
        Self {
            id: row.id,
            pipeline_id: row.pipeline_id,
            tenant_id: row.tenant_id,
            name: row.name,
            order: row.stage_order,
            sla,
        }
    }
}

#[derive(QueryableByName)]
struct RecordRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    tenant_id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    pipeline_id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    stage_id: Uuid,
    #[diesel(sql_type = Nullable<DieselUuid>)]
    contact_id: Option<Uuid>,
    #[diesel(sql_type = Nullable<Text>)]
    first_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    last_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    email: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    phone: Option<String>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    stage_entered_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    last_activity_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<DieselUuid>)]
    owner_id: Option<Uuid>,
    #[diesel(sql_type = Nullable<Text>)]
    owner_first_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    owner_last_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    owner_email: Option<String>,
    #[diesel(sql_type = Nullable<Double>)]
    lead_score: Option<f64>,
    #[diesel(sql_type = Nullable<Text>)]
    score_tier: Option<String>,
    #[diesel(sql_type = Nullable<Bool>)]
    preapproved: Option<bool>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    last_touchpoint_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    last_reply_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<DieselUuid>)]
    duplicate_of: Option<Uuid>,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    deleted_at: Option<DateTime<Utc>>,
}

impl From<RecordRow> for BoardRecord {
    fn from(row: RecordRow) -> Self {
        let owner = row.owner_id.map(|id| OwnerRef {
            id,
            first_name: row.owner_first_name,
            last_name: row.owner_last_name,
            email: row.owner_email,
        });
        let activity_rollup = (row.last_touchpoint_at.is_some() || row.last_reply_at.is_some())
            .then_some(ActivityRollup {
                last_touchpoint_at: row.last_touchpoint_at,
                last_reply_at: row.last_reply_at,
            });
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            pipeline_id: row.pipeline_id,
            stage_id: row.stage_id,
            contact_id: row.contact_id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            stage_entered_at: row.stage_entered_at,
            last_activity_at: row.last_activity_at,
            owner,
            lead_score: row.lead_score,
            score_tier: row.score_tier.and_then(|t| t.parse().ok()),
            lead_fit: row.preapproved.map(|preapproved| LeadFit { preapproved }),
            consents: Vec::new(),
            open_tasks: Vec::new(),
            activity_rollup,
            duplicate_of: row.duplicate_of,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(QueryableByName)]
struct ConsentRow {
    #[diesel(sql_type = DieselUuid)]
    record_id: Uuid,
    #[diesel(sql_type = Text)]
    channel: String,
}

#[derive(QueryableByName)]
struct TaskRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    record_id: Uuid,
    #[diesel(sql_type = Text)]
    title: String,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    due_at: Option<DateTime<Utc>>,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct StageCountRow {
    #[diesel(sql_type = DieselUuid)]
    stage_id: Uuid,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct StageOldestRow {
    #[diesel(sql_type = DieselUuid)]
    stage_id: Uuid,
    #[diesel(sql_type = Timestamptz)]
    entered_at: DateTime<Utc>,
}

const RECORD_COLUMNS: &str = r#"
    r.id, r.tenant_id, r.pipeline_id, r.stage_id, r.contact_id, r.first_name, r.last_name,
    r.email, r.phone, r.stage_entered_at, r.last_activity_at, r.owner_id,
    u.first_name AS owner_first_name, u.last_name AS owner_last_name, u.email AS owner_email,
    r.lead_score, r.score_tier, r.preapproved, r.last_touchpoint_at, r.last_reply_at,
    r.duplicate_of, r.created_at, r.updated_at, r.deleted_at
"#;

/// Diesel-backed store reading the CRM's board read tables.
pub struct PgBoardStore {
    pool: DbPool,
}

impl PgBoardStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, diesel::result::Error> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| {
                error!("Failed to get database connection: {e}");
                StoreError::Connection(e.to_string())
            })?;
            op(&mut conn).map_err(|e| {
                error!("Board query failed: {e}");
                StoreError::Query(e.to_string())
            })
        })
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?
    }
}

fn attach_details(
    conn: &mut PgConnection,
    records: &mut [BoardRecord],
) -> Result<(), diesel::result::Error> {
    if records.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();

    let consents: Vec<ConsentRow> = diesel::sql_query(
        "SELECT record_id, channel FROM board_record_consents \
         WHERE record_id = ANY($1) AND granted IS TRUE",
    )
    .bind::<Array<DieselUuid>, _>(&ids)
    .load(conn)?;

    let tasks: Vec<TaskRow> = diesel::sql_query(
        "SELECT id, record_id, title, due_at FROM board_record_tasks \
         WHERE record_id = ANY($1) AND completed_at IS NULL \
         ORDER BY due_at ASC NULLS LAST, id ASC",
    )
    .bind::<Array<DieselUuid>, _>(&ids)
    .load(conn)?;

    let index: HashMap<Uuid, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    for row in consents {
        let channel = match row.channel.to_uppercase().as_str() {
            "SMS" => ConsentChannel::Sms,
            "EMAIL" => ConsentChannel::Email,
            _ => continue,
        };
        if let Some(&i) = index.get(&row.record_id) {
            records[i].consents.push(Consent {
                channel,
                granted: true,
            });
        }
    }

    for row in tasks {
        if let Some(&i) = index.get(&row.record_id) {
            records[i].open_tasks.push(OpenTask {
                id: row.id,
                title: row.title,
                due_at: row.due_at,
            });
        }
    }

    Ok(())
}

#[async_trait]
impl BoardStore for PgBoardStore {
    async fn find_pipeline(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
    ) -> Result<Option<Pipeline>, StoreError> {
        self.run(move |conn| {
            let rows: Vec<PipelineRow> = diesel::sql_query(
                "SELECT id, tenant_id, name FROM board_pipelines WHERE id = $1 AND tenant_id = $2",
            )
            .bind::<DieselUuid, _>(pipeline_id)
            .bind::<DieselUuid, _>(tenant_id)
            .load(conn)?;

            let Some(row) = rows.into_iter().next() else {
                return Ok(None);
            };

            let stages: Vec<StageRow> = diesel::sql_query(
                "SELECT id, pipeline_id, tenant_id, name, stage_order, sla_minutes \
                 FROM board_stages WHERE pipeline_id = $1 AND tenant_id = $2 \
                 ORDER BY stage_order ASC",
            )
            .bind::<DieselUuid, _>(pipeline_id)
            .bind::<DieselUuid, _>(tenant_id)
            .load(conn)?;

            Ok(Some(Pipeline {
                id: row.id,
                tenant_id: row.tenant_id,
                name: row.name,
                stages: stages.into_iter().map(Stage::from).collect(),
            }))
        })
        .await
    }

    async fn find_stage(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Option<Stage>, StoreError> {
        self.run(move |conn| {
            let rows: Vec<StageRow> = diesel::sql_query(
                "SELECT id, pipeline_id, tenant_id, name, stage_order, sla_minutes \
                 FROM board_stages WHERE id = $1 AND pipeline_id = $2 AND tenant_id = $3",
            )
            .bind::<DieselUuid, _>(stage_id)
            .bind::<DieselUuid, _>(pipeline_id)
            .bind::<DieselUuid, _>(tenant_id)
            .load(conn)?;
            Ok(rows.into_iter().next().map(Stage::from))
        })
        .await
    }

    async fn find_records(
        &self,
        predicate: &BoardPredicate,
        order: RecordOrder,
        limit: usize,
        after: Option<&CardCursor>,
    ) -> Result<Vec<BoardRecord>, StoreError> {
        let mut w = render_predicate(predicate);
        if let Some(cursor) = after {
            let e = w.push_bind(BindValue::Timestamp(cursor.entered_at));
            let c = w.push_bind(BindValue::Timestamp(cursor.created_at));
            let i = w.push_bind(BindValue::Uuid(cursor.id));
            w.clauses
                .push(format!("({ENTERED}, r.created_at, r.id) > ({e}, {c}, {i})"));
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM board_records r \
             LEFT JOIN board_users u ON u.id = r.owner_id \
             WHERE {} ORDER BY {} LIMIT {limit}",
            w.sql(),
            order_clause(order)
        );

        self.run(move |conn| {
            let rows: Vec<RecordRow> =
                bind_all(diesel::sql_query(sql).into_boxed(), w.binds).load(conn)?;
            let mut records: Vec<BoardRecord> = rows.into_iter().map(BoardRecord::from).collect();
            attach_details(conn, &mut records)?;
            Ok(records)
        })
        .await
    }

    async fn count_records(&self, predicate: &BoardPredicate) -> Result<u64, StoreError> {
        let w = render_predicate(predicate);
        let sql = format!(
            "SELECT COUNT(*) AS count FROM board_records r WHERE {}",
            w.sql()
        );
        self.run(move |conn| {
            let row: CountRow =
                bind_all(diesel::sql_query(sql).into_boxed(), w.binds).get_result(conn)?;
            Ok(u64::try_from(row.count).unwrap_or(0))
        })
        .await
    }

    async fn grouped_counts(
        &self,
        predicate: &BoardPredicate,
    ) -> Result<HashMap<Uuid, u64>, StoreError> {
        let w = render_predicate(predicate);
        let sql = format!(
            "SELECT r.stage_id, COUNT(*) AS count FROM board_records r WHERE {} \
             GROUP BY r.stage_id",
            w.sql()
        );
        self.run(move |conn| {
            let rows: Vec<StageCountRow> =
                bind_all(diesel::sql_query(sql).into_boxed(), w.binds).load(conn)?;
            Ok(rows
                .into_iter()
                .map(|r| (r.stage_id, u64::try_from(r.count).unwrap_or(0)))
                .collect())
        })
        .await
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
        let w = render_predicate(predicate);
        let sql = format!(
            "SELECT DISTINCT ON (r.stage_id) r.stage_id, {ENTERED} AS entered_at \
             FROM board_records r WHERE {} \
             ORDER BY r.stage_id, {}",
            w.sql(),
            order_clause(RecordOrder::StageEntryAsc)
        );
        self.run(move |conn| {
            let rows: Vec<StageOldestRow> =
                bind_all(diesel::sql_query(sql).into_boxed(), w.binds).load(conn)?;
            Ok(rows.into_iter().map(|r| (r.stage_id, r.entered_at)).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::filters::parse_filters;
    use crate::board::predicate::{build_predicate, StageScope};
    use chrono::Duration;

    #[test]
    fn test_base_predicate_sql() {
        let now = Utc::now();
        let predicate = build_predicate(
            Uuid::new_v4(),
            Uuid::new_v4(),
            StageScope::One(Uuid::new_v4()),
            &Default::default(),
            now,
        );
        let w = render_predicate(&predicate);
        assert_eq!(
            w.sql(),
            "r.tenant_id = $1 AND r.pipeline_id = $2 AND r.stage_id = ANY($3) AND r.deleted_at IS NULL"
        );
        assert_eq!(w.binds.len(), 3);
    }

    #[test]
    fn test_overlays_render_in_order() {
        let now = Utc::now();
        let filters = parse_filters(Some(
            r#"{"queueId":"hot","scoreTier":["A","B"],"preapprovedOnly":true,"lastActivityDays":7}"#,
        ));
        let predicate = build_predicate(
            Uuid::new_v4(),
            Uuid::new_v4(),
            StageScope::Many(vec![Uuid::new_v4(), Uuid::new_v4()]),
            &filters,
            now,
        )
        .with_breach(now - Duration::minutes(60));
        let w = render_predicate(&predicate);
        let sql = w.sql();

        assert!(sql.contains("r.score_tier = ANY($4)"));
        assert!(sql.contains("r.preapproved IS TRUE"));
        assert!(sql.contains("r.lead_score >= $5"));
        assert!(sql.contains("COALESCE(r.last_activity_at, COALESCE(r.stage_entered_at, r.created_at)) >= $6"));
        assert!(sql.contains("(r.last_activity_at < $7 OR (r.last_activity_at IS NULL"));
        assert_eq!(w.binds.len(), 7);
        assert_eq!(
            w.binds[3],
            BindValue::Texts(vec!["A".to_string(), "B".to_string()])
        );
    }

    #[test]
    fn test_unassigned_renders_null_owner() {
        let filters = parse_filters(Some(r#"{"queueId":"unassigned"}"#));
        let predicate = build_predicate(
            Uuid::new_v4(),
            Uuid::new_v4(),
            StageScope::One(Uuid::new_v4()),
            &filters,
            Utc::now(),
        );
        assert!(render_predicate(&predicate).sql().contains("r.owner_id IS NULL"));
    }
}
