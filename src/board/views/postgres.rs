use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::error;
use uuid::Uuid;

use super::{ViewStore, ViewStoreError};
use crate::board::store::StoreError;
use crate::board::types::{BoardView, CreateViewRequest, UpdateViewRequest};
use crate::core::shared::schema::board_views;
use crate::core::shared::utils::DbPool;

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = board_views)]
struct DbBoardView {
    id: Uuid,
    pipeline_id: Uuid,
    name: String,
    filters: serde_json::Value,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbBoardView> for BoardView {
    fn from(db: DbBoardView) -> Self {
        Self {
            id: db.id,
            pipeline_id: db.pipeline_id,
            name: db.name,
            filters: db.filters,
            is_default: db.is_default,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = board_views)]
struct ViewChanges {
    name: Option<String>,
    filters: Option<serde_json::Value>,
    is_default: Option<bool>,
    updated_at: DateTime<Utc>,
}

/// Durable view store. Clearing the previous default and setting the new one
/// happen in one transaction; the partial unique index
/// `board_views_one_default` rejects any interleaving that would leave two.
pub struct PgViewStore {
    pool: DbPool,
}

impl PgViewStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, ViewStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, ViewStoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| {
                error!("Failed to get database connection: {e}");
                StoreError::Connection(e.to_string())
            })?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?
    }
}

fn query_error(e: diesel::result::Error) -> ViewStoreError {
    use diesel::result::{DatabaseErrorKind, Error};
    match e {
        Error::NotFound => ViewStoreError::NotFound,
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            StoreError::Constraint(info.message().to_string()).into()
        }
        other => {
            error!("Board view query failed: {other}");
            StoreError::Query(other.to_string()).into()
        }
    }
}

fn clear_default(
    conn: &mut PgConnection,
    pipeline: Uuid,
    except: Uuid,
    now: DateTime<Utc>,
) -> QueryResult<usize> {
    diesel::update(
        board_views::table
            .filter(board_views::pipeline_id.eq(pipeline))
            .filter(board_views::id.ne(except))
            .filter(board_views::is_default.eq(true)),
    )
    .set((
        board_views::is_default.eq(false),
        board_views::updated_at.eq(now),
    ))
    .execute(conn)
}

#[async_trait]
impl ViewStore for PgViewStore {
    async fn list(&self, pipeline_id: Uuid) -> Result<Vec<BoardView>, ViewStoreError> {
        self.run(move |conn| {
            let rows: Vec<DbBoardView> = board_views::table
                .filter(board_views::pipeline_id.eq(pipeline_id))
                .order((board_views::created_at.asc(), board_views::id.asc()))
                .select(DbBoardView::as_select())
                .load(conn)
                .map_err(query_error)?;
            Ok(rows.into_iter().map(BoardView::from).collect())
        })
        .await
    }

    async fn create(
        &self,
        pipeline_id: Uuid,
        request: CreateViewRequest,
    ) -> Result<BoardView, ViewStoreError> {
        self.run(move |conn| {
            let now = Utc::now();
            let row = DbBoardView {
                id: Uuid::new_v4(),
                pipeline_id,
                name: request.name,
                filters: request.filters,
                is_default: request.is_default,
                created_at: now,
                updated_at: now,
            };
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                if row.is_default {
                    clear_default(conn, pipeline_id, row.id, now)?;
                }
                diesel::insert_into(board_views::table)
                    .values(&row)
                    .execute(conn)
            })
            .map_err(query_error)?;
            Ok(BoardView::from(row))
        })
        .await
    }

    async fn update(
        &self,
        pipeline_id: Uuid,
        view_id: Uuid,
        request: UpdateViewRequest,
    ) -> Result<BoardView, ViewStoreError> {
        self.run(move |conn| {
            let now = Utc::now();
            let changes = ViewChanges {
                name: request.name,
                filters: request.filters,
                is_default: request.is_default,
                updated_at: now,
            };
            let row: DbBoardView = conn
                .transaction::<_, diesel::result::Error, _>(|conn| {
                    // Lock the target first so a missing view fails before any
                    // default is cleared.
                    board_views::table
                        .filter(board_views::pipeline_id.eq(pipeline_id))
                        .filter(board_views::id.eq(view_id))
                        .select(DbBoardView::as_select())
                        .for_update()
                        .get_result::<DbBoardView>(conn)?;

                    if changes.is_default == Some(true) {
                        clear_default(conn, pipeline_id, view_id, now)?;
                    }
                    diesel::update(
                        board_views::table
                            .filter(board_views::pipeline_id.eq(pipeline_id))
                            .filter(board_views::id.eq(view_id)),
                    )
                    .set(&changes)
                    .returning(DbBoardView::as_returning())
                    .get_result(conn)
                })
                .map_err(query_error)?;
            Ok(BoardView::from(row))
        })
        .await
    }

    async fn delete(&self, pipeline_id: Uuid, view_id: Uuid) -> Result<(), ViewStoreError> {
        self.run(move |conn| {
            diesel::delete(
                board_views::table
                    .filter(board_views::pipeline_id.eq(pipeline_id))
                    .filter(board_views::id.eq(view_id)),
            )
            .execute(conn)
            .map_err(query_error)?;
            Ok(())
        })
        .await
    }
}
