use diesel::r2d2::{ConnectionManager, Pool};
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use log::info;

use crate::board::migration::create_board_tables_migration;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str, pool_size: u32) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().max_size(pool_size.max(1)).build(manager)
}

/// Applies the board DDL. Every statement is idempotent.
pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut conn = pool.get()?;
    conn.batch_execute(create_board_tables_migration())?;
    info!("Board tables are up to date");
    Ok(())
}
