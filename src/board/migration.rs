/// DDL for the tables the board reads and the `board_views` table it owns.
///
/// Pipelines, stages, records, owners, consents and tasks are written by other
/// services; the statements here only describe the shape `PgBoardStore`
/// expects and are safe to run against an existing schema.
pub fn create_board_tables_migration() -> &'static str {
    r#"
    CREATE TABLE IF NOT EXISTS board_pipelines (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS board_stages (
        id UUID PRIMARY KEY,
        pipeline_id UUID NOT NULL REFERENCES board_pipelines(id) ON DELETE CASCADE,
        tenant_id UUID NOT NULL,
        name TEXT NOT NULL,
        stage_order INTEGER NOT NULL DEFAULT 0,
        sla_minutes INTEGER CHECK (sla_minutes IS NULL OR sla_minutes >= 0)
    );

    CREATE TABLE IF NOT EXISTS board_users (
        id UUID PRIMARY KEY,
        first_name TEXT,
        last_name TEXT,
        email TEXT
    );

    CREATE TABLE IF NOT EXISTS board_records (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        pipeline_id UUID NOT NULL REFERENCES board_pipelines(id) ON DELETE CASCADE,
        stage_id UUID NOT NULL REFERENCES board_stages(id),
        contact_id UUID,
        first_name TEXT,
        last_name TEXT,
        email TEXT,
        phone TEXT,
        stage_entered_at TIMESTAMPTZ,
        last_activity_at TIMESTAMPTZ,
        owner_id UUID REFERENCES board_users(id),
        lead_score DOUBLE PRECISION,
        score_tier TEXT,
        preapproved BOOLEAN,
        last_touchpoint_at TIMESTAMPTZ,
        last_reply_at TIMESTAMPTZ,
        duplicate_of UUID,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        deleted_at TIMESTAMPTZ
    );

    CREATE INDEX IF NOT EXISTS idx_board_records_stage_entry
        ON board_records(tenant_id, pipeline_id, stage_id,
                         (COALESCE(stage_entered_at, created_at)), created_at, id)
        WHERE deleted_at IS NULL;
    CREATE INDEX IF NOT EXISTS idx_board_records_owner
        ON board_records(tenant_id, pipeline_id, owner_id)
        WHERE deleted_at IS NULL;

    CREATE TABLE IF NOT EXISTS board_record_consents (
        record_id UUID NOT NULL REFERENCES board_records(id) ON DELETE CASCADE,
        channel TEXT NOT NULL,
        granted BOOLEAN NOT NULL DEFAULT FALSE,
        PRIMARY KEY (record_id, channel)
    );

    CREATE TABLE IF NOT EXISTS board_record_tasks (
        id UUID PRIMARY KEY,
        record_id UUID NOT NULL REFERENCES board_records(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        due_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ
    );

    CREATE INDEX IF NOT EXISTS idx_board_record_tasks_open
        ON board_record_tasks(record_id, due_at)
        WHERE completed_at IS NULL;

    CREATE TABLE IF NOT EXISTS board_views (
        id UUID PRIMARY KEY,
        pipeline_id UUID NOT NULL REFERENCES board_pipelines(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        filters JSONB NOT NULL DEFAULT '{}',
        is_default BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_board_views_pipeline
        ON board_views(pipeline_id, created_at);
    CREATE UNIQUE INDEX IF NOT EXISTS board_views_one_default
        ON board_views(pipeline_id) WHERE is_default;
    "#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_default_is_enforced_by_index() {
        let ddl = create_board_tables_migration();
        assert!(ddl.contains("CREATE UNIQUE INDEX IF NOT EXISTS board_views_one_default"));
        assert!(ddl.contains("WHERE is_default"));
    }
}
