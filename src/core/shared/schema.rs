diesel::table! {
    board_views (id) {
        id -> Uuid,
        pipeline_id -> Uuid,
        name -> Text,
        filters -> Jsonb,
        is_default -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
