// SQL query constants for repositories
// Centralizes repeated SELECT column lists

/// SQL query fragments for tasks table
pub mod task_queries {
    /// All columns for tasks, in `Task` field order
    pub const SELECT_ALL_COLUMNS: &str = r#"id, name, description, kind, cron_expr,
        deadline_time, advance_minutes, group_id, creator_id, status,
        created_at, updated_at, last_run_at, next_run_at"#;
}

/// SQL query fragments for completion_records table
pub mod completion_queries {
    pub const SELECT_ALL_COLUMNS: &str =
        "task_id, person_id, person_name, day, on_time, completed_at";
}

/// SQL query fragments for group_members table
pub mod roster_queries {
    /// Role whose holders oversee a group and are never reminded
    pub const EXEMPT_ROLE: &str = "super_admin";
}
