// Group roster repository implementation

use super::queries::roster_queries;
use crate::db::DbPool;
use crate::errors::{DatabaseError, StorageError};
use crate::models::{GroupId, PersonId};
use crate::store::RosterDirectory;
use async_trait::async_trait;
use tracing::instrument;

/// Reads group membership mirrored from the chat platform
pub struct RosterRepository {
    pool: DbPool,
}

impl RosterRepository {
    /// Create a new RosterRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or update one member's role in a group
    #[instrument(skip(self))]
    pub async fn upsert_member(
        &self,
        group_id: &str,
        person_id: &str,
        role: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, person_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, person_id) DO UPDATE SET role = EXCLUDED.role
            "#,
        )
        .bind(group_id)
        .bind(person_id)
        .bind(role)
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RosterDirectory for RosterRepository {
    #[instrument(skip(self))]
    async fn non_exempt_members(&self, group_id: &GroupId) -> Result<Vec<PersonId>, StorageError> {
        let members: Vec<String> = sqlx::query_scalar(
            "SELECT person_id FROM group_members WHERE group_id = $1 AND role <> $2 ORDER BY person_id",
        )
        .bind(group_id)
        .bind(roster_queries::EXEMPT_ROLE)
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(members)
    }
}
