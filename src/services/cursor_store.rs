use chrono::Utc;
use sea_orm::{sea_query::OnConflict, ConnectionTrait, EntityTrait, Set};
use tracing::debug;

use crate::entities::sync_cursor;
use crate::errors::ServiceError;

/// Cursor kind of the standalone components reserved-amount sweep.
pub const RESERVED_AMOUNTS_KIND: &str = "reservedamounts";
/// Cursor kind of the standalone BOM-recipe reserved-amount sweep.
pub const BOM_RESERVED_AMOUNTS_KIND: &str = "bom_reservedamounts";

/// Reads the resumption point of `kind`; a kind never written starts at 0.
pub async fn load<C: ConnectionTrait>(db: &C, kind: &str) -> Result<i64, ServiceError> {
    let row = sync_cursor::Entity::find_by_id(kind.to_string())
        .one(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(row.map(|r| r.next_offset).unwrap_or(0))
}

/// Persists the resumption point of `kind`.
pub async fn store<C: ConnectionTrait>(db: &C, kind: &str, next_offset: i64) -> Result<(), ServiceError> {
    let model = sync_cursor::ActiveModel {
        kind: Set(kind.to_string()),
        next_offset: Set(next_offset),
        updated_at: Set(Utc::now()),
    };

    sync_cursor::Entity::insert(model)
        .on_conflict(
            OnConflict::column(sync_cursor::Column::Kind)
                .update_columns([sync_cursor::Column::NextOffset, sync_cursor::Column::UpdatedAt])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await
        .map_err(ServiceError::db_error)?;

    debug!(kind, next_offset, "Stored sync cursor");
    Ok(())
}

/// Starts the next sweep of `kind` from the beginning.
pub async fn reset<C: ConnectionTrait>(db: &C, kind: &str) -> Result<(), ServiceError> {
    store(db, kind, 0).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};

    #[tokio::test]
    async fn cursor_round_trips_and_resets() {
        let db = establish_connection_with_config(&DbConfig::sqlite_memory())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();

        assert_eq!(load(&db, RESERVED_AMOUNTS_KIND).await.unwrap(), 0);

        store(&db, RESERVED_AMOUNTS_KIND, 17).await.unwrap();
        store(&db, RESERVED_AMOUNTS_KIND, 42).await.unwrap();
        assert_eq!(load(&db, RESERVED_AMOUNTS_KIND).await.unwrap(), 42);
        assert_eq!(load(&db, BOM_RESERVED_AMOUNTS_KIND).await.unwrap(), 0);

        reset(&db, RESERVED_AMOUNTS_KIND).await.unwrap();
        assert_eq!(load(&db, RESERVED_AMOUNTS_KIND).await.unwrap(), 0);
    }
}
