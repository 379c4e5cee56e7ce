use chrono::NaiveDateTime;
use serde::Deserialize;
use sqlx::MySqlPool;
use utoipa::IntoParams;

use crate::error::ApiError;

/// How a table marks rows as removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `deleted_at` timestamp, NULL while the row is live.
    DeletedAt,
    /// `active` flag, FALSE once removed.
    ActiveFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deleted {
    Soft,
    Hard,
}

impl Deleted {
    pub fn message(&self, what: &str) -> String {
        match self {
            Deleted::Soft => format!("{what} deleted"),
            Deleted::Hard => format!("{what} permanently deleted"),
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteQuery {
    /// Remove the row instead of marking it deleted.
    #[serde(default)]
    pub force: bool,
}

/// `Some(true)` when the row exists and is already removed, `None` when it does not exist.
async fn removed_state(
    pool: &MySqlPool,
    table: &'static str,
    marker: Marker,
    id: u64,
) -> Result<Option<bool>, sqlx::Error> {
    match marker {
        Marker::DeletedAt => {
            let sql = format!("SELECT deleted_at FROM {table} WHERE id = ?");
            let row: Option<Option<NaiveDateTime>> = sqlx::query_scalar(&sql)
                .bind(id)
                .fetch_optional(pool)
                .await?;
            Ok(row.map(|deleted_at| deleted_at.is_some()))
        }
        Marker::ActiveFlag => {
            let sql = format!("SELECT active FROM {table} WHERE id = ?");
            let row: Option<bool> = sqlx::query_scalar(&sql)
                .bind(id)
                .fetch_optional(pool)
                .await?;
            Ok(row.map(|active| !active))
        }
    }
}

/// Soft deletes row `id`, or removes it when `force` is set.
///
/// Callers check role and table-specific preconditions before calling.
pub async fn delete_row(
    pool: &MySqlPool,
    table: &'static str,
    marker: Marker,
    id: u64,
    force: bool,
    what: &str,
) -> Result<Deleted, ApiError> {
    let removed = removed_state(pool, table, marker, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{what} not found")))?;

    if force {
        let sql = format!("DELETE FROM {table} WHERE id = ?");
        sqlx::query(&sql).bind(id).execute(pool).await?;
        return Ok(Deleted::Hard);
    }

    if removed {
        return Err(ApiError::bad_request(format!("{what} is already deleted")));
    }

    let sql = match marker {
        Marker::DeletedAt => format!("UPDATE {table} SET deleted_at = NOW() WHERE id = ?"),
        Marker::ActiveFlag => format!("UPDATE {table} SET active = FALSE WHERE id = ?"),
    };
    sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(Deleted::Soft)
}

/// Clears `deleted_at` of a soft-deleted row.
pub async fn restore_row(
    pool: &MySqlPool,
    table: &'static str,
    id: u64,
    what: &str,
) -> Result<(), ApiError> {
    let removed = removed_state(pool, table, Marker::DeletedAt, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{what} not found")))?;

    if !removed {
        return Err(ApiError::bad_request(format!("{what} is not deleted")));
    }

    let sql = format!("UPDATE {table} SET deleted_at = NULL WHERE id = ?");
    sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(Deleted::Soft.message("Buyer"), "Buyer deleted");
        assert_eq!(Deleted::Hard.message("Buyer"), "Buyer permanently deleted");
    }

    #[test]
    fn force_defaults_to_false() {
        let q: DeleteQuery = serde_json::from_str("{}").unwrap();
        assert!(!q.force);
    }
}
