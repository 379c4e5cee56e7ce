use serde_json::Value;
use sqlx::{Executor, MySql};

use crate::model::audit_log::AuditAction;

/// Appends one audit row. Meant to run on the same transaction as the write it records.
pub async fn record<'c, E>(
    executor: E,
    action: AuditAction,
    table: &'static str,
    record_id: u64,
    old_values: Option<Value>,
    new_values: Option<Value>,
    user_id: u64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = MySql>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_logs (action, table_name, record_id, old_values, new_values, user_id)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(action.as_ref())
    .bind(table)
    .bind(record_id)
    .bind(old_values.map(sqlx::types::Json))
    .bind(new_values.map(sqlx::types::Json))
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(())
}
