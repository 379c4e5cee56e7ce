use chrono::NaiveDate;
use serde_json::Value;
use sqlx::{Executor, MySql};

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    Json(Value),
    Null,
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I64(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        SqlValue::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// ===============================
/// Partial UPDATE builder
/// ===============================
///
/// Column names are `&'static str` so only columns named in code can be
/// written; request payloads never choose them.
#[derive(Debug)]
pub struct SqlUpdate {
    table: &'static str,
    sets: Vec<(&'static str, SqlValue)>,
}

impl SqlUpdate {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            sets: Vec::new(),
        }
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) -> &mut Self {
        self.sets.push((column, value.into()));
        self
    }

    /// Sets the column only when a value was supplied.
    pub fn set_some<T: Into<SqlValue>>(&mut self, column: &'static str, value: Option<T>) -> &mut Self {
        if let Some(v) = value {
            self.sets.push((column, v.into()));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn columns(&self) -> Vec<&'static str> {
        self.sets.iter().map(|(c, _)| *c).collect()
    }

    pub fn sql(&self) -> String {
        let set_clause = self
            .sets
            .iter()
            .map(|(k, _)| format!("{} = ?", k))
            .collect::<Vec<_>>()
            .join(", ");
        format!("UPDATE {} SET {} WHERE id = ?", self.table, set_clause)
    }

    /// Runs the update for row `id` and returns the affected row count.
    pub async fn execute<'c, E>(self, id: u64, executor: E) -> Result<u64, sqlx::Error>
    where
        E: Executor<'c, Database = MySql>,
    {
        let sql = self.sql();
        let mut query = sqlx::query(&sql);

        for (_, value) in self.sets {
            query = match value {
                SqlValue::String(v) => query.bind(v),
                SqlValue::I64(v) => query.bind(v),
                SqlValue::U64(v) => query.bind(v),
                SqlValue::F64(v) => query.bind(v),
                SqlValue::Bool(v) => query.bind(v),
                SqlValue::Date(v) => query.bind(v),
                SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
                SqlValue::Null => query.bind(None::<String>),
            };
        }

        let result = query.bind(id).execute(executor).await?;
        Ok(result.rows_affected())
    }
}

/// Escapes `%` and `_` so user input matches literally inside `LIKE`.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_set_clause_in_insertion_order() {
        let mut update = SqlUpdate::new("employees");
        update
            .set("name", "Budi")
            .set_some("daily_wage", Some(150_000.0))
            .set_some::<String>("nik", None)
            .set("active", true);

        assert_eq!(
            update.sql(),
            "UPDATE employees SET name = ?, daily_wage = ?, active = ? WHERE id = ?"
        );
        assert_eq!(update.columns(), vec!["name", "daily_wage", "active"]);
    }

    #[test]
    fn empty_update_is_reported() {
        let mut update = SqlUpdate::new("buyers");
        update.set_some::<f64>("default_price_per_ton", None);
        assert!(update.is_empty());
    }

    #[test]
    fn option_values_become_null() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(3_u64)), SqlValue::U64(3));
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" budi "), "%budi%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
