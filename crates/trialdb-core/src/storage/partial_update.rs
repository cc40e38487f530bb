//! Partial updates that touch only the columns a caller marked as changed.
//!
//! Trackers mutate an in-memory copy of a row, mark each changed column with
//! [`PartialUpdate::touch`], and record what they observed before the change
//! with the `guard_*` methods. The resulting statement writes exactly the
//! touched columns and only matches the row if it still looks the way the
//! tracker read it, so a concurrent writer makes the update miss instead of
//! being silently overwritten.

use rusqlite::types::Value;
use rusqlite::{Connection, ToSql};
use tracing::debug;

use crate::storage::database::execute_exactly;
use crate::storage::error::StorageResult;

/// Maps column names of a row type to their current values.
pub trait UpdateColumns {
    /// Returns the value to write for `column`.
    ///
    /// Called only for touched columns and the key columns of the update.
    fn column_value(&self, column: &str) -> StorageResult<Value>;
}

/// A condition the stored row must still satisfy for the update to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// The column still holds the observed value.
    Equals { column: &'static str, value: Value },
    /// The column is still unset.
    IsNull { column: &'static str },
}

/// Builder for an `UPDATE` that writes only changed columns.
#[derive(Debug, Clone)]
pub struct PartialUpdate {
    table: &'static str,
    touched: Vec<&'static str>,
    guards: Vec<Guard>,
}

impl PartialUpdate {
    pub fn new(table: &'static str) -> Self {
        Self { table, touched: Vec::new(), guards: Vec::new() }
    }

    /// Marks `column` as changed. Marking twice has no further effect.
    pub fn touch(&mut self, column: &'static str) -> &mut Self {
        if !self.touched.contains(&column) {
            self.touched.push(column);
        }
        self
    }

    /// Requires `column` to still equal `value` when the update runs.
    pub fn guard_equals(&mut self, column: &'static str, value: impl Into<Value>) -> &mut Self {
        self.guards.push(Guard::Equals { column, value: value.into() });
        self
    }

    /// Requires `column` to still be NULL when the update runs.
    pub fn guard_null(&mut self, column: &'static str) -> &mut Self {
        self.guards.push(Guard::IsNull { column });
        self
    }

    /// Columns that will be written, in the order they were touched.
    pub fn touched(&self) -> &[&'static str] {
        &self.touched
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    /// Renders the statement for rows addressed by `key_columns`.
    pub fn to_sql(&self, key_columns: &[&str]) -> String {
        let set = self
            .touched
            .iter()
            .map(|c| format!("{c} = :{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut conditions: Vec<String> =
            key_columns.iter().map(|c| format!("{c} = :key_{c}")).collect();
        conditions.extend(self.guards.iter().map(|guard| match guard {
            Guard::Equals { column, .. } => format!("{column} = :was_{column}"),
            Guard::IsNull { column } => format!("{column} IS NULL"),
        }));
        format!("UPDATE {} SET {} WHERE {}", self.table, set, conditions.join(" AND "))
    }

    /// Writes the touched columns of `row`, requiring exactly one row to match.
    ///
    /// An empty update writes nothing and succeeds.
    ///
    /// # Errors
    /// * `StorageError::RowCount` - If the key and guards matched zero or several rows
    pub fn execute<R: UpdateColumns>(
        &self,
        conn: &Connection,
        row: &R,
        key_columns: &[&str],
    ) -> StorageResult<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut values: Vec<(String, Value)> = Vec::new();
        for column in &self.touched {
            values.push((format!(":{column}"), row.column_value(column)?));
        }
        for column in key_columns {
            values.push((format!(":key_{column}"), row.column_value(column)?));
        }
        for guard in &self.guards {
            if let Guard::Equals { column, value } = guard {
                values.push((format!(":was_{column}"), value.clone()));
            }
        }

        let params: Vec<(&str, &dyn ToSql)> =
            values.iter().map(|(name, value)| (name.as_str(), value as &dyn ToSql)).collect();
        let sql = self.to_sql(key_columns);
        debug!(table = self.table, columns = ?self.touched, "Applying partial update");
        execute_exactly(conn, &sql, &params, 1)
    }
}
