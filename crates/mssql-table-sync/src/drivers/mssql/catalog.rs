//! Column metadata from `sys.columns`.

use tracing::debug;

use crate::core::identifier::qualify;
use crate::core::schema::{Column, Table};
use crate::core::traits::Connection;
use crate::core::value::SqlValue;
use crate::error::{Result, SyncError};

const COLUMNS_SQL: &str = "SELECT c.name, TYPE_NAME(c.system_type_id), \
     CAST(c.max_length AS int), CAST(c.precision AS int), CAST(c.scale AS int), \
     c.is_nullable, c.is_identity, \
     CAST(CASE WHEN EXISTS (SELECT 1 FROM sys.index_columns ic \
         JOIN sys.indexes i ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
         WHERE i.is_primary_key = 1 AND ic.object_id = c.object_id AND ic.column_id = c.column_id) \
     THEN 1 ELSE 0 END AS bit), \
     c.column_id \
     FROM sys.columns c \
     WHERE c.object_id = OBJECT_ID(@P1) \
     ORDER BY c.column_id";

fn int_at(row: &[SqlValue], i: usize) -> i32 {
    row.get(i)
        .and_then(SqlValue::to_i64)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0)
}

fn flag_at(row: &[SqlValue], i: usize) -> bool {
    row.get(i).and_then(SqlValue::to_bool).unwrap_or(false)
}

fn column_from_row(row: &[SqlValue]) -> Option<Column> {
    let name = row.first().filter(|v| !v.is_null())?.render();
    let data_type = row.get(1).map(SqlValue::render).unwrap_or_default();
    Some(Column {
        name,
        data_type,
        max_length: int_at(row, 2),
        precision: int_at(row, 3),
        scale: int_at(row, 4),
        is_nullable: flag_at(row, 5),
        is_identity: flag_at(row, 6),
        is_primary_key: flag_at(row, 7),
        is_virtual: false,
        ordinal_pos: int_at(row, 8),
    })
}

/// Load a table's columns in ordinal order.
///
/// A table that does not exist (or has no visible columns) is a
/// configuration error.
pub async fn load_table(conn: &mut dyn Connection, schema: &str, table: &str) -> Result<Table> {
    let rows = conn
        .query(COLUMNS_SQL, &[SqlValue::String(qualify(schema, table))])
        .await?;

    let mut result = Table::new(schema, table);
    result.columns = rows.iter().filter_map(|r| column_from_row(r)).collect();

    if result.columns.is_empty() {
        return Err(SyncError::Config(format!(
            "table {} was not found or has no columns",
            result.full_name()
        )));
    }
    debug!(
        "Loaded {} columns for {}",
        result.columns.len(),
        result.full_name()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingConnection;

    fn catalog_row(name: &str, ty: &str, len: i32, nullable: bool, identity: bool, pk: bool, id: i32) -> Vec<SqlValue> {
        vec![
            SqlValue::from(name),
            SqlValue::from(ty),
            SqlValue::I32(len),
            SqlValue::I32(0),
            SqlValue::I32(0),
            SqlValue::Bool(nullable),
            SqlValue::Bool(identity),
            SqlValue::Bool(pk),
            SqlValue::I32(id),
        ]
    }

    #[tokio::test]
    async fn test_load_table_reads_columns() {
        let mut conn = RecordingConnection::new();
        conn.respond(
            "sys.columns",
            vec![
                catalog_row("OrderID", "int", 4, false, true, true, 1),
                catalog_row("Name", "nvarchar", 200, true, false, false, 2),
            ],
        );

        let table = load_table(&mut conn, "dbo", "Orders").await.unwrap();
        assert_eq!(table.qualified(), "[dbo].[Orders]");
        assert_eq!(table.columns.len(), 2);
        assert!(table.columns[0].is_primary_key && table.columns[0].is_identity);
        assert!(!table.columns[0].is_nullable);
        assert_eq!(table.columns[1].sql_type(), "nvarchar(100)");
        assert_eq!(table.columns[1].ordinal_pos, 2);

        let (_, params) = &conn.statements[0];
        assert_eq!(params, &vec![SqlValue::from("[dbo].[Orders]")]);
    }

    #[tokio::test]
    async fn test_missing_table_is_config_error() {
        let mut conn = RecordingConnection::new();
        let err = load_table(&mut conn, "dbo", "Nope").await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("dbo.Nope"));
    }
}
