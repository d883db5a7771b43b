//! Source row to staging row conversion.
//!
//! The staging layout is the mapping's distinct active destination columns
//! in declaration order, followed by any synthetic columns a table profile
//! adds. Several active column mappings may feed the same destination
//! column; their rendered outputs are concatenated in declaration order.

use uuid::Uuid;

use crate::core::mapping::{ColumnMapping, Mapping, ScriptType};
use crate::core::row::SourceRow;
use crate::core::schema::{Column, TypeFamily};
use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{Result, SyncError};

/// One staging column and the column mappings that produce it.
#[derive(Debug, Clone)]
struct Slot {
    column: Column,
    sources: Vec<ColumnMapping>,
}

/// Applies a mapping's column scripts to source rows.
#[derive(Debug, Clone)]
pub struct RowTransformer {
    table: String,
    slots: Vec<Slot>,
}

impl RowTransformer {
    /// Build the transformer for `mapping`, appending `synthetic` columns that
    /// are staged as NULL.
    pub fn new(mapping: &Mapping, synthetic: &[Column]) -> Self {
        let mut slots: Vec<Slot> = Vec::new();
        for cm in mapping.active_columns() {
            match slots
                .iter_mut()
                .find(|s| s.column.name.eq_ignore_ascii_case(cm.destination_name()))
            {
                Some(slot) => slot.sources.push(cm.clone()),
                None => slots.push(Slot {
                    column: cm.destination.clone(),
                    sources: vec![cm.clone()],
                }),
            }
        }
        for column in synthetic {
            if !slots.iter().any(|s| s.column.name.eq_ignore_ascii_case(&column.name)) {
                slots.push(Slot {
                    column: column.clone(),
                    sources: Vec::new(),
                });
            }
        }

        Self {
            table: mapping.destination_table.full_name(),
            slots,
        }
    }

    /// Staging columns, in row order.
    pub fn columns(&self) -> Vec<Column> {
        self.slots.iter().map(|s| s.column.clone()).collect()
    }

    /// Produce one staging row.
    pub fn transform(&self, row: &SourceRow) -> Result<Vec<SqlValue>> {
        let mut out = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let value = match slot.sources.as_slice() {
                [] => SqlValue::Null(SqlNullType::for_column(&slot.column)),
                [single] => self.compute(single, row)?,
                many => {
                    let mut joined = String::new();
                    for cm in many {
                        joined.push_str(&self.compute(cm, row)?.render());
                    }
                    SqlValue::String(joined).coerce(&slot.column)
                }
            };
            out.push(value);
        }
        Ok(out)
    }

    /// Key used to recognise duplicate rows. Generated GUIDs differ on every
    /// row and would defeat the comparison, so they are left out.
    pub fn duplicate_key(&self, values: &[SqlValue]) -> String {
        let mut key = String::new();
        for (slot, value) in self.slots.iter().zip(values) {
            if slot.sources.is_empty()
                || slot.sources.iter().any(|cm| cm.script == ScriptType::NewGuid)
            {
                continue;
            }
            if value.is_null() {
                key.push('\u{0}');
            } else {
                key.push_str(&value.render());
            }
            key.push('\u{1f}');
        }
        key
    }

    fn compute(&self, cm: &ColumnMapping, row: &SourceRow) -> Result<SqlValue> {
        let source_value = cm.source.as_ref().and_then(|s| row.get(&s.name));
        if source_value.is_none() && !cm.has_script_with_value() {
            return Err(SyncError::MissingSourceValue {
                table: self.table.clone(),
                column: cm
                    .source
                    .as_ref()
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| cm.destination.name.clone()),
                row: row.to_string(),
            });
        }

        let destination = &cm.destination;
        let rendered = || source_value.map(SqlValue::render).unwrap_or_default();

        let value = match cm.script {
            ScriptType::None => source_value
                .cloned()
                .unwrap_or(SqlValue::Null(SqlNullType::for_column(destination)))
                .coerce(destination),
            ScriptType::Append => {
                SqlValue::String(format!("{}{}", rendered(), cm.script_literal())).coerce(destination)
            }
            ScriptType::Prepend => {
                SqlValue::String(format!("{}{}", cm.script_literal(), rendered())).coerce(destination)
            }
            ScriptType::Constant => SqlValue::String(cm.script_literal().to_string()).coerce(destination),
            ScriptType::NewGuid => {
                let id = Uuid::new_v4();
                if destination.family() == TypeFamily::Guid {
                    SqlValue::Uuid(id)
                } else {
                    SqlValue::String(id.to_string())
                }
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::Table;

    fn text(name: &str) -> Column {
        Column::new(name, "nvarchar").with_length(200)
    }

    fn mapping(columns: Vec<ColumnMapping>) -> Mapping {
        let mut m = Mapping::new(3, Table::new("dbo", "Src"), Table::new("dbo", "Dst"));
        m.column_mappings = columns;
        m
    }

    #[test]
    fn test_scripts_produce_expected_values() {
        let m = mapping(vec![
            ColumnMapping::new(Some(Column::new("Id", "int")), Column::new("Id", "bigint")),
            ColumnMapping::new(Some(text("Name")), text("Name")).scripted(ScriptType::Append, Some("-x")),
            ColumnMapping::new(Some(text("Code")), text("Code")).scripted(ScriptType::Prepend, Some("P:")),
            ColumnMapping::new(None, Column::new("Weight", "int")).scripted(ScriptType::Constant, Some("12")),
            ColumnMapping::new(None, Column::new("RowGuid", "uniqueidentifier")).scripted(ScriptType::NewGuid, None),
        ]);
        let t = RowTransformer::new(&m, &[]);
        let row = SourceRow::new().with("Id", 7).with("name", "Bolt").with("Code", "A1");
        let values = t.transform(&row).unwrap();

        assert_eq!(values[0], SqlValue::I64(7));
        assert_eq!(values[1], SqlValue::from("Bolt-x"));
        assert_eq!(values[2], SqlValue::from("P:A1"));
        assert_eq!(values[3], SqlValue::I64(12));
        assert!(matches!(values[4], SqlValue::Uuid(_)));
    }

    #[test]
    fn test_new_guid_is_fresh_per_row() {
        let m = mapping(vec![
            ColumnMapping::new(None, text("Ref")).scripted(ScriptType::NewGuid, None),
        ]);
        let t = RowTransformer::new(&m, &[]);
        let a = t.transform(&SourceRow::new()).unwrap();
        let b = t.transform(&SourceRow::new()).unwrap();
        assert_ne!(a, b);
        assert!(matches!(a[0], SqlValue::String(_)));
    }

    #[test]
    fn test_shared_destination_concatenates_in_order() {
        let m = mapping(vec![
            ColumnMapping::new(Some(text("First")), text("FullName")),
            ColumnMapping::new(None, text("FullName")).scripted(ScriptType::Constant, Some(" ")),
            ColumnMapping::new(Some(text("Last")), text("FullName")),
        ]);
        let t = RowTransformer::new(&m, &[]);
        assert_eq!(t.columns().len(), 1);
        let row = SourceRow::new().with("First", "Ada").with("Last", "Lovelace");
        assert_eq!(t.transform(&row).unwrap(), vec![SqlValue::from("Ada Lovelace")]);
    }

    #[test]
    fn test_missing_source_column_is_an_error() {
        let m = mapping(vec![ColumnMapping::new(Some(text("Name")), text("Name"))]);
        let t = RowTransformer::new(&m, &[]);
        let err = t.transform(&SourceRow::new().with("Other", "x")).unwrap_err();
        match err {
            SyncError::MissingSourceValue { table, column, row } => {
                assert_eq!(table, "dbo.Dst");
                assert_eq!(column, "Name");
                assert!(row.contains("Other"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_script_with_value_does_not_need_source() {
        let m = mapping(vec![
            ColumnMapping::new(Some(text("Name")), text("Name")).scripted(ScriptType::Append, Some("!")),
        ]);
        let t = RowTransformer::new(&m, &[]);
        assert_eq!(t.transform(&SourceRow::new()).unwrap(), vec![SqlValue::from("!")]);
    }

    #[test]
    fn test_null_source_value_is_typed_null() {
        let m = mapping(vec![ColumnMapping::new(Some(Column::new("Qty", "int")), Column::new("Qty", "int"))]);
        let t = RowTransformer::new(&m, &[]);
        let mut row = SourceRow::new();
        row.insert("Qty", SqlValue::Null(SqlNullType::String));
        assert_eq!(t.transform(&row).unwrap(), vec![SqlValue::Null(SqlNullType::I64)]);
    }

    #[test]
    fn test_synthetic_columns_are_null_and_skip_existing() {
        let m = mapping(vec![ColumnMapping::new(Some(text("Name")), text("Name"))]);
        let t = RowTransformer::new(&m, &[Column::new("Extra", "int"), text("name")]);
        assert_eq!(t.columns().len(), 2);
        let values = t.transform(&SourceRow::new().with("Name", "a")).unwrap();
        assert_eq!(values[1], SqlValue::Null(SqlNullType::I64));
    }

    #[test]
    fn test_duplicate_key_ignores_generated_guids() {
        let m = mapping(vec![
            ColumnMapping::new(Some(text("Name")), text("Name")),
            ColumnMapping::new(None, Column::new("RowGuid", "uniqueidentifier")).scripted(ScriptType::NewGuid, None),
        ]);
        let t = RowTransformer::new(&m, &[]);
        let row = SourceRow::new().with("Name", "a");
        let a = t.transform(&row).unwrap();
        let b = t.transform(&row).unwrap();
        assert_eq!(t.duplicate_key(&a), t.duplicate_key(&b));

        let mut nulled = SourceRow::new();
        nulled.insert("Name", SqlValue::Null(SqlNullType::String));
        let empty = SourceRow::new().with("Name", "");
        assert_ne!(
            t.duplicate_key(&t.transform(&nulled).unwrap()),
            t.duplicate_key(&t.transform(&empty).unwrap())
        );
    }
}
