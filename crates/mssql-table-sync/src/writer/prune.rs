//! Chunked deletes of destination rows measured against the staging table.

use tracing::debug;

use crate::core::identifier::{qualify, quote_ident};
use crate::core::mapping::Mapping;
use crate::core::traits::Connection;
use crate::core::value::SqlValue;
use crate::error::{PruneDirection, Result};
use crate::profile::RelationTable;
use crate::sql::{ClauseList, PredicateCompiler};

use super::staging::StagingTable;

/// Rows deleted per statement.
pub const PRUNE_CHUNK_SIZE: u64 = 100_000;

/// A delete statement and its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// NULL-safe key comparison between destination and staging rows.
fn null_safe_match(mapping: &Mapping, staging: &StagingTable) -> Option<String> {
    let dest = mapping.destination_table.qualified();
    let clauses: ClauseList = mapping
        .key_columns()
        .iter()
        .map(|cm| {
            let d = format!("{}.{}", dest, quote_ident(cm.destination_name()));
            let s = staging.column_ref(cm.destination_name());
            format!("({d} = {s} OR ({d} IS NULL AND {s} IS NULL))")
        })
        .collect();
    (!clauses.is_empty()).then(|| clauses.and())
}

/// The shared WHERE clause: staging (anti-)join, mapping conditions in
/// destination names, then caller conditions.
fn prune_filter(
    mapping: &Mapping,
    staging: &StagingTable,
    direction: PruneDirection,
    extra_conditions: Option<&str>,
) -> Result<Option<(String, Vec<SqlValue>)>> {
    let Some(matches) = null_safe_match(mapping, staging) else {
        return Ok(None);
    };
    let exists = match direction {
        PruneDirection::Missing => "NOT EXISTS",
        PruneDirection::Present => "EXISTS",
    };

    let mut filter = ClauseList::new();
    filter.push(format!(
        "{} (SELECT * FROM {} WHERE {})",
        exists,
        staging.qualified(),
        matches
    ));

    let conditions = PredicateCompiler::for_destination(mapping).compile_mapping(1)?;
    if let Some(sql) = conditions.sql() {
        filter.push(format!("({})", sql));
    }
    if let Some(extra) = extra_conditions.map(str::trim).filter(|e| !e.is_empty()) {
        filter.push(format!("({})", extra));
    }

    Ok(Some((filter.and(), conditions.params)))
}

/// `DELETE TOP (n)` against the destination table. `None` when the mapping
/// has no columns to match on.
pub fn build_delete(
    mapping: &Mapping,
    staging: &StagingTable,
    direction: PruneDirection,
    extra_conditions: Option<&str>,
) -> Result<Option<PruneStatement>> {
    let Some((filter, params)) = prune_filter(mapping, staging, direction, extra_conditions)? else {
        return Ok(None);
    };
    Ok(Some(PruneStatement {
        sql: format!(
            "DELETE TOP ({}) FROM {} WHERE {}",
            PRUNE_CHUNK_SIZE,
            mapping.destination_table.qualified(),
            filter
        ),
        params,
    }))
}

/// Delete from a dependent relation table every row whose parent would be
/// pruned from the destination.
pub fn build_relation_delete(
    mapping: &Mapping,
    staging: &StagingTable,
    relation: &RelationTable,
    extra_conditions: Option<&str>,
) -> Result<Option<PruneStatement>> {
    let Some((filter, params)) =
        prune_filter(mapping, staging, PruneDirection::Missing, extra_conditions)?
    else {
        return Ok(None);
    };
    let parent_columns: ClauseList = relation
        .columns
        .iter()
        .map(|(_, parent)| quote_ident(parent))
        .collect();
    let join: ClauseList = relation
        .columns
        .iter()
        .map(|(child, parent)| {
            format!(
                "{}.{} = p.{}",
                relation.alias,
                quote_ident(child),
                quote_ident(parent)
            )
        })
        .collect();

    Ok(Some(PruneStatement {
        sql: format!(
            "DELETE {alias} FROM {table} {alias} INNER JOIN (SELECT {} FROM {} WHERE {}) p ON {}",
            parent_columns.comma(),
            mapping.destination_table.qualified(),
            filter,
            join.and(),
            alias = relation.alias,
            table = qualify(&mapping.destination_table.schema, relation.table),
        ),
        params,
    }))
}

/// Run a `DELETE TOP` statement until it affects no rows.
pub async fn delete_in_chunks(conn: &mut dyn Connection, statement: &PruneStatement) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let affected = conn.execute(&statement.sql, &statement.params).await?;
        if affected == 0 {
            break;
        }
        total += affected;
        debug!("Deleted {} rows so far", total);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mapping::{ColumnMapping, Condition, ConditionOperator};
    use crate::core::schema::{Column, Table};
    use crate::profile::profile_for;
    use crate::testing::RecordingConnection;
    use uuid::Uuid;

    fn text(name: &str) -> Column {
        Column::new(name, "nvarchar").with_length(100)
    }

    fn products() -> (Mapping, StagingTable) {
        let mut m = Mapping::new(2, Table::new("dbo", "ErpItems"), Table::new("dbo", "EcomProducts"));
        m.column_mappings = vec![
            ColumnMapping::new(Some(text("ItemNo")), text("ProductID").primary_key()),
            ColumnMapping::new(Some(text("Variant")), text("ProductVariantID").primary_key()),
            ColumnMapping::new(Some(text("Lang")), text("ProductLanguageID").primary_key()),
            ColumnMapping::new(Some(text("Title")), text("ProductName")),
        ];
        let staging = StagingTable::for_mapping(&m, "Stg", &Uuid::nil(), vec![]);
        (m, staging)
    }

    #[test]
    fn test_delete_missing_is_null_safe_and_bounded() {
        let (m, s) = products();
        let stmt = build_delete(&m, &s, PruneDirection::Missing, None).unwrap().unwrap();
        assert!(stmt.sql.starts_with(
            "DELETE TOP (100000) FROM [dbo].[EcomProducts] WHERE NOT EXISTS (SELECT * FROM [dbo].[EcomProductsStg2_00000000] WHERE "
        ));
        assert!(stmt.sql.contains(
            "([dbo].[EcomProducts].[ProductID] = [dbo].[EcomProductsStg2_00000000].[ProductID] OR \
             ([dbo].[EcomProducts].[ProductID] IS NULL AND [dbo].[EcomProductsStg2_00000000].[ProductID] IS NULL))"
        ));
        assert!(!stmt.sql.contains("[ProductName]"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_delete_present_uses_exists() {
        let (m, s) = products();
        let stmt = build_delete(&m, &s, PruneDirection::Present, Some("[ProductActive] = 1"))
            .unwrap()
            .unwrap();
        assert!(stmt.sql.contains("WHERE EXISTS (SELECT * FROM"));
        assert!(stmt.sql.ends_with("AND ([ProductActive] = 1)"));
    }

    #[test]
    fn test_conditions_use_destination_names() {
        let (mut m, s) = products();
        m.conditions = vec![
            Condition::new(text("Title"), ConditionOperator::StartsWith, "A"),
            Condition::new(text("Warehouse"), ConditionOperator::EqualTo, "W1"),
            Condition::new(text("Lang"), ConditionOperator::EqualTo, "LANG1"),
        ];
        let stmt = build_delete(&m, &s, PruneDirection::Missing, None).unwrap().unwrap();
        assert!(stmt.sql.ends_with("AND ([ProductName] LIKE 'A%' AND [ProductLanguageID] = @P1)"));
        assert_eq!(stmt.params, vec![SqlValue::from("LANG1")]);
    }

    #[test]
    fn test_no_key_means_no_statement() {
        let m = Mapping::new(1, Table::new("dbo", "A"), Table::new("dbo", "B"));
        let s = StagingTable::for_mapping(&m, "Stg", &Uuid::nil(), vec![]);
        assert!(build_delete(&m, &s, PruneDirection::Missing, None).unwrap().is_none());
    }

    #[test]
    fn test_relation_delete_joins_on_parent_keys() {
        let (m, s) = products();
        let relation = &profile_for("EcomProducts").unwrap().relations[1];
        let stmt = build_relation_delete(&m, &s, relation, None).unwrap().unwrap();
        assert!(stmt.sql.starts_with(
            "DELETE vopr FROM [dbo].[EcomVariantOptionsProductRelation] vopr INNER JOIN \
             (SELECT [ProductID], [ProductVariantID] FROM [dbo].[EcomProducts] WHERE NOT EXISTS"
        ));
        assert!(stmt.sql.ends_with(
            ") p ON vopr.[VariantOptionsProductRelationProductID] = p.[ProductID] \
             AND vopr.[VariantOptionsProductRelationVariantID] = p.[ProductVariantID]"
        ));
    }

    #[tokio::test]
    async fn test_chunked_delete_repeats_until_nothing_left() {
        let (m, s) = products();
        let stmt = build_delete(&m, &s, PruneDirection::Missing, None).unwrap().unwrap();
        let mut conn = RecordingConnection::new();
        conn.affect("DELETE TOP", [100_000, 100_000, 42]);

        let deleted = delete_in_chunks(&mut conn, &stmt).await.unwrap();
        assert_eq!(deleted, 200_042);
        assert_eq!(conn.executed_matching("DELETE TOP").len(), 4);
    }
}
