//! Staging to destination merge statements and the foreign key diagnostic.

use tracing::debug;

use crate::core::identifier::quote_ident;
use crate::core::mapping::Mapping;
use crate::core::schema::ForeignKeyColumn;
use crate::core::traits::{Connection, MergeMode};
use crate::core::value::SqlValue;
use crate::error::Result;
use crate::sql::ClauseList;

use super::staging::StagingTable;

/// Rows listed per violated constraint.
const DIAGNOSTIC_ROW_LIMIT: usize = 50;

const FOREIGN_KEY_COLUMNS_SQL: &str = "SELECT OBJECT_NAME(fkc.constraint_object_id), \
     COL_NAME(fkc.parent_object_id, fkc.parent_column_id), \
     OBJECT_SCHEMA_NAME(fkc.referenced_object_id), \
     OBJECT_NAME(fkc.referenced_object_id), \
     COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) \
     FROM sys.foreign_key_columns fkc \
     WHERE fkc.parent_object_id = OBJECT_ID(@P1) \
     ORDER BY fkc.constraint_object_id, fkc.constraint_column_id";

/// `dest.k = staging.k AND ...` over the mapping's match key.
pub fn match_predicate(mapping: &Mapping, staging: &StagingTable) -> Option<String> {
    let dest = &mapping.destination_table;
    let clauses: ClauseList = mapping
        .key_columns()
        .iter()
        .map(|cm| {
            let name = cm.destination_name();
            format!(
                "{}.{} = {}",
                dest.qualified(),
                quote_ident(name),
                staging.column_ref(name)
            )
        })
        .collect();
    (!clauses.is_empty()).then(|| clauses.and())
}

/// UPDATE of matched rows followed by an anti-joined INSERT of unmatched
/// rows, as one batch. `None` when the mapping has no key to match on or
/// nothing to write in the requested mode.
pub fn build_merge_sql(mapping: &Mapping, staging: &StagingTable, mode: MergeMode) -> Option<String> {
    let matches = match_predicate(mapping, staging)?;
    let keys = mapping.key_columns();
    let first_key = keys.first()?.destination_name();
    let dest = mapping.destination_table.qualified();
    let columns = mapping.distinct_destination_columns();

    let mut batch = ClauseList::new();

    if mode.updates() {
        let assignments: ClauseList = columns
            .iter()
            .filter(|cm| {
                !cm.destination.is_identity
                    && !mapping.is_key_column(cm.destination_name())
                    && !cm.script.is_insert_only()
            })
            .map(|cm| {
                format!(
                    "{} = {}",
                    quote_ident(cm.destination_name()),
                    staging.column_ref(cm.destination_name())
                )
            })
            .collect();
        if !assignments.is_empty() {
            batch.push(format!(
                "UPDATE {} SET {} FROM {} WHERE {};",
                dest,
                assignments.comma(),
                staging.qualified(),
                matches
            ));
        }
    }

    if mode.inserts() {
        let insert_columns: ClauseList = columns
            .iter()
            .map(|cm| quote_ident(cm.destination_name()))
            .collect();
        let select_columns: ClauseList = columns
            .iter()
            .map(|cm| staging.column_ref(cm.destination_name()))
            .collect();
        let insert = format!(
            "INSERT INTO {dest} ({}) SELECT {} FROM {} LEFT OUTER JOIN {dest} ON {} WHERE {dest}.{} IS NULL;",
            insert_columns.comma(),
            select_columns.comma(),
            staging.qualified(),
            matches,
            quote_ident(first_key),
        );
        if mapping.has_identity() {
            batch.push(identity_insert_sql(mapping, true));
            batch.push(insert);
            batch.push(identity_insert_sql(mapping, false));
        } else {
            batch.push(insert);
        }
    }

    (!batch.is_empty()).then(|| batch.join(" "))
}

pub fn identity_insert_sql(mapping: &Mapping, on: bool) -> String {
    format!(
        "SET IDENTITY_INSERT {} {};",
        mapping.destination_table.qualified(),
        if on { "ON" } else { "OFF" }
    )
}

/// List staging rows whose foreign key values have no parent row.
///
/// Only constraints whose child columns are all staged are checked. Returns
/// an empty string when nothing is implicated.
pub async fn foreign_key_diagnostic(
    conn: &mut dyn Connection,
    mapping: &Mapping,
    staging: &StagingTable,
) -> Result<String> {
    let dest = mapping.destination_table.qualified();
    let rows = conn
        .query(FOREIGN_KEY_COLUMNS_SQL, &[SqlValue::String(dest.clone())])
        .await?;

    let mut constraints: Vec<(String, Vec<ForeignKeyColumn>)> = Vec::new();
    for row in rows {
        let text = |i: usize| row.get(i).map(SqlValue::render).unwrap_or_default();
        let name = text(0);
        let column = ForeignKeyColumn {
            column: text(1),
            ref_schema: text(2),
            ref_table: text(3),
            ref_column: text(4),
        };
        match constraints.iter_mut().find(|(n, _)| *n == name) {
            Some((_, columns)) => columns.push(column),
            None => constraints.push((name, vec![column])),
        }
    }

    let staged: Vec<&str> = staging.columns.iter().map(|c| c.name.as_str()).collect();
    let header = staged.join(", ");
    let mut lines: Vec<String> = Vec::new();

    for (name, columns) in &constraints {
        let all_staged = columns
            .iter()
            .all(|fk| staged.iter().any(|s| s.eq_ignore_ascii_case(&fk.column)));
        if !all_staged {
            continue;
        }
        let sql = orphan_rows_sql(staging, columns);
        debug!("Checking constraint {} on {}", name, dest);
        for values in conn.query(&sql, &[]).await? {
            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            lines.push(rendered.join(", "));
        }
    }

    if lines.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("\nFailed rows:\n{}\n{}", header, lines.join("\n")))
}

fn orphan_rows_sql(staging: &StagingTable, columns: &[ForeignKeyColumn]) -> String {
    let select: ClauseList = staging.columns.iter().map(|c| staging.column_ref(&c.name)).collect();
    let mut filter: ClauseList = columns
        .iter()
        .map(|fk| format!("{} IS NOT NULL", staging.column_ref(&fk.column)))
        .collect();
    let parent = &columns[0];
    let join: ClauseList = columns
        .iter()
        .map(|fk| {
            format!(
                "p.{} = {}",
                quote_ident(&fk.ref_column),
                staging.column_ref(&fk.column)
            )
        })
        .collect();
    filter.push(format!(
        "NOT EXISTS (SELECT 1 FROM {}.{} p WHERE {})",
        quote_ident(&parent.ref_schema),
        quote_ident(&parent.ref_table),
        join.and()
    ));
    format!(
        "SELECT TOP ({}) {} FROM {} WHERE {}",
        DIAGNOSTIC_ROW_LIMIT,
        select.comma(),
        staging.qualified(),
        filter.and()
    )
}
