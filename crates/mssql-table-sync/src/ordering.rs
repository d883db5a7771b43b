//! Foreign key dependency ordering of a job's mappings.
//!
//! Parents are loaded before their children. Only parents that are
//! themselves destinations in the job hold a table back. Cycles and other
//! unsatisfiable graphs end in a bounded fallback that appends the remaining
//! tables in their original order.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::core::mapping::Mapping;
use crate::core::schema::ForeignKeyEdge;
use crate::core::traits::Connection;
use crate::core::value::SqlValue;
use crate::error::Result;

const FOREIGN_KEY_EDGES_SQL: &str = "SELECT DISTINCT OBJECT_NAME(fk.parent_object_id), \
     OBJECT_NAME(fk.referenced_object_id) \
     FROM sys.foreign_keys fk \
     WHERE OBJECT_SCHEMA_NAME(fk.parent_object_id) = @P1 \
     AND fk.parent_object_id <> fk.referenced_object_id";

/// Child to parent edges among the tables of `schema`.
pub async fn load_foreign_key_edges(
    conn: &mut dyn Connection,
    schema: &str,
) -> Result<Vec<ForeignKeyEdge>> {
    let rows = conn
        .query(FOREIGN_KEY_EDGES_SQL, &[SqlValue::from(schema)])
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match row.as_slice() {
            [child, parent, ..] => Some(ForeignKeyEdge::new(child.render(), parent.render())),
            _ => None,
        })
        .collect())
}

/// Load the constraint graph of every destination schema and order the
/// mappings by it.
pub async fn order_mappings(
    conn: &mut dyn Connection,
    mappings: Vec<Mapping>,
) -> Result<Vec<Mapping>> {
    let mut schemas: Vec<&str> = Vec::new();
    for m in &mappings {
        let schema = m.destination_table.schema.as_str();
        if !schemas.iter().any(|s| s.eq_ignore_ascii_case(schema)) {
            schemas.push(schema);
        }
    }

    let mut edges = Vec::new();
    for schema in schemas {
        edges.extend(load_foreign_key_edges(conn, schema).await?);
    }
    debug!("Loaded {} foreign key edges", edges.len());

    Ok(order_by_dependencies(mappings, &edges))
}

/// Reorder `mappings` so that referenced tables come first.
///
/// Mappings that share a destination keep their relative order.
pub fn order_by_dependencies(mappings: Vec<Mapping>, edges: &[ForeignKeyEdge]) -> Vec<Mapping> {
    let names: Vec<String> = mappings
        .iter()
        .map(|m| m.destination_table.name.clone())
        .collect();

    let in_job = |table: &str| names.iter().any(|n| n.eq_ignore_ascii_case(table));
    let parents: Vec<Vec<&str>> = names
        .iter()
        .map(|name| {
            let mut found: Vec<&str> = Vec::new();
            for edge in edges {
                if edge.child.eq_ignore_ascii_case(name)
                    && !edge.parent.eq_ignore_ascii_case(name)
                    && in_job(&edge.parent)
                    && !found.iter().any(|p| p.eq_ignore_ascii_case(&edge.parent))
                {
                    found.push(edge.parent.as_str());
                }
            }
            found
        })
        .collect();

    let mut resolved: Vec<&str> = Vec::new();
    let mut order: Vec<usize> = Vec::with_capacity(names.len());
    let mut queue: VecDeque<usize> = VecDeque::new();

    for (i, deps) in parents.iter().enumerate() {
        if deps.is_empty() {
            order.push(i);
            resolved.push(&names[i]);
        } else {
            queue.push_back(i);
        }
    }

    let mut last = 0usize;
    let mut budget = 0usize;
    while let Some(i) = queue.pop_front() {
        let remaining = queue.len() + 1;
        if remaining == last {
            if budget == 0 {
                queue.push_front(i);
                let mut rest: Vec<usize> = queue.drain(..).collect();
                rest.sort_unstable();
                warn!(
                    "Could not order tables {} by foreign keys; constraints may not be met",
                    rest.iter().map(|&r| names[r].as_str()).collect::<Vec<_>>().join(", ")
                );
                order.extend(rest);
                break;
            }
            budget -= 1;
        } else {
            last = remaining;
            budget = last * 10;
        }

        let ready = parents[i]
            .iter()
            .all(|p| resolved.iter().any(|r| r.eq_ignore_ascii_case(p)));
        if ready {
            order.push(i);
            resolved.push(&names[i]);
        } else {
            queue.push_back(i);
        }
    }

    let mut slots: Vec<Option<Mapping>> = mappings.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}
