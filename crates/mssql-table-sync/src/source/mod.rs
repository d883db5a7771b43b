//! Source side of a mapping: the SELECT that feeds the writer and the
//! streaming reader that runs it.

pub mod reader;

use crate::core::identifier::quote_ident;
use crate::core::mapping::Mapping;
use crate::core::value::SqlValue;
use crate::error::{Result, SyncError};
use crate::profile::{profile_for, SourceJoin};
use crate::sql::{ClauseList, PredicateCompiler};

pub use reader::{MssqlRowSource, MssqlSourceFactory};

/// A source query with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Projected column names, in SELECT order.
    pub columns: Vec<String>,
}

/// Builds the SELECT for one mapping.
///
/// The projection is wrapped as `SELECT * FROM (...) AS result` so the
/// WHERE clause can reference computed columns by name.
pub struct SourceQueryBuilder<'a> {
    mapping: &'a Mapping,
}

impl<'a> SourceQueryBuilder<'a> {
    pub fn new(mapping: &'a Mapping) -> Self {
        Self { mapping }
    }

    /// Distinct mapped source columns, then condition columns not already
    /// mapped.
    pub fn column_names(&self) -> Vec<&'a str> {
        let mut names: Vec<&'a str> = self
            .mapping
            .source_columns()
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        for condition in &self.mapping.conditions {
            let name = condition.column.name.as_str();
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    /// The profile join, when one of its trigger columns is selected.
    fn active_join(&self, names: &[&str]) -> Option<SourceJoin> {
        let join = profile_for(&self.mapping.source_table.name)?.source_join?;
        join.triggers
            .iter()
            .any(|t| names.iter().any(|n| n.eq_ignore_ascii_case(t)))
            .then_some(join)
    }

    pub fn build(&self) -> Result<SourceQuery> {
        let names = self.column_names();
        if self.mapping.source_columns().is_empty() {
            return Err(SyncError::Config(format!(
                "mapping {} has no active source columns for {}",
                self.mapping.id,
                self.mapping.source_table.full_name()
            )));
        }

        let join = self.active_join(&names);
        let projection: ClauseList = names
            .iter()
            .map(|name| {
                let computed = join
                    .as_ref()
                    .and_then(|j| j.computed.iter().find(|c| c.name.eq_ignore_ascii_case(name)));
                match computed {
                    Some(c) => format!("{} AS {}", c.expression, quote_ident(c.name)),
                    None => quote_ident(name),
                }
            })
            .collect();

        let from = match &join {
            Some(j) => format!(
                "{} AS {} {}",
                self.mapping.source_table.qualified(),
                quote_ident(j.alias),
                j.join
            ),
            None => self.mapping.source_table.qualified(),
        };

        let mut sql = format!(
            "SELECT * FROM (SELECT {} FROM {}) AS result",
            projection.comma(),
            from
        );
        let conditions = PredicateCompiler::for_source(self.mapping).compile_mapping(1)?;
        if let Some(filter) = conditions.sql() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }

        Ok(SourceQuery {
            sql,
            params: conditions.params,
            columns: names.into_iter().map(str::to_string).collect(),
        })
    }
}
