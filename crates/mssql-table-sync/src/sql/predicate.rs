//! Compiles mapping conditions into a parameterized WHERE fragment.
//!
//! Equality comparisons are bound as `@P<n>` parameters; the index is shared
//! across the whole fragment and starts at the caller's `first_param`. LIKE,
//! IN and range comparisons inline their literal, quoted and escaped.
//! Conditions with an empty literal produce no clause, except the NULL and
//! NULL-or-empty refinements of EqualTo/DifferentFrom which always emit.

use crate::core::identifier::{quote_ident, quote_literal};
use crate::core::mapping::{split_list, Condition, ConditionOperator, Mapping};
use crate::core::schema::Column;
use crate::core::value::{parse_datetime, SqlValue};
use crate::error::{Result, SyncError};

use super::ClauseList;

/// Compiled WHERE fragment plus its bound parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledPredicate {
    pub clauses: ClauseList,
    pub params: Vec<SqlValue>,
}

impl CompiledPredicate {
    /// The conjunction, or `None` when no condition produced a clause.
    pub fn sql(&self) -> Option<String> {
        if self.clauses.is_empty() {
            None
        } else {
            Some(self.clauses.and())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Condition compiler bound to one mapping.
#[derive(Debug, Clone, Copy)]
pub struct PredicateCompiler<'a> {
    mapping: &'a Mapping,
    skip_virtual_columns: bool,
    use_destination_names: bool,
}

impl<'a> PredicateCompiler<'a> {
    pub fn new(mapping: &'a Mapping) -> Self {
        Self {
            mapping,
            skip_virtual_columns: false,
            use_destination_names: false,
        }
    }

    /// Compiler for statements against the source table.
    pub fn for_source(mapping: &'a Mapping) -> Self {
        Self::new(mapping)
    }

    /// Compiler for statements against the destination table: column names
    /// are translated through the mapping and profile-computed columns are
    /// skipped.
    pub fn for_destination(mapping: &'a Mapping) -> Self {
        Self::new(mapping)
            .skip_virtual_columns(true)
            .use_destination_names(true)
    }

    pub fn skip_virtual_columns(mut self, skip: bool) -> Self {
        self.skip_virtual_columns = skip;
        self
    }

    pub fn use_destination_names(mut self, enabled: bool) -> Self {
        self.use_destination_names = enabled;
        self
    }

    /// Compile the mapping's own conditions.
    pub fn compile_mapping(&self, first_param: usize) -> Result<CompiledPredicate> {
        self.compile(&self.mapping.conditions, first_param)
    }

    pub fn compile(&self, conditions: &[Condition], first_param: usize) -> Result<CompiledPredicate> {
        let mut out = CompiledPredicate::default();
        let mut next_param = first_param;

        for condition in conditions {
            if self.skip_virtual_columns && condition.column.is_virtual {
                continue;
            }
            let Some(column) = self.resolve_column(condition) else {
                continue;
            };
            let col = quote_ident(column);
            let literal = condition.value.as_str();

            let clause = match condition.operator {
                ConditionOperator::Contains | ConditionOperator::NotContains => {
                    like(&col, condition.operator == ConditionOperator::NotContains, "%", literal, "%")
                }
                ConditionOperator::StartsWith | ConditionOperator::NotStartsWith => {
                    like(&col, condition.operator == ConditionOperator::NotStartsWith, "", literal, "%")
                }
                ConditionOperator::EndsWith | ConditionOperator::NotEndsWith => {
                    like(&col, condition.operator == ConditionOperator::NotEndsWith, "%", literal, "")
                }
                ConditionOperator::EqualTo => {
                    if condition.is_null_condition {
                        Some(format!("{} IS NULL", col))
                    } else if condition.is_null_or_empty_condition {
                        Some(format!("({0} IS NULL OR {0} = '')", col))
                    } else {
                        self.bind(&mut out, &mut next_param, condition, &col, "=")?
                    }
                }
                ConditionOperator::DifferentFrom => {
                    if condition.is_null_condition {
                        Some(format!("{} IS NOT NULL", col))
                    } else if condition.is_null_or_empty_condition {
                        Some(format!("({0} IS NOT NULL AND {0} <> '')", col))
                    } else {
                        self.bind(&mut out, &mut next_param, condition, &col, "<>")?
                    }
                }
                ConditionOperator::In | ConditionOperator::NotIn => in_list(
                    &col,
                    condition.operator == ConditionOperator::NotIn,
                    &condition.column,
                    literal,
                ),
                ConditionOperator::GreaterThan => compare(&col, ">", &condition.column, literal),
                ConditionOperator::LessThan => compare(&col, "<", &condition.column, literal),
                ConditionOperator::Unrecognized => {
                    self.bind(&mut out, &mut next_param, condition, &col, "=")?
                }
            };

            if let Some(clause) = clause {
                out.clauses.push(clause);
            }
        }

        Ok(out)
    }

    fn resolve_column(&self, condition: &'a Condition) -> Option<&'a str> {
        if self.use_destination_names {
            self.mapping
                .destination_for_source(&condition.column.name)
                .map(|c| c.name.as_str())
        } else {
            Some(condition.column.name.as_str())
        }
    }

    fn bind(
        &self,
        out: &mut CompiledPredicate,
        next_param: &mut usize,
        condition: &Condition,
        col: &str,
        op: &str,
    ) -> Result<Option<String>> {
        if condition.value.is_empty() {
            return Ok(None);
        }
        out.params.push(parameter_value(&condition.column, &condition.value)?);
        let clause = format!("{} {} @P{}", col, op, *next_param);
        *next_param += 1;
        Ok(Some(clause))
    }
}

/// Date columns get the literal parsed into a date value; all others bind the text.
fn parameter_value(column: &Column, literal: &str) -> Result<SqlValue> {
    if column.is_date() {
        parse_datetime(literal).map(SqlValue::DateTime).ok_or_else(|| {
            SyncError::Config(format!(
                "condition value '{}' for date column {} is not a valid date",
                literal, column.name
            ))
        })
    } else {
        Ok(SqlValue::String(literal.to_string()))
    }
}

fn like(col: &str, negated: bool, prefix: &str, literal: &str, suffix: &str) -> Option<String> {
    if literal.is_empty() {
        return None;
    }
    let not = if negated { "NOT " } else { "" };
    Some(format!(
        "{} {}LIKE {}",
        col,
        not,
        quote_literal(&format!("{}{}{}", prefix, literal, suffix))
    ))
}

fn in_list(col: &str, negated: bool, column: &Column, literal: &str) -> Option<String> {
    let items: Vec<String> = if column.is_text() {
        split_list(literal).map(quote_literal).collect()
    } else {
        split_list(literal).map(inline_literal).collect()
    };
    if items.is_empty() {
        return None;
    }
    let not = if negated { "NOT " } else { "" };
    Some(format!("{} {}IN ({})", col, not, items.join(",")))
}

fn compare(col: &str, op: &str, column: &Column, literal: &str) -> Option<String> {
    let literal = literal.trim();
    if literal.is_empty() {
        return None;
    }
    let value = if column.is_text() || column.is_date() {
        quote_literal(literal)
    } else {
        inline_literal(literal)
    };
    Some(format!("{} {} {}", col, op, value))
}

/// Numbers stay bare; anything else is quoted so it cannot escape the clause.
fn inline_literal(literal: &str) -> String {
    if literal.parse::<f64>().is_ok() {
        literal.to_string()
    } else {
        quote_literal(literal)
    }
}
