//! Declarative source-to-destination mappings.
//!
//! A [`Mapping`] is resolved once from the job file and the live catalogs and
//! is read-only for the rest of the run. The one piece of logic that several
//! stages must agree on, the match-key selection, lives here in
//! [`Mapping::key_columns`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::row::SourceRow;
use super::schema::{Column, Table, TypeFamily};
use super::value::{parse_datetime, SqlValue};

/// Mapping option: prune destination rows missing from the source.
pub const OPTION_PRUNE_MISSING: &str = "prune-missing";
/// Mapping option: discard rows whose mapped values were already staged.
pub const OPTION_DISCARD_DUPLICATES: &str = "discard-duplicates";
/// Mapping option: tolerate rows rejected by the bulk load.
pub const OPTION_SKIP_FAILING_ROWS: &str = "skip-failing-rows";

/// How a column mapping produces its destination value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    /// Converted source value.
    #[default]
    None,
    /// Source value followed by the script literal.
    Append,
    /// Script literal followed by the source value.
    Prepend,
    /// The script literal.
    Constant,
    /// A fresh GUID per row.
    NewGuid,
}

impl ScriptType {
    /// Values that only make sense when a row is first inserted. They never
    /// take part in matching and are never overwritten by an update.
    pub fn is_insert_only(self) -> bool {
        matches!(self, ScriptType::Constant | ScriptType::NewGuid)
    }
}

/// Filter operators supported in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Contains,
    NotContains,
    EqualTo,
    DifferentFrom,
    In,
    NotIn,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    GreaterThan,
    LessThan,
    /// Anything else; compiled and evaluated as `EqualTo`.
    #[serde(other)]
    Unrecognized,
}

/// One source column to destination column association.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    /// Absent for script-only destination columns.
    pub source: Option<Column>,
    pub destination: Column,
    pub active: bool,
    /// Explicit match key, independent of the destination primary key.
    pub is_key: bool,
    pub script: ScriptType,
    pub script_value: Option<String>,
}

impl ColumnMapping {
    pub fn new(source: Option<Column>, destination: Column) -> Self {
        Self {
            source,
            destination,
            active: true,
            is_key: false,
            script: ScriptType::None,
            script_value: None,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn scripted(mut self, script: ScriptType, value: Option<&str>) -> Self {
        self.script = script;
        self.script_value = value.map(str::to_string);
        self
    }

    /// The script can produce a value without reading the source row.
    pub fn has_script_with_value(&self) -> bool {
        match self.script {
            ScriptType::None => false,
            ScriptType::NewGuid => true,
            _ => self.script_value.as_deref().is_some_and(|v| !v.is_empty()),
        }
    }

    pub fn script_literal(&self) -> &str {
        self.script_value.as_deref().unwrap_or("")
    }

    pub fn destination_name(&self) -> &str {
        &self.destination.name
    }
}

/// A single-column filter; a mapping's conditions are ANDed in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: Column,
    pub operator: ConditionOperator,
    pub value: String,
    /// EqualTo/DifferentFrom only: compare against NULL.
    pub is_null_condition: bool,
    /// EqualTo/DifferentFrom only: compare against NULL or ''.
    pub is_null_or_empty_condition: bool,
}

impl Condition {
    pub fn new(column: Column, operator: ConditionOperator, value: impl Into<String>) -> Self {
        Self {
            column,
            operator,
            value: value.into(),
            is_null_condition: false,
            is_null_or_empty_condition: false,
        }
    }

    /// Evaluate against a source row the same way the compiled SQL would.
    ///
    /// Comparisons follow the column's type family: text compares under a
    /// case-insensitive collation that ignores trailing spaces, bit columns
    /// compare as 0/1, and LIKE operators honour `%`, `_` and `[...]`.
    /// A row without the condition's column passes: the source query has
    /// already applied the filter server-side.
    pub fn matches(&self, row: &SourceRow) -> bool {
        let Some(value) = row.get(&self.column.name) else {
            return true;
        };
        let literal = self.value.as_str();

        match self.operator {
            ConditionOperator::EqualTo | ConditionOperator::Unrecognized => {
                self.matches_equality(value, literal, true)
            }
            ConditionOperator::DifferentFrom => self.matches_equality(value, literal, false),
            op => {
                if literal.is_empty() {
                    return true;
                }
                if value.is_null() {
                    return false;
                }
                let text = value.render();
                match op {
                    ConditionOperator::Contains => like(&text, &format!("%{}%", literal)),
                    ConditionOperator::NotContains => !like(&text, &format!("%{}%", literal)),
                    ConditionOperator::StartsWith => like(&text, &format!("{}%", literal)),
                    ConditionOperator::NotStartsWith => !like(&text, &format!("{}%", literal)),
                    ConditionOperator::EndsWith => like(&text, &format!("%{}", literal)),
                    ConditionOperator::NotEndsWith => !like(&text, &format!("%{}", literal)),
                    ConditionOperator::In => split_list(literal).any(|item| self.equals(value, item)),
                    ConditionOperator::NotIn => !split_list(literal).any(|item| self.equals(value, item)),
                    ConditionOperator::GreaterThan => {
                        self.compare(value, literal) == Some(Ordering::Greater)
                    }
                    ConditionOperator::LessThan => self.compare(value, literal) == Some(Ordering::Less),
                    _ => true,
                }
            }
        }
    }

    fn matches_equality(&self, value: &SqlValue, literal: &str, equal: bool) -> bool {
        let hit = if self.is_null_condition {
            value.is_null()
        } else if self.is_null_or_empty_condition {
            value.is_null() || collate(&value.render()).is_empty()
        } else if literal.is_empty() {
            return true;
        } else if value.is_null() {
            // NULL = x and NULL <> x are both unknown in SQL
            return false;
        } else {
            self.equals(value, literal)
        };
        hit == equal
    }

    fn equals(&self, value: &SqlValue, literal: &str) -> bool {
        self.compare(value, literal) == Some(Ordering::Equal)
    }

    /// `None` when the literal does not convert to the column's type.
    fn compare(&self, value: &SqlValue, literal: &str) -> Option<Ordering> {
        match self.column.family() {
            TypeFamily::Integer | TypeFamily::Decimal | TypeFamily::Float => {
                let literal = SqlValue::String(literal.to_string());
                match (value.to_decimal(), literal.to_decimal()) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => value.to_f64()?.partial_cmp(&literal.to_f64()?),
                }
            }
            TypeFamily::Boolean => {
                let literal = SqlValue::String(literal.to_string()).to_bool()?;
                Some(value.to_bool()?.cmp(&literal))
            }
            TypeFamily::DateTime | TypeFamily::DateTimeOffset | TypeFamily::Date => {
                Some(value.to_datetime()?.cmp(&parse_datetime(literal)?))
            }
            _ => Some(collate(&value.render()).cmp(&collate(literal))),
        }
    }
}

/// Split an IN-list literal on commas, trimming each part.
pub(crate) fn split_list(literal: &str) -> impl Iterator<Item = &str> {
    literal.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Comparison key under the default server collation.
fn collate(s: &str) -> String {
    s.trim_end_matches(' ').to_lowercase()
}

#[derive(Debug)]
enum LikeToken {
    /// `%`
    Any,
    /// `_`
    One,
    /// `[a-f]`, `[^xyz]`
    Set { negated: bool, ranges: Vec<(char, char)> },
    Char(char),
}

impl LikeToken {
    fn accepts(&self, c: char) -> bool {
        match self {
            LikeToken::Any | LikeToken::One => true,
            LikeToken::Set { negated, ranges } => {
                ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi) != *negated
            }
            LikeToken::Char(p) => *p == c,
        }
    }
}

fn like_tokens(pattern: &[char]) -> Vec<LikeToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut i = 0;
    while i < pattern.len() {
        match pattern[i] {
            '%' => tokens.push(LikeToken::Any),
            '_' => tokens.push(LikeToken::One),
            '[' => {
                if let Some(len) = pattern[i + 1..].iter().position(|&c| c == ']') {
                    let body = &pattern[i + 1..i + 1 + len];
                    let (negated, body) = match body.first() {
                        Some(&'^') => (true, &body[1..]),
                        _ => (false, body),
                    };
                    let mut ranges = Vec::new();
                    let mut j = 0;
                    while j < body.len() {
                        if j + 2 < body.len() && body[j + 1] == '-' {
                            ranges.push((body[j], body[j + 2]));
                            j += 3;
                        } else {
                            ranges.push((body[j], body[j]));
                            j += 1;
                        }
                    }
                    tokens.push(LikeToken::Set { negated, ranges });
                    i += len + 2;
                    continue;
                }
                tokens.push(LikeToken::Char('['));
            }
            c => tokens.push(LikeToken::Char(c)),
        }
        i += 1;
    }
    tokens
}

/// Case-insensitive SQL `LIKE`.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let tokens = like_tokens(&pattern);

    let (mut t, mut p) = (0, 0);
    // last `%` seen and the text position it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(LikeToken::Any) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(token) if token.accepts(text[t]) => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((any, from)) => {
                    backtrack = Some((any, from + 1));
                    p = any + 1;
                    t = from + 1;
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| matches!(token, LikeToken::Any))
}

/// A source table to destination table association.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    /// Stable identifier within the job; part of the staging table name.
    pub id: usize,
    pub source_table: Table,
    pub destination_table: Table,
    pub column_mappings: Vec<ColumnMapping>,
    pub conditions: Vec<Condition>,
    pub active: bool,
    /// Per-mapping overrides of job defaults, keyed by option name.
    pub options: BTreeMap<String, bool>,
}

impl Mapping {
    pub fn new(id: usize, source_table: Table, destination_table: Table) -> Self {
        Self {
            id,
            source_table,
            destination_table,
            column_mappings: Vec::new(),
            conditions: Vec::new(),
            active: true,
            options: BTreeMap::new(),
        }
    }

    /// Mapping-level option value, if set.
    pub fn option(&self, key: &str) -> Option<bool> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }

    /// Mapping option when set, else the job default.
    pub fn option_or(&self, key: &str, default: bool) -> bool {
        self.option(key).unwrap_or(default)
    }

    pub fn active_columns(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.column_mappings.iter().filter(|cm| cm.active)
    }

    /// Active column mappings, first one per destination column.
    pub fn distinct_destination_columns(&self) -> Vec<&ColumnMapping> {
        let mut seen: Vec<&str> = Vec::new();
        let mut out = Vec::new();
        for cm in self.active_columns() {
            let name = cm.destination_name();
            if !seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                seen.push(name);
                out.push(cm);
            }
        }
        out
    }

    /// At least one active column mapping is marked as key.
    pub fn has_explicit_key(&self) -> bool {
        self.active_columns().any(|cm| cm.is_key)
    }

    /// Columns used to match staging rows with destination rows.
    ///
    /// Explicit key columns when any exist; otherwise the destination primary
    /// key columns; otherwise every active column that is not insert-only,
    /// which amounts to full-row matching. Merge and prune both use this set.
    pub fn key_columns(&self) -> Vec<&ColumnMapping> {
        let distinct = self.distinct_destination_columns();

        let explicit: Vec<_> = distinct.iter().copied().filter(|cm| cm.is_key).collect();
        if !explicit.is_empty() {
            return explicit;
        }

        let primary: Vec<_> = distinct
            .iter()
            .copied()
            .filter(|cm| cm.destination.is_primary_key)
            .collect();
        if !primary.is_empty() {
            return primary;
        }

        distinct
            .into_iter()
            .filter(|cm| !cm.script.is_insert_only())
            .collect()
    }

    pub fn is_key_column(&self, destination: &str) -> bool {
        self.key_columns()
            .iter()
            .any(|cm| cm.destination_name().eq_ignore_ascii_case(destination))
    }

    /// An active mapping writes to an identity column.
    pub fn has_identity(&self) -> bool {
        self.active_columns().any(|cm| cm.destination.is_identity)
    }

    /// Destination column fed by the given source column.
    pub fn destination_for_source(&self, source: &str) -> Option<&Column> {
        self.active_columns()
            .find(|cm| {
                cm.source
                    .as_ref()
                    .is_some_and(|s| s.name.eq_ignore_ascii_case(source))
            })
            .map(|cm| &cm.destination)
    }

    /// Distinct source columns read by active column mappings.
    pub fn source_columns(&self) -> Vec<&Column> {
        let mut out: Vec<&Column> = Vec::new();
        for column in self.active_columns().filter_map(|cm| cm.source.as_ref()) {
            if !out.iter().any(|c| c.name.eq_ignore_ascii_case(&column.name)) {
                out.push(column);
            }
        }
        out
    }

    /// All conditions hold for the row.
    pub fn conditions_match(&self, row: &SourceRow) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}
