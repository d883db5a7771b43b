//! Source rows keyed by column name.

use std::fmt;

use super::value::SqlValue;

/// One row pulled from a source, in source column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: Vec<(String, SqlValue)>,
}

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Insert or replace a column value.
    pub fn insert(&mut self, name: impl Into<String>, value: SqlValue) {
        let name = name.into();
        match self
            .columns
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some((_, v)) => *v = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(name, value.into());
        self
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl fmt::Display for SourceRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (name, value)) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlNullType;

    #[test]
    fn test_lookup_ignores_case() {
        let row = SourceRow::new().with("ProductID", "P1");
        assert_eq!(row.get("productid"), Some(&SqlValue::from("P1")));
        assert!(!row.contains("ProductName"));
    }

    #[test]
    fn test_insert_replaces_existing() {
        let mut row = SourceRow::new().with("Qty", 1);
        row.insert("QTY", SqlValue::I32(2));
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("Qty"), Some(&SqlValue::I32(2)));
    }

    #[test]
    fn test_display_lists_columns() {
        let mut row = SourceRow::new().with("Id", 7);
        row.insert("Name", SqlValue::Null(SqlNullType::String));
        assert_eq!(row.to_string(), "[Id: 7, Name: NULL]");
    }
}
