//! SQL text building blocks.

pub mod predicate;

pub use predicate::{CompiledPredicate, PredicateCompiler};

/// Accumulates clause tokens and joins them once, at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseList {
    clauses: Vec<String>,
}

impl ClauseList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(String::as_str)
    }

    pub fn join(&self, separator: &str) -> String {
        self.clauses.join(separator)
    }

    /// Clauses joined with `AND`.
    pub fn and(&self) -> String {
        self.join(" AND ")
    }

    /// Clauses joined with `, `.
    pub fn comma(&self) -> String {
        self.join(", ")
    }
}

impl<S: Into<String>> FromIterator<S> for ClauseList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            clauses: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>> Extend<S> for ClauseList {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.clauses.extend(iter.into_iter().map(Into::into));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_has_no_trailing_separator() {
        let list: ClauseList = ["a = 1", "b = 2"].into_iter().collect();
        assert_eq!(list.and(), "a = 1 AND b = 2");
        assert_eq!(list.comma(), "a = 1, b = 2");
    }

    #[test]
    fn test_empty_list_joins_to_empty_string() {
        let list = ClauseList::new();
        assert!(list.is_empty());
        assert_eq!(list.and(), "");
    }
}
