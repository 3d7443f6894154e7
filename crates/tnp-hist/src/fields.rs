//! Static field pruning: which event fields an expression set touches.
//!
//! Expressions are scanned as plain strings: operator and punctuation
//! patterns are blanked out, the remainder is split on whitespace, and every
//! token that is neither a numeric literal nor the null literal is taken as a
//! field reference. Only these fields are decoded from the event source.

use std::collections::BTreeSet;

use crate::expr::FUNCTIONS;

/// Token standing for an unset expression.
pub const NULL_LITERAL: &str = "None";

/// Operator and punctuation patterns blanked out before splitting.
///
/// Applied after the function-call prefixes (`fabs(`, `max(`, ...), with
/// `abs(` last among those so `fabs(` is not split into `f`.
const OPERATOR_PATTERNS: &[&str] =
    &["&", "|", "+", "-", "(", ")", ">", "<", "=", "!", "*", "/", "?", ":", ","];

/// An ordered, duplicate-free set of field names.
///
/// The position of a name is the column slot it occupies in an
/// [`EventBatch`](crate::source::EventBatch).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    names: Vec<String>,
}

impl FieldSet {
    /// Build from names, dropping duplicates and sorting.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        Self { names: set.into_iter().collect() }
    }

    /// Field names in slot order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Slot of `name`, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    /// Whether `name` is in the set.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Keep only the names for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.names.retain(|n| keep(n));
    }
}

fn is_number(token: &str) -> bool {
    token.parse::<f64>().is_ok()
}

/// Extract the field identifiers referenced by a set of expression strings.
pub fn referenced_fields<'a, I>(expressions: I) -> FieldSet
where
    I: IntoIterator<Item = &'a str>,
{
    let mut joined = String::new();
    for e in expressions {
        joined.push(' ');
        joined.push_str(e);
    }

    for func in FUNCTIONS.iter().filter(|f| **f != "abs") {
        joined = joined.replace(&format!("{func}("), " ");
    }
    joined = joined.replace("abs(", " ");
    for pattern in OPERATOR_PATTERNS {
        joined = joined.replace(pattern, " ");
    }

    FieldSet::from_names(
        joined.split_whitespace().filter(|t| !is_number(t) && *t != NULL_LITERAL),
    )
}
