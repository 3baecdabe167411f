//! Composable SQL fragments.
//!
//! A [`Fragment`] is literal SQL text interleaved with typed interpolations:
//! quoted identifiers, nested fragments, separated fragment lists and bound
//! values. Fragments are immutable once built; larger statements are built by
//! nesting smaller ones. Serialization ([`Fragment::to_statement`]) walks the
//! tree left to right, depth first, so `$n` placeholders are numbered in the
//! order they appear in the final text and line up with the values array.
//!
//! Literal text only ever comes from `&'static str`. Runtime strings reach the
//! SQL text exclusively as [`RawIdentifier`]s; everything else is bound.

use std::borrow::Cow;
use std::fmt::Write as _;

use super::identifier::RawIdentifier;
use super::value::SqlValue;
use crate::error::{OrmError, Result};

/// One typed hole between two literal segments.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpolation {
    /// Inserted verbatim.
    Raw(RawIdentifier),
    /// Inlined recursively, sharing the parameter counter.
    Fragment(Fragment),
    /// Each item serialized in turn, separated by `separator` when present.
    List {
        items: Vec<Fragment>,
        separator: Option<Fragment>,
    },
    /// Always becomes a positional parameter.
    Value(SqlValue),
}

/// Immutable SQL text-plus-parameters tree.
///
/// Invariant: `parts.len() == interpolations.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    parts: Vec<Cow<'static, str>>,
    interpolations: Vec<Interpolation>,
}

/// Serialized fragment: positional-parameter SQL and its values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl Fragment {
    /// The fragment that renders to nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            parts: vec![Cow::Borrowed("")],
            interpolations: Vec::new(),
        }
    }

    /// A literal-only fragment.
    #[must_use]
    pub fn sql(text: &'static str) -> Self {
        Self {
            parts: vec![Cow::Borrowed(text)],
            interpolations: Vec::new(),
        }
    }

    /// Template-style construction from literal parts and the holes between them.
    pub fn from_parts(
        parts: Vec<&'static str>,
        interpolations: Vec<Interpolation>,
    ) -> Result<Self> {
        if parts.len() != interpolations.len() + 1 {
            return Err(OrmError::MalformedFragment {
                parts: parts.len(),
                interpolations: interpolations.len(),
            });
        }
        Ok(Self {
            parts: parts.into_iter().map(Cow::Borrowed).collect(),
            interpolations,
        })
    }

    /// A fragment holding one bound value.
    pub fn value(value: impl Into<SqlValue>) -> Self {
        Self::single(Interpolation::Value(value.into()))
    }

    /// A fragment holding one identifier.
    #[must_use]
    pub fn raw(ident: RawIdentifier) -> Self {
        Self::single(Interpolation::Raw(ident))
    }

    fn single(interpolation: Interpolation) -> Self {
        Self {
            parts: vec![Cow::Borrowed(""), Cow::Borrowed("")],
            interpolations: vec![interpolation],
        }
    }

    #[must_use]
    pub fn builder() -> FragmentBuilder {
        FragmentBuilder::new()
    }

    #[must_use]
    pub fn parts(&self) -> &[Cow<'static, str>] {
        &self.parts
    }

    #[must_use]
    pub fn interpolations(&self) -> &[Interpolation] {
        &self.interpolations
    }

    /// Whether the fragment renders to an empty string with no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.is_empty())
            && self.interpolations.iter().all(|i| match i {
                Interpolation::Raw(_) | Interpolation::Value(_) => false,
                Interpolation::Fragment(f) => f.is_empty(),
                Interpolation::List { items, .. } => items.iter().all(Fragment::is_empty),
            })
    }

    /// Render to positional-parameter SQL plus the ordered values.
    #[must_use]
    pub fn to_statement(&self) -> Statement {
        let mut sql = String::new();
        let mut values = Vec::new();
        self.write_to(&mut sql, &mut values);
        Statement { sql, values }
    }

    fn write_to(&self, sql: &mut String, values: &mut Vec<SqlValue>) {
        for (idx, part) in self.parts.iter().enumerate() {
            sql.push_str(part);
            let Some(interpolation) = self.interpolations.get(idx) else {
                continue;
            };
            match interpolation {
                Interpolation::Raw(ident) => sql.push_str(ident.as_sql()),
                Interpolation::Fragment(inner) => inner.write_to(sql, values),
                Interpolation::List { items, separator } => {
                    for (pos, item) in items.iter().enumerate() {
                        if pos > 0 {
                            if let Some(sep) = separator {
                                sep.write_to(sql, values);
                            }
                        }
                        item.write_to(sql, values);
                    }
                }
                Interpolation::Value(value) => {
                    values.push(value.clone());
                    let _ = write!(sql, "${}", values.len());
                }
            }
        }
    }
}

impl Default for Fragment {
    fn default() -> Self {
        Self::empty()
    }
}

/// Join fragments into one, with an optional separator between items.
#[must_use]
pub fn join_fragments(items: Vec<Fragment>, separator: Option<Fragment>) -> Fragment {
    Fragment::single(Interpolation::List { items, separator })
}

/// Incremental fragment construction.
///
/// ```
/// use pg_collections::core::{quote_identifier, Fragment};
///
/// let stmt = Fragment::builder()
///     .sql("SELECT * FROM ")
///     .raw(quote_identifier("users").unwrap())
///     .sql(" WHERE ")
///     .raw(quote_identifier("login").unwrap())
///     .sql(" = ")
///     .bind("cevek")
///     .build()
///     .to_statement();
/// assert_eq!(stmt.sql, "SELECT * FROM \"users\" WHERE \"login\" = $1");
/// ```
#[derive(Debug, Clone)]
pub struct FragmentBuilder {
    parts: Vec<Cow<'static, str>>,
    interpolations: Vec<Interpolation>,
}

impl FragmentBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parts: vec![Cow::Borrowed("")],
            interpolations: Vec::new(),
        }
    }

    /// Append literal SQL text.
    #[must_use]
    pub fn sql(mut self, text: &'static str) -> Self {
        if let Some(last) = self.parts.last_mut() {
            if last.is_empty() {
                *last = Cow::Borrowed(text);
            } else {
                last.to_mut().push_str(text);
            }
        }
        self
    }

    #[must_use]
    pub fn raw(self, ident: RawIdentifier) -> Self {
        self.push(Interpolation::Raw(ident))
    }

    #[must_use]
    pub fn append(self, fragment: Fragment) -> Self {
        self.push(Interpolation::Fragment(fragment))
    }

    #[must_use]
    pub fn list(self, items: Vec<Fragment>, separator: Option<Fragment>) -> Self {
        self.push(Interpolation::List { items, separator })
    }

    #[must_use]
    pub fn bind(self, value: impl Into<SqlValue>) -> Self {
        self.push(Interpolation::Value(value.into()))
    }

    fn push(mut self, interpolation: Interpolation) -> Self {
        self.interpolations.push(interpolation);
        self.parts.push(Cow::Borrowed(""));
        self
    }

    #[must_use]
    pub fn build(self) -> Fragment {
        Fragment {
            parts: self.parts,
            interpolations: self.interpolations,
        }
    }
}

impl Default for FragmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::quote_identifier;

    fn ident(name: &str) -> RawIdentifier {
        quote_identifier(name).unwrap()
    }

    /// Count `$n` placeholders and check they are 1..=n in order.
    fn placeholders(sql: &str) -> Vec<usize> {
        let mut found = Vec::new();
        let bytes = sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    found.push(sql[start..end].parse().unwrap());
                }
                i = end.max(i + 1);
            } else {
                i += 1;
            }
        }
        found
    }

    #[test]
    fn test_from_parts_enforces_invariant() {
        let err = Fragment::from_parts(vec!["a", "b"], vec![]).unwrap_err();
        assert!(matches!(
            err,
            OrmError::MalformedFragment {
                parts: 2,
                interpolations: 0
            }
        ));
        let ok = Fragment::from_parts(vec!["a = ", ""], vec![Interpolation::Value(1.into())]);
        assert_eq!(ok.unwrap().to_statement().sql, "a = $1");
    }

    #[test]
    fn test_raw_identifier_is_not_parameterized() {
        let stmt = Fragment::raw(ident("users")).to_statement();
        assert_eq!(stmt.sql, "\"users\"");
        assert!(stmt.values.is_empty());
    }

    #[test]
    fn test_nested_numbering_is_left_to_right() {
        let inner = Fragment::builder().bind(2).sql(" + ").bind(3).build();
        let stmt = Fragment::builder()
            .sql("SELECT ")
            .bind(1)
            .sql(", (")
            .append(inner)
            .sql("), ")
            .bind(4)
            .build()
            .to_statement();
        assert_eq!(stmt.sql, "SELECT $1, ($2 + $3), $4");
        assert_eq!(
            stmt.values,
            vec![
                SqlValue::Int(1),
                SqlValue::Int(2),
                SqlValue::Int(3),
                SqlValue::Int(4)
            ]
        );
    }

    #[test]
    fn test_list_separator_only_between_items() {
        let single = join_fragments(vec![Fragment::value(1)], Some(Fragment::sql(", ")));
        assert_eq!(single.to_statement().sql, "$1");

        let many = join_fragments(
            vec![Fragment::value(1), Fragment::value(2), Fragment::value(3)],
            Some(Fragment::sql(", ")),
        );
        assert_eq!(many.to_statement().sql, "$1, $2, $3");

        let bare = join_fragments(vec![Fragment::sql("a"), Fragment::sql("b")], None);
        assert_eq!(bare.to_statement().sql, "ab");
    }

    #[test]
    fn test_separator_values_are_numbered_in_place() {
        let sep = Fragment::builder().sql(" ").bind("sep").sql(" ").build();
        let stmt =
            join_fragments(vec![Fragment::value(1), Fragment::value(2)], Some(sep)).to_statement();
        assert_eq!(stmt.sql, "$1 $2 $3");
        assert_eq!(stmt.values[1], SqlValue::Text("sep".into()));
    }

    #[test]
    fn test_values_count_matches_bound_interpolations() {
        let where_part = join_fragments(
            vec![
                Fragment::builder().raw(ident("age")).sql(" > ").bind(3).build(),
                Fragment::builder()
                    .raw(ident("age"))
                    .sql(" BETWEEN ")
                    .bind(5)
                    .sql(" AND ")
                    .bind(9)
                    .build(),
            ],
            Some(Fragment::sql(" AND ")),
        );
        let stmt = Fragment::builder()
            .sql("SELECT * FROM ")
            .raw(ident("users"))
            .sql(" WHERE ")
            .append(where_part)
            .sql(" LIMIT ")
            .bind(10)
            .build()
            .to_statement();
        assert_eq!(stmt.values.len(), 4);
        assert_eq!(placeholders(&stmt.sql), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_is_empty() {
        assert!(Fragment::empty().is_empty());
        assert!(join_fragments(vec![], Some(Fragment::sql(" AND "))).is_empty());
        assert!(!Fragment::sql("x").is_empty());
        assert!(!Fragment::value(1).is_empty());
    }

    #[test]
    fn test_builder_merges_adjacent_literals() {
        let fragment = Fragment::builder().sql("SELECT ").sql("1").build();
        assert_eq!(fragment.parts().len(), 1);
        assert_eq!(fragment.to_statement().sql, "SELECT 1");
    }
}
