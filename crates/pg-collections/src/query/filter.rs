//! The structured filter DSL.
//!
//! A [`Filter`] is either one field map ([`Where`], fields ANDed) or a list of
//! field maps ORed together. Each field holds a [`WhereValue`]: a literal
//! (implicit equality), an [`OperatorSet`], or a raw [`Fragment`] escape hatch.
//!
//! Filters can also be parsed from the JSON object form used by API callers:
//!
//! ```json
//! [{ "login": "cevek" }, { "age": { "gte": 18, "lt": 65 } }]
//! ```

use std::fmt;

use serde_json::Value as JsonValue;

use crate::core::{Fragment, SqlValue};
use crate::error::{OrmError, Result};

/// Underlying column type, deciding which operators apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Numeric,
    String,
    Date,
    Bool,
    Array,
    Json,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::String => "string",
            ColumnKind::Date => "date",
            ColumnKind::Bool => "boolean",
            ColumnKind::Array => "array",
            ColumnKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// Column declaration used to validate filters and selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    #[must_use]
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind }
    }
}

/// One comparison inside an operator set.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq(SqlValue),
    Ne(SqlValue),
    Gt(SqlValue),
    Gte(SqlValue),
    Lt(SqlValue),
    Lte(SqlValue),
    Between(SqlValue, SqlValue),
    NotBetween(SqlValue, SqlValue),
    In(SqlValue),
    NotIn(SqlValue),
    Like(SqlValue),
    NotLike(SqlValue),
    ILike(SqlValue),
    NotILike(SqlValue),
    Regexp(SqlValue),
    NotRegexp(SqlValue),
    IRegexp(SqlValue),
    NotIRegexp(SqlValue),
    Contains(SqlValue),
    Contained(SqlValue),
    Overlap(SqlValue),
}

impl Operator {
    /// The DSL key of the operator.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Operator::Eq(_) => "eq",
            Operator::Ne(_) => "ne",
            Operator::Gt(_) => "gt",
            Operator::Gte(_) => "gte",
            Operator::Lt(_) => "lt",
            Operator::Lte(_) => "lte",
            Operator::Between(..) => "between",
            Operator::NotBetween(..) => "notBetween",
            Operator::In(_) => "in",
            Operator::NotIn(_) => "notIn",
            Operator::Like(_) => "like",
            Operator::NotLike(_) => "notLike",
            Operator::ILike(_) => "iLike",
            Operator::NotILike(_) => "notILike",
            Operator::Regexp(_) => "regexp",
            Operator::NotRegexp(_) => "notRegexp",
            Operator::IRegexp(_) => "iRegexp",
            Operator::NotIRegexp(_) => "notIRegexp",
            Operator::Contains(_) => "contains",
            Operator::Contained(_) => "contained",
            Operator::Overlap(_) => "overlap",
        }
    }

    /// Whether the operator is defined for a column of `kind`.
    #[must_use]
    pub fn applies_to(&self, kind: ColumnKind) -> bool {
        let comparison = matches!(
            self,
            Operator::Eq(_)
                | Operator::Ne(_)
                | Operator::Gt(_)
                | Operator::Gte(_)
                | Operator::Lt(_)
                | Operator::Lte(_)
        );
        let range = matches!(self, Operator::Between(..) | Operator::NotBetween(..));
        let membership = matches!(self, Operator::In(_) | Operator::NotIn(_));
        let pattern = matches!(
            self,
            Operator::Like(_)
                | Operator::NotLike(_)
                | Operator::ILike(_)
                | Operator::NotILike(_)
                | Operator::Regexp(_)
                | Operator::NotRegexp(_)
                | Operator::IRegexp(_)
                | Operator::NotIRegexp(_)
        );
        let set = matches!(
            self,
            Operator::Contains(_) | Operator::Contained(_) | Operator::Overlap(_)
        );

        match kind {
            ColumnKind::Numeric => comparison || range || membership,
            ColumnKind::String => comparison || range || membership || pattern,
            ColumnKind::Date => comparison || range,
            ColumnKind::Bool => matches!(self, Operator::Eq(_) | Operator::Ne(_)),
            ColumnKind::Array => comparison || set,
            ColumnKind::Json => matches!(
                self,
                Operator::Eq(_) | Operator::Ne(_) | Operator::Contains(_) | Operator::Contained(_)
            ),
        }
    }

    /// Parse one `key: value` pair of a JSON operator object.
    pub fn parse(field: &str, key: &str, value: &JsonValue) -> Result<Self> {
        let v = || SqlValue::from_json(value);
        let op = match key {
            "eq" => Operator::Eq(v()),
            "ne" => Operator::Ne(v()),
            "gt" => Operator::Gt(v()),
            "gte" => Operator::Gte(v()),
            "lt" => Operator::Lt(v()),
            "lte" => Operator::Lte(v()),
            "between" | "notBetween" => {
                let (low, high) = match value.as_array().map(Vec::as_slice) {
                    Some([low, high]) => (SqlValue::from_json(low), SqlValue::from_json(high)),
                    _ => {
                        return Err(OrmError::InvalidFilter(format!(
                            "{}.{} expects a two-element array, got {}",
                            field, key, value
                        )))
                    }
                };
                if key == "between" {
                    Operator::Between(low, high)
                } else {
                    Operator::NotBetween(low, high)
                }
            }
            "in" => Operator::In(v()),
            "notIn" => Operator::NotIn(v()),
            "like" => Operator::Like(v()),
            "notLike" => Operator::NotLike(v()),
            "iLike" => Operator::ILike(v()),
            "notILike" => Operator::NotILike(v()),
            "regexp" => Operator::Regexp(v()),
            "notRegexp" => Operator::NotRegexp(v()),
            "iRegexp" => Operator::IRegexp(v()),
            "notIRegexp" => Operator::NotIRegexp(v()),
            "contains" => Operator::Contains(v()),
            "contained" => Operator::Contained(v()),
            "overlap" => Operator::Overlap(v()),
            other => {
                return Err(OrmError::UnknownOperator {
                    field: field.to_string(),
                    operator: other.to_string(),
                })
            }
        };
        Ok(op)
    }
}

/// The operators applied to one field, ANDed. One entry per operator key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorSet(Vec<Operator>);

macro_rules! single_operators {
    ($($method:ident => $variant:ident),* $(,)?) => {
        $(
            #[must_use]
            pub fn $method(self, value: impl Into<SqlValue>) -> Self {
                self.with(Operator::$variant(value.into()))
            }
        )*
    };
}

impl OperatorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operator, replacing an earlier one with the same key.
    #[must_use]
    pub fn with(mut self, op: Operator) -> Self {
        match self.0.iter_mut().find(|existing| existing.key() == op.key()) {
            Some(existing) => *existing = op,
            None => self.0.push(op),
        }
        self
    }

    single_operators! {
        eq => Eq,
        ne => Ne,
        gt => Gt,
        gte => Gte,
        lt => Lt,
        lte => Lte,
        is_in => In,
        not_in => NotIn,
        like => Like,
        not_like => NotLike,
        ilike => ILike,
        not_ilike => NotILike,
        regexp => Regexp,
        not_regexp => NotRegexp,
        iregexp => IRegexp,
        not_iregexp => NotIRegexp,
        contains => Contains,
        contained => Contained,
        overlap => Overlap,
    }

    #[must_use]
    pub fn between(self, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> Self {
        self.with(Operator::Between(low.into(), high.into()))
    }

    #[must_use]
    pub fn not_between(self, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> Self {
        self.with(Operator::NotBetween(low.into(), high.into()))
    }

    #[must_use]
    pub fn operators(&self) -> &[Operator] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Value side of one field in a [`Where`] map.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereValue {
    /// `field = value`
    Literal(SqlValue),
    /// One comparison per operator, ANDed.
    Operators(OperatorSet),
    /// Inserted as-is and ANDed with the rest; the field name is only a label.
    Raw(Fragment),
}

/// A field map: every entry must hold (AND).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where(Vec<(String, WhereValue)>);

impl Where {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the condition for `field`, replacing any earlier one.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>, value: WhereValue) -> Self {
        let field = field.into();
        match self.0.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.0.push((field, value)),
        }
        self
    }

    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.field(field, WhereValue::Literal(value.into()))
    }

    #[must_use]
    pub fn ops(self, field: impl Into<String>, ops: OperatorSet) -> Self {
        self.field(field, WhereValue::Operators(ops))
    }

    #[must_use]
    pub fn raw(self, label: impl Into<String>, fragment: Fragment) -> Self {
        self.field(label, WhereValue::Raw(fragment))
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, WhereValue)] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn from_json_object(map: &serde_json::Map<String, JsonValue>) -> Result<Self> {
        let mut clause = Where::new();
        for (field, value) in map {
            clause = match value {
                JsonValue::Object(ops) => {
                    let mut set = OperatorSet::new();
                    for (key, operand) in ops {
                        set = set.with(Operator::parse(field, key, operand)?);
                    }
                    clause.ops(field.clone(), set)
                }
                other => clause.eq(field.clone(), SqlValue::from_json(other)),
            };
        }
        Ok(clause)
    }
}

/// A where-expression: one field map, or several ORed together.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Where(Where),
    Any(Vec<Where>),
}

impl Filter {
    /// The filter that matches every row.
    #[must_use]
    pub fn all() -> Self {
        Filter::Where(Where::new())
    }

    #[must_use]
    pub fn any(clauses: Vec<Where>) -> Self {
        Filter::Any(clauses)
    }

    /// Parse the JSON object (AND) or array-of-objects (OR) form.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(map) => Ok(Filter::Where(Where::from_json_object(map)?)),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    JsonValue::Object(map) => Where::from_json_object(map),
                    other => Err(OrmError::InvalidFilter(format!(
                        "OR elements must be objects, got {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Filter::Any),
            other => Err(OrmError::InvalidFilter(format!(
                "expected an object or an array of objects, got {}",
                other
            ))),
        }
    }

    /// Human-readable rendering for not-found errors.
    #[must_use]
    pub fn describe(&self) -> String {
        fn describe_where(clause: &Where) -> String {
            let fields: Vec<String> = clause
                .entries()
                .iter()
                .map(|(name, value)| match value {
                    WhereValue::Literal(v) => format!("{:?}:{}", name, v.to_json()),
                    WhereValue::Operators(set) => {
                        let ops: Vec<&str> = set.operators().iter().map(Operator::key).collect();
                        format!("{:?}:{{{}}}", name, ops.join(","))
                    }
                    WhereValue::Raw(_) => format!("{:?}:<sql>", name),
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        match self {
            Filter::Where(clause) => describe_where(clause),
            Filter::Any(clauses) => {
                let parts: Vec<String> = clauses.iter().map(describe_where).collect();
                format!("[{}]", parts.join(","))
            }
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Where> for Filter {
    fn from(clause: Where) -> Self {
        Filter::Where(clause)
    }
}

impl From<Vec<Where>> for Filter {
    fn from(clauses: Vec<Where>) -> Self {
        Filter::Any(clauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_object_filter() {
        let filter =
            Filter::from_json(&json!({"login": "cevek", "age": {"gt": 3, "lte": 9}})).unwrap();
        let Filter::Where(clause) = filter else {
            panic!("expected a field map");
        };
        assert_eq!(clause.entries().len(), 2);
        let age = clause.entries().iter().find(|(name, _)| name == "age").unwrap();
        match &age.1 {
            WhereValue::Operators(set) => assert_eq!(set.operators().len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_array_filter_is_or() {
        let filter = Filter::from_json(&json!([{"id": "1"}, {"name": "x"}])).unwrap();
        assert!(matches!(filter, Filter::Any(ref v) if v.len() == 2));
    }

    #[test]
    fn test_array_literal_is_equality_not_operators() {
        let filter = Filter::from_json(&json!({"todos": ["a"]})).unwrap();
        let Filter::Where(clause) = filter else {
            panic!("expected a field map");
        };
        assert!(matches!(clause.entries()[0].1, WhereValue::Literal(SqlValue::Array(_))));
    }

    #[test]
    fn test_unknown_operator_is_error() {
        let err = Filter::from_json(&json!({"age": {"gtt": 3}})).unwrap_err();
        assert!(matches!(err, OrmError::UnknownOperator { ref operator, .. } if operator == "gtt"));
    }

    #[test]
    fn test_between_requires_pair() {
        assert!(Filter::from_json(&json!({"age": {"between": [1]}})).is_err());
        assert!(Filter::from_json(&json!({"age": {"between": [1, 2]}})).is_ok());
    }

    #[test]
    fn test_scalar_filter_is_error() {
        assert!(matches!(
            Filter::from_json(&json!(42)),
            Err(OrmError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_operator_set_keeps_one_per_key() {
        let set = OperatorSet::new().gt(1).gt(5).lt(10);
        assert_eq!(set.operators(), &[Operator::Gt(5.into()), Operator::Lt(10.into())]);
    }

    #[test]
    fn test_where_field_replaces() {
        let clause = Where::new().eq("login", "a").eq("login", "b");
        assert_eq!(clause.entries().len(), 1);
        assert_eq!(clause.entries()[0].1, WhereValue::Literal("b".into()));
    }

    #[test]
    fn test_operator_categories() {
        assert!(Operator::Like("x".into()).applies_to(ColumnKind::String));
        assert!(!Operator::Like("x".into()).applies_to(ColumnKind::Numeric));
        assert!(Operator::Contains(SqlValue::Null).applies_to(ColumnKind::Array));
        assert!(!Operator::In(SqlValue::Null).applies_to(ColumnKind::Date));
        assert!(Operator::Between(1.into(), 2.into()).applies_to(ColumnKind::Date));
        assert!(!Operator::Gt(true.into()).applies_to(ColumnKind::Bool));
    }

    #[test]
    fn test_describe() {
        let filter = Filter::from(Where::new().eq("login", "cevek"));
        assert_eq!(filter.describe(), "{\"login\":\"cevek\"}");
    }
}
