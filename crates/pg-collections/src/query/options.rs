//! Options for reads, updates and inserts.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::core::{Fragment, SqlValue};
use crate::error::{OrmError, Result};

/// Sort order. When both directions are set, `asc` wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order {
    pub asc: Option<String>,
    pub desc: Option<String>,
}

impl Order {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            asc: Some(field.into()),
            desc: None,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            asc: None,
            desc: Some(field.into()),
        }
    }
}

/// A computed column: `(<fragment>) AS "<alias>"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub alias: String,
    pub fragment: Fragment,
}

/// Selection, ordering and paging for a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub select: Vec<String>,
    pub projections: Vec<Projection>,
    pub order: Option<Order>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl FindOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn project(mut self, alias: impl Into<String>, fragment: Fragment) -> Self {
        self.projections.push(Projection {
            alias: alias.into(),
            fragment,
        });
        self
    }

    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether the read asks for a column subset or computed columns.
    #[must_use]
    pub fn has_selection(&self) -> bool {
        !self.select.is_empty() || !self.projections.is_empty()
    }
}

/// Right-hand side of one `SET` assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// `field = value`
    Literal(SqlValue),
    /// `field = field + n`
    Increment(SqlValue),
    /// `field = field - n`
    Decrement(SqlValue),
    /// `field = <fragment>`
    Raw(Fragment),
}

/// Ordered field assignments for `update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch(Vec<(String, PatchValue)>);

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn assign(mut self, field: String, value: PatchValue) -> Self {
        match self.0.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.0.push((field, value)),
        }
        self
    }

    #[must_use]
    pub fn set(self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.assign(field.into(), PatchValue::Literal(value.into()))
    }

    #[must_use]
    pub fn increment(self, field: impl Into<String>, by: impl Into<SqlValue>) -> Self {
        self.assign(field.into(), PatchValue::Increment(by.into()))
    }

    #[must_use]
    pub fn decrement(self, field: impl Into<String>, by: impl Into<SqlValue>) -> Self {
        self.assign(field.into(), PatchValue::Decrement(by.into()))
    }

    #[must_use]
    pub fn raw(self, field: impl Into<String>, fragment: Fragment) -> Self {
        self.assign(field.into(), PatchValue::Raw(fragment))
    }

    /// Build a literal patch from any value that serializes to a JSON object.
    ///
    /// `null` members are kept and set the column to `NULL`; skip them with
    /// `#[serde(skip_serializing_if = "Option::is_none")]` to leave a column
    /// untouched.
    pub fn from_serialize<P: Serialize + ?Sized>(partial: &P) -> Result<Self> {
        match serde_json::to_value(partial)? {
            JsonValue::Object(map) => {
                Ok(map.into_iter().fold(Patch::new(), |patch, (field, value)| {
                    patch.assign(field, PatchValue::Literal(SqlValue::from_json(&value)))
                }))
            }
            other => Err(OrmError::InvalidFilter(format!(
                "a patch must serialize to an object, got {}",
                other
            ))),
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, PatchValue)] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Conflict handling for `create`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OnConflict {
    /// Constraint violations surface as query errors.
    #[default]
    Fail,
    /// `ON CONFLICT DO NOTHING`
    Ignore,
    /// `ON CONFLICT ("field") DO NOTHING`
    IgnoreOn(String),
    /// `ON CONFLICT (<fragment>) DO NOTHING`
    IgnoreOnTarget(Fragment),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOptions {
    pub on_conflict: OnConflict,
}

impl CreateOptions {
    #[must_use]
    pub fn ignore_conflicts() -> Self {
        Self {
            on_conflict: OnConflict::Ignore,
        }
    }

    #[must_use]
    pub fn ignore_conflicts_on(field: impl Into<String>) -> Self {
        Self {
            on_conflict: OnConflict::IgnoreOn(field.into()),
        }
    }
}
