//! Compilation of filters and read options into SQL fragments.

use crate::core::{join_fragments, quote_identifier, Fragment, RawIdentifier, SqlValue};
use crate::error::{OrmError, Result};

use super::filter::{Column, ColumnKind, Filter, Operator, OperatorSet, Where, WhereValue};
use super::options::{FindOptions, Projection};

/// Compiles filters and options for one table.
///
/// When the table declares its columns, every referenced field is checked
/// against them before any SQL is produced.
#[derive(Debug, Clone)]
pub struct FilterCompiler {
    table: RawIdentifier,
    columns: &'static [Column],
}

impl FilterCompiler {
    pub fn new(table: &str, columns: &'static [Column]) -> Result<Self> {
        Ok(Self {
            table: quote_identifier(table)?,
            columns,
        })
    }

    #[must_use]
    pub fn table(&self) -> &RawIdentifier {
        &self.table
    }

    /// Quote a field name, checking it against the declared columns.
    pub fn column(&self, field: &str) -> Result<RawIdentifier> {
        self.resolve(field).map(|(ident, _)| ident)
    }

    fn resolve(&self, field: &str) -> Result<(RawIdentifier, Option<ColumnKind>)> {
        let ident = quote_identifier(field)?;
        if self.columns.is_empty() {
            return Ok((ident, None));
        }
        match self.columns.iter().find(|c| c.name == field) {
            Some(column) => Ok((ident, Some(column.kind))),
            None => Err(OrmError::UnknownColumn {
                collection: self.table.name().to_string(),
                field: field.to_string(),
            }),
        }
    }

    /// The condition of a filter, without the `WHERE` keyword.
    ///
    /// An empty field map or an empty OR list compiles to an empty fragment.
    pub fn compile_where(&self, filter: &Filter) -> Result<Fragment> {
        match filter {
            Filter::Where(clause) => self.compile_map(clause),
            Filter::Any(clauses) => {
                let items = clauses
                    .iter()
                    .map(|clause| {
                        let inner = self.compile_map(clause)?;
                        Ok(if inner.is_empty() {
                            Fragment::sql("(TRUE)")
                        } else {
                            Fragment::builder().sql("(").append(inner).sql(")").build()
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(join_fragments(items, Some(Fragment::sql(" OR "))))
            }
        }
    }

    /// ` WHERE <condition>`, or nothing when the filter matches every row.
    pub fn where_clause(&self, filter: &Filter) -> Result<Fragment> {
        let condition = self.compile_where(filter)?;
        if condition.is_empty() {
            return Ok(Fragment::empty());
        }
        Ok(Fragment::builder().sql(" WHERE ").append(condition).build())
    }

    fn compile_map(&self, clause: &Where) -> Result<Fragment> {
        let mut items = Vec::new();
        for (field, value) in clause.entries() {
            match value {
                WhereValue::Raw(fragment) => {
                    if !fragment.is_empty() {
                        items.push(fragment.clone());
                    }
                }
                WhereValue::Literal(literal) => {
                    let (ident, _) = self.resolve(field)?;
                    items.push(
                        Fragment::builder()
                            .raw(ident)
                            .sql(" = ")
                            .bind(literal.clone())
                            .build(),
                    );
                }
                WhereValue::Operators(set) => {
                    let (ident, kind) = self.resolve(field)?;
                    self.check_operators(field, kind, set)?;
                    items.extend(set.operators().iter().map(|op| compile_operator(&ident, op)));
                }
            }
        }
        Ok(join_fragments(items, Some(Fragment::sql(" AND "))))
    }

    fn check_operators(
        &self,
        field: &str,
        kind: Option<ColumnKind>,
        set: &OperatorSet,
    ) -> Result<()> {
        let Some(kind) = kind else {
            return Ok(());
        };
        match set.operators().iter().find(|op| !op.applies_to(kind)) {
            Some(op) => Err(OrmError::OperatorMismatch {
                field: field.to_string(),
                operator: op.key().to_string(),
                kind: kind.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// ` ORDER BY "f" ASC|DESC`, ` LIMIT $n`, ` OFFSET $n`, each when present.
    pub fn compile_order_limit_offset(&self, opts: &FindOptions) -> Result<Fragment> {
        let mut builder = Fragment::builder();
        if let Some(order) = &opts.order {
            if let Some(field) = &order.asc {
                builder = builder.sql(" ORDER BY ").raw(self.column(field)?).sql(" ASC");
            } else if let Some(field) = &order.desc {
                builder = builder.sql(" ORDER BY ").raw(self.column(field)?).sql(" DESC");
            }
        }
        if let Some(limit) = opts.limit {
            builder = builder.sql(" LIMIT ").bind(limit);
        }
        if let Some(offset) = opts.offset {
            builder = builder.sql(" OFFSET ").bind(offset);
        }
        Ok(builder.build())
    }

    /// The select list: `*`, or quoted columns followed by projections.
    pub fn compile_fields(
        &self,
        select: &[String],
        projections: &[Projection],
    ) -> Result<Fragment> {
        if select.is_empty() && projections.is_empty() {
            return Ok(Fragment::sql("*"));
        }
        let mut items = Vec::with_capacity(select.len() + projections.len() + 1);
        if select.is_empty() {
            items.push(Fragment::sql("*"));
        }
        for field in select {
            items.push(Fragment::raw(self.column(field)?));
        }
        for projection in projections {
            items.push(
                Fragment::builder()
                    .sql("(")
                    .append(projection.fragment.clone())
                    .sql(") AS ")
                    .raw(quote_identifier(&projection.alias)?)
                    .build(),
            );
        }
        Ok(join_fragments(items, Some(Fragment::sql(", "))))
    }

    /// `SELECT <fields> FROM <table> [WHERE ...] [ORDER BY ...] [LIMIT ...] [OFFSET ...]`
    pub fn compile_select(&self, filter: &Filter, opts: &FindOptions) -> Result<Fragment> {
        Ok(Fragment::builder()
            .sql("SELECT ")
            .append(self.compile_fields(&opts.select, &opts.projections)?)
            .sql(" FROM ")
            .raw(self.table.clone())
            .append(self.where_clause(filter)?)
            .append(self.compile_order_limit_offset(opts)?)
            .build())
    }
}

fn compile_operator(field: &RawIdentifier, op: &Operator) -> Fragment {
    let lhs = Fragment::builder().raw(field.clone());
    let binary = |sql: &'static str, value: SqlValue| lhs.clone().sql(sql).bind(value).build();
    let any = |sql: &'static str, value: SqlValue| {
        lhs.clone().sql(sql).bind(value).sql(")").build()
    };

    match op {
        Operator::Eq(v) => binary(" = ", v.clone()),
        Operator::Ne(v) => binary(" <> ", v.clone()),
        Operator::Gt(v) => binary(" > ", v.clone()),
        Operator::Gte(v) => binary(" >= ", v.clone()),
        Operator::Lt(v) => binary(" < ", v.clone()),
        Operator::Lte(v) => binary(" <= ", v.clone()),
        Operator::Between(low, high) => lhs
            .clone()
            .sql(" BETWEEN ")
            .bind(low.clone())
            .sql(" AND ")
            .bind(high.clone())
            .build(),
        Operator::NotBetween(low, high) => lhs
            .clone()
            .sql(" NOT BETWEEN ")
            .bind(low.clone())
            .sql(" AND ")
            .bind(high.clone())
            .build(),
        Operator::In(v) => any(" = ANY(", v.clone()),
        Operator::NotIn(v) => any(" <> ANY(", v.clone()),
        Operator::Like(v) => binary(" LIKE ", v.clone()),
        Operator::NotLike(v) => binary(" NOT LIKE ", v.clone()),
        Operator::ILike(v) => binary(" ILIKE ", v.clone()),
        Operator::NotILike(v) => binary(" NOT ILIKE ", v.clone()),
        Operator::Regexp(v) => binary(" ~ ", v.clone()),
        Operator::NotRegexp(v) => binary(" !~ ", v.clone()),
        Operator::IRegexp(v) => binary(" ~* ", v.clone()),
        Operator::NotIRegexp(v) => binary(" !~* ", v.clone()),
        Operator::Contains(v) => binary(" @> ", v.clone()),
        Operator::Contained(v) => binary(" <@ ", v.clone()),
        Operator::Overlap(v) => binary(" && ", v.clone()),
    }
}
