//! Typed CRUD handle over one table.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::core::{join_fragments, Fragment, Id, Row, SqlValue};
use crate::db::executor::QueryExecutor;
use crate::error::{OrmError, Result};
use crate::loader::CoalescingLoader;
use crate::query::{
    Column, CreateOptions, Filter, FilterCompiler, FindOptions, OnConflict, OperatorSet, Patch,
    PatchValue, Where,
};

/// A record type stored in its own table.
///
/// The serialized form of the type is its row: field names are column names
/// and the `id` field holds the [`Id`].
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table name, also the registry key.
    const TABLE: &'static str;

    fn id(&self) -> &Id;

    /// Declared columns. When non-empty, filters, selections and patches are
    /// checked against them.
    fn columns() -> &'static [Column] {
        &[]
    }
}

/// Generate a positive 63-bit id from 8 random bytes.
#[must_use]
pub fn generate_id() -> Id {
    loop {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        bytes[0] &= 0x7f;
        let id = i64::from_be_bytes(bytes);
        if id != 0 {
            return Id::from(id);
        }
    }
}

pub struct Collection<T: Entity> {
    compiler: FilterCompiler,
    executor: Arc<dyn QueryExecutor>,
    loader: CoalescingLoader<i64, Row>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Collection<T> {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Result<Self> {
        let compiler = FilterCompiler::new(T::TABLE, T::columns())?;
        let loader = {
            let executor = executor.clone();
            let compiler = compiler.clone();
            CoalescingLoader::new(move |ids: Vec<i64>| {
                let executor = executor.clone();
                let compiler = compiler.clone();
                async move { fetch_by_ids(executor.as_ref(), &compiler, ids).await }
            })
        };
        Ok(Self {
            compiler,
            executor,
            loader,
            _entity: PhantomData,
        })
    }

    /// The quoted table name.
    #[must_use]
    pub fn name(&self) -> Fragment {
        Fragment::raw(self.compiler.table().clone())
    }

    /// `"table"."field"`, for projections and raw conditions.
    pub fn field(&self, name: &str) -> Result<Fragment> {
        Ok(Fragment::builder()
            .raw(self.compiler.table().clone())
            .sql(".")
            .raw(self.compiler.column(name)?)
            .build())
    }

    #[must_use]
    pub fn gen_id(&self) -> Id {
        generate_id()
    }

    fn table_name(&self) -> &str {
        self.compiler.table().name()
    }

    fn decode<R: DeserializeOwned>(&self, row: Row) -> Result<R> {
        serde_json::from_value(JsonValue::Object(row)).map_err(|e| OrmError::Decode {
            collection: self.table_name().to_string(),
            message: e.to_string(),
        })
    }

    fn id_condition(id: &Id) -> String {
        JsonValue::String(id.as_str().to_string()).to_string()
    }

    // --- reads ---

    pub async fn find_by_id(&self, id: &Id) -> Result<T> {
        self.find_by_id_as(id, &FindOptions::default()).await
    }

    pub async fn find_by_id_as<R: DeserializeOwned>(
        &self,
        id: &Id,
        opts: &FindOptions,
    ) -> Result<R> {
        self.find_by_id_or_null_as(id, opts)
            .await?
            .ok_or_else(|| OrmError::not_found(self.table_name(), Self::id_condition(id)))
    }

    pub async fn find_by_id_or_null(&self, id: &Id) -> Result<Option<T>> {
        self.find_by_id_or_null_as(id, &FindOptions::default()).await
    }

    /// Point lookup. Ids that are not positive integers resolve to `None`
    /// without a query. Plain lookups are batched through the loader; a
    /// selection bypasses it.
    pub async fn find_by_id_or_null_as<R: DeserializeOwned>(
        &self,
        id: &Id,
        opts: &FindOptions,
    ) -> Result<Option<R>> {
        let Some(key) = id.as_i64() else {
            return Ok(None);
        };
        if !opts.has_selection() {
            return self
                .loader
                .load(key)
                .await?
                .map(|row| self.decode(row))
                .transpose();
        }
        let selection = FindOptions {
            select: opts.select.clone(),
            projections: opts.projections.clone(),
            ..FindOptions::default()
        };
        self.find_one_or_null_as(Where::new().eq("id", id), &selection)
            .await
    }

    pub async fn find_one(&self, filter: impl Into<Filter>) -> Result<T> {
        self.find_one_as(filter, &FindOptions::default()).await
    }

    pub async fn find_one_as<R: DeserializeOwned>(
        &self,
        filter: impl Into<Filter>,
        opts: &FindOptions,
    ) -> Result<R> {
        let filter = filter.into();
        let condition = filter.describe();
        self.find_one_or_null_as(filter, opts)
            .await?
            .ok_or_else(|| OrmError::not_found(self.table_name(), condition))
    }

    pub async fn find_one_or_null(&self, filter: impl Into<Filter>) -> Result<Option<T>> {
        self.find_one_or_null_as(filter, &FindOptions::default()).await
    }

    pub async fn find_one_or_null_as<R: DeserializeOwned>(
        &self,
        filter: impl Into<Filter>,
        opts: &FindOptions,
    ) -> Result<Option<R>> {
        let opts = opts.clone().limit(1);
        Ok(self.find_all_as(filter, &opts).await?.into_iter().next())
    }

    pub async fn find_all(&self, filter: impl Into<Filter>, opts: &FindOptions) -> Result<Vec<T>> {
        self.find_all_as(filter, opts).await
    }

    pub async fn find_all_as<R: DeserializeOwned>(
        &self,
        filter: impl Into<Filter>,
        opts: &FindOptions,
    ) -> Result<Vec<R>> {
        let rows = self.find_rows(&filter.into(), opts).await?;
        rows.into_iter().map(|row| self.decode(row)).collect()
    }

    /// Untyped read, returning rows as column maps.
    pub async fn find_rows(&self, filter: &Filter, opts: &FindOptions) -> Result<Vec<Row>> {
        let query = self.compiler.compile_select(filter, opts)?;
        self.executor.query(&query).await
    }

    // --- writes ---

    pub async fn update(&self, id: &Id, patch: Patch) -> Result<()> {
        if patch.is_empty() {
            return Err(OrmError::EmptyPatch {
                collection: self.table_name().to_string(),
            });
        }

        let mut assignments = Vec::with_capacity(patch.entries().len());
        for (field, value) in patch.entries() {
            let column = self.compiler.column(field)?;
            let lhs = Fragment::builder().raw(column.clone()).sql(" = ");
            assignments.push(match value {
                PatchValue::Literal(v) => lhs.bind(v.clone()).build(),
                PatchValue::Increment(by) => lhs.raw(column).sql(" + ").bind(by.clone()).build(),
                PatchValue::Decrement(by) => lhs.raw(column).sql(" - ").bind(by.clone()).build(),
                PatchValue::Raw(fragment) => lhs.append(fragment.clone()).build(),
            });
        }

        let query = Fragment::builder()
            .sql("UPDATE ")
            .raw(self.compiler.table().clone())
            .sql(" SET ")
            .list(assignments, Some(Fragment::sql(", ")))
            .sql(" WHERE \"id\" = ")
            .bind(id)
            .build();
        self.executor.query(&query).await?;
        Ok(())
    }

    /// Update from any value serializing to an object of the changed fields.
    pub async fn update_with<P: Serialize + ?Sized>(&self, id: &Id, partial: &P) -> Result<()> {
        self.update(id, Patch::from_serialize(partial)?).await
    }

    pub async fn remove(&self, id: &Id) -> Result<()> {
        let query = Fragment::builder()
            .sql("DELETE FROM ")
            .raw(self.compiler.table().clone())
            .sql(" WHERE \"id\" = ")
            .bind(id)
            .build();
        self.executor.query(&query).await?;
        Ok(())
    }

    /// Insert `data`, generating the id when it is [`Id::auto`]. Returns the
    /// id the row was written with.
    pub async fn create(&self, data: &T, opts: &CreateOptions) -> Result<Id> {
        let id = if data.id().is_auto() {
            self.gen_id()
        } else {
            data.id().clone()
        };

        let mut row = match serde_json::to_value(data)? {
            JsonValue::Object(map) => map,
            other => {
                return Err(OrmError::Decode {
                    collection: self.table_name().to_string(),
                    message: format!("entity must serialize to an object, got {}", other),
                })
            }
        };
        row.insert("id".to_string(), JsonValue::String(id.as_str().to_string()));

        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (field, value) in &row {
            columns.push(Fragment::raw(self.compiler.column(field)?));
            values.push(Fragment::value(SqlValue::from_json(value)));
        }

        let on_conflict = match &opts.on_conflict {
            OnConflict::Fail => Fragment::empty(),
            OnConflict::Ignore => Fragment::sql(" ON CONFLICT DO NOTHING"),
            OnConflict::IgnoreOn(field) => Fragment::builder()
                .sql(" ON CONFLICT (")
                .raw(self.compiler.column(field)?)
                .sql(") DO NOTHING")
                .build(),
            OnConflict::IgnoreOnTarget(target) => Fragment::builder()
                .sql(" ON CONFLICT (")
                .append(target.clone())
                .sql(") DO NOTHING")
                .build(),
        };

        let query = Fragment::builder()
            .sql("INSERT INTO ")
            .raw(self.compiler.table().clone())
            .sql(" (")
            .append(join_fragments(columns, Some(Fragment::sql(", "))))
            .sql(") VALUES (")
            .append(join_fragments(values, Some(Fragment::sql(", "))))
            .sql(")")
            .append(on_conflict)
            .build();
        self.executor.query(&query).await?;
        Ok(id)
    }
}

/// The loader's batch: one `= ANY` query for every pending id.
async fn fetch_by_ids(
    executor: &dyn QueryExecutor,
    compiler: &FilterCompiler,
    ids: Vec<i64>,
) -> Result<HashMap<i64, Row>> {
    let filter = Filter::from(Where::new().ops("id", OperatorSet::new().is_in(ids)));
    let query = compiler.compile_select(&filter, &FindOptions::default())?;
    let rows = executor.query(&query).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let key = row.get("id").and_then(Id::from_json)?.as_i64()?;
            Some((key, row))
        })
        .collect())
}
