//! Query building and execution for runtime models
//!
//! [`ModelQuery`] is a consuming builder producing parameterized Postgres SQL
//! (`$n` placeholders); [`BoundModel`] ties a model definition to a database
//! handle and exposes the shortcut query methods, each a passthrough to the
//! equivalent builder call on a fresh query.
//!
//! Rows hydrate to `serde_json::Value` maps since models are described at
//! runtime rather than as typed structs.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Pool, Postgres, Row, TypeInfo};

use crate::database::{DatabaseHandle, ServerContext};
use crate::error::{translate_db_error, ModelError, ModelResult, QueryError};
use crate::model::{ModelDefinition, NotFoundMode, RelationKind, RelationTarget};

/// Query operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Patch,
    Upsert,
    Delete,
}

/// A model definition bound to a database connection.
#[derive(Debug, Clone)]
pub struct BoundModel {
    def: Arc<ModelDefinition>,
    db: DatabaseHandle,
}

impl BoundModel {
    pub(crate) fn new(def: Arc<ModelDefinition>, db: DatabaseHandle) -> Self {
        Self { def, db }
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        &self.def
    }

    pub fn db(&self) -> &DatabaseHandle {
        &self.db
    }

    /// Owning server, when the model was decorated with server injection.
    pub fn server(&self) -> Option<&Arc<dyn ServerContext>> {
        self.def.server.as_ref()
    }

    /// Fresh query builder over this model's table and connection.
    pub fn query(&self) -> ModelQuery {
        ModelQuery::for_model(Arc::clone(&self.def)).with_db(self.db.clone())
    }

    fn shortcut(&self, method: &'static str) -> ModelResult<ModelQuery> {
        if !self.def.shortcut_methods {
            return Err(QueryError::UnsupportedOperation(format!(
                "shortcut method '{}' is not enabled for model '{}'",
                method, self.def.table
            ))
            .into());
        }
        Ok(self.query())
    }

    pub fn find_by_id(&self, id: impl Into<Value>) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("findById")?.find_by_id(id))
    }

    pub fn find_by_ids(&self, ids: Vec<Value>) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("findByIds")?.find_by_ids(ids))
    }

    pub fn find_one(&self, filter: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("findOne")?.find_one(filter))
    }

    pub fn insert(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("insert")?.insert(payload))
    }

    pub fn insert_and_fetch(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("insertAndFetch")?.insert_and_fetch(payload))
    }

    pub fn insert_graph(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("insertGraph")?.insert_graph(payload))
    }

    pub fn insert_graph_and_fetch(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self
            .shortcut("insertGraphAndFetch")?
            .insert_graph_and_fetch(payload))
    }

    pub fn update(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("update")?.update(payload))
    }

    pub fn update_and_fetch(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("updateAndFetch")?.update_and_fetch(payload))
    }

    pub fn update_and_fetch_by_id(
        &self,
        id: impl Into<Value>,
        payload: Value,
    ) -> ModelResult<ModelQuery> {
        Ok(self
            .shortcut("updateAndFetchById")?
            .update_and_fetch_by_id(id, payload))
    }

    pub fn upsert_graph(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("upsertGraph")?.upsert_graph(payload))
    }

    pub fn upsert_graph_and_fetch(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self
            .shortcut("upsertGraphAndFetch")?
            .upsert_graph_and_fetch(payload))
    }

    pub fn patch(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("patch")?.patch(payload))
    }

    pub fn patch_and_fetch(&self, payload: Value) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("patchAndFetch")?.patch_and_fetch(payload))
    }

    pub fn patch_and_fetch_by_id(
        &self,
        id: impl Into<Value>,
        payload: Value,
    ) -> ModelResult<ModelQuery> {
        Ok(self
            .shortcut("patchAndFetchById")?
            .patch_and_fetch_by_id(id, payload))
    }

    pub fn delete(&self) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("delete")?.delete())
    }

    pub fn delete_by_id(&self, id: impl Into<Value>) -> ModelResult<ModelQuery> {
        Ok(self.shortcut("deleteById")?.delete_by_id(id))
    }
}

/// Query builder for a single model.
#[derive(Debug, Clone)]
pub struct ModelQuery {
    def: Arc<ModelDefinition>,
    db: Option<DatabaseHandle>,
    op: Operation,
    source: &'static str,
    conditions: Vec<(String, Value)>,
    in_condition: Option<(String, Vec<Value>)>,
    payload: Option<Value>,
    limit: Option<i64>,
    returning: bool,
    graph: bool,
    // Builder-time parameter error, surfaced when the query is built.
    error: Option<QueryError>,
}

impl ModelQuery {
    /// Create a detached query builder over `def` (no connection attached).
    pub fn for_model(def: Arc<ModelDefinition>) -> Self {
        Self {
            def,
            db: None,
            op: Operation::Select,
            source: "query",
            conditions: Vec::new(),
            in_condition: None,
            payload: None,
            limit: None,
            returning: false,
            graph: false,
            error: None,
        }
    }

    /// Attach a connection handle for execution.
    pub fn with_db(mut self, db: DatabaseHandle) -> Self {
        self.db = Some(db);
        self
    }

    pub fn operation(&self) -> Operation {
        self.op
    }

    /// Add an equality condition.
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// Limit the number of returned rows.
    pub fn limit(mut self, count: i64) -> Self {
        self.limit = Some(count);
        self
    }

    pub fn find_by_id(mut self, id: impl Into<Value>) -> Self {
        self.op = Operation::Select;
        self.source = "findById";
        let id_column = self.def.id_column.clone();
        self.conditions.push((id_column, id.into()));
        self.limit = Some(1);
        self
    }

    pub fn find_by_ids(mut self, ids: Vec<Value>) -> Self {
        self.op = Operation::Select;
        self.source = "findByIds";
        self.in_condition = Some((self.def.id_column.clone(), ids));
        self
    }

    /// Select a single row matching every field of `filter`.
    pub fn find_one(mut self, filter: Value) -> Self {
        self.op = Operation::Select;
        self.source = "findOne";
        match filter {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> = map.into_iter().collect();
                for (column, value) in sorted {
                    self.conditions.push((column, value));
                }
            }
            other => {
                self.error = Some(QueryError::InvalidParameter(format!(
                    "filter for findOne must be an object, got {}",
                    type_name(&other)
                )));
            }
        }
        self.limit = Some(1);
        self
    }

    pub fn insert(mut self, payload: Value) -> Self {
        self.op = Operation::Insert;
        self.source = "insert";
        self.payload = Some(payload);
        self
    }

    pub fn insert_and_fetch(mut self, payload: Value) -> Self {
        self = self.insert(payload);
        self.source = "insertAndFetch";
        self.returning = true;
        self
    }

    pub fn insert_graph(mut self, payload: Value) -> Self {
        self = self.insert(payload);
        self.source = "insertGraph";
        self.graph = true;
        self
    }

    pub fn insert_graph_and_fetch(mut self, payload: Value) -> Self {
        self = self.insert_graph(payload);
        self.source = "insertGraphAndFetch";
        self.returning = true;
        self
    }

    pub fn update(mut self, payload: Value) -> Self {
        self.op = Operation::Update;
        self.source = "update";
        self.payload = Some(payload);
        self
    }

    pub fn update_and_fetch(mut self, payload: Value) -> Self {
        self = self.update(payload);
        self.source = "updateAndFetch";
        self.returning = true;
        self
    }

    pub fn update_and_fetch_by_id(mut self, id: impl Into<Value>, payload: Value) -> Self {
        self = self.update(payload);
        self.source = "updateAndFetchById";
        let id_column = self.def.id_column.clone();
        self.conditions.push((id_column, id.into()));
        self.returning = true;
        self
    }

    pub fn upsert_graph(mut self, payload: Value) -> Self {
        self.op = Operation::Upsert;
        self.source = "upsertGraph";
        self.payload = Some(payload);
        self.graph = true;
        self
    }

    pub fn upsert_graph_and_fetch(mut self, payload: Value) -> Self {
        self = self.upsert_graph(payload);
        self.source = "upsertGraphAndFetch";
        self.returning = true;
        self
    }

    pub fn patch(mut self, payload: Value) -> Self {
        self.op = Operation::Patch;
        self.source = "patch";
        self.payload = Some(payload);
        self
    }

    pub fn patch_and_fetch(mut self, payload: Value) -> Self {
        self = self.patch(payload);
        self.source = "patchAndFetch";
        self.returning = true;
        self
    }

    pub fn patch_and_fetch_by_id(mut self, id: impl Into<Value>, payload: Value) -> Self {
        self = self.patch(payload);
        self.source = "patchAndFetchById";
        let id_column = self.def.id_column.clone();
        self.conditions.push((id_column, id.into()));
        self.returning = true;
        self
    }

    pub fn delete(mut self) -> Self {
        self.op = Operation::Delete;
        self.source = "delete";
        self
    }

    pub fn delete_by_id(mut self, id: impl Into<Value>) -> Self {
        self = self.delete();
        self.source = "deleteById";
        let id_column = self.def.id_column.clone();
        self.conditions.push((id_column, id.into()));
        self
    }

    /// Build the SQL string and its bindings.
    pub fn build(&self) -> ModelResult<(String, Vec<Value>)> {
        if let Some(err) = &self.error {
            return Err(err.clone().into());
        }
        let mut bindings: Vec<Value> = Vec::new();
        let table = &self.def.table;

        let mut sql = match self.op {
            Operation::Select => {
                let mut sql = format!("SELECT * FROM {}", table);
                self.append_where(&mut sql, &mut bindings);
                if let Some(limit) = self.limit {
                    sql.push_str(&format!(" LIMIT {}", limit));
                }
                sql
            }
            Operation::Insert | Operation::Upsert => {
                let payload = self.object_payload()?;
                let mut sql = if payload.is_empty() {
                    format!("INSERT INTO {} DEFAULT VALUES", table)
                } else {
                    let placeholders: Vec<String> =
                        (1..=payload.len()).map(|i| format!("${}", i)).collect();
                    let columns: Vec<&str> = payload.keys().map(String::as_str).collect();
                    bindings.extend(payload.values().cloned());
                    format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        table,
                        columns.join(", "),
                        placeholders.join(", ")
                    )
                };
                if self.op == Operation::Upsert {
                    sql.push_str(&upsert_clause(&self.def.id_column, &payload));
                }
                sql
            }
            Operation::Update | Operation::Patch => {
                let payload = self.object_payload()?;
                if payload.is_empty() {
                    return Err(QueryError::MissingPayload(format!(
                        "{} on {}",
                        self.source, table
                    ))
                    .into());
                }
                let assignments: Vec<String> = payload
                    .keys()
                    .enumerate()
                    .map(|(i, column)| format!("{} = ${}", column, i + 1))
                    .collect();
                bindings.extend(payload.values().cloned());
                let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
                self.append_where(&mut sql, &mut bindings);
                sql
            }
            Operation::Delete => {
                let mut sql = format!("DELETE FROM {}", table);
                self.append_where(&mut sql, &mut bindings);
                sql
            }
        };

        if self.returning && !self.graph {
            sql.push_str(" RETURNING *");
        }
        Ok((sql, bindings))
    }

    /// SQL string for this query.
    pub fn to_sql(&self) -> ModelResult<String> {
        Ok(self.build()?.0)
    }

    /// Bound parameter values in `$n` order.
    pub fn bindings(&self) -> ModelResult<Vec<Value>> {
        Ok(self.build()?.1)
    }

    fn append_where(&self, sql: &mut String, bindings: &mut Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        for (column, value) in &self.conditions {
            bindings.push(value.clone());
            clauses.push(format!("{} = ${}", column, bindings.len()));
        }
        if let Some((column, values)) = &self.in_condition {
            if values.is_empty() {
                // An empty id list matches nothing; `IN ()` is not valid SQL.
                clauses.push("1 = 0".to_string());
            } else {
                let mut placeholders = Vec::new();
                for value in values {
                    bindings.push(value.clone());
                    placeholders.push(format!("${}", bindings.len()));
                }
                clauses.push(format!("{} IN ({})", column, placeholders.join(", ")));
            }
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
    }

    /// Payload as a column-sorted map, required for write operations.
    fn object_payload(&self) -> ModelResult<BTreeMap<String, Value>> {
        match &self.payload {
            Some(Value::Object(map)) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            Some(other) => Err(QueryError::InvalidParameter(format!(
                "payload for {} must be an object, got {}",
                self.source,
                type_name(other)
            ))
            .into()),
            None => {
                Err(QueryError::MissingPayload(format!("{} on {}", self.source, self.def.table))
                    .into())
            }
        }
    }

    fn handle(&self) -> ModelResult<&DatabaseHandle> {
        self.db.as_ref().ok_or_else(|| {
            ModelError::Connection("query is not bound to a database".to_string())
        })
    }

    fn map_db_error(&self, err: sqlx::Error) -> ModelError {
        if self.def.translate_db_errors {
            translate_db_error(&err)
        } else {
            ModelError::Database(err.to_string())
        }
    }

    /// Not-found error for this query, honoring the model's not-found mode.
    fn not_found_error(&self) -> ModelError {
        match self.def.not_found {
            NotFoundMode::Default => ModelError::NotFound(self.def.table.clone()),
            NotFoundMode::Http => ModelError::NotFoundWithContext {
                resource: self.def.table.clone(),
                context: self.query_context(),
            },
        }
    }

    /// Context describing the query that failed, carried on structured
    /// not-found errors.
    pub fn query_context(&self) -> Value {
        let conditions: Map<String, Value> = self
            .conditions
            .iter()
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        json!({
            "table": self.def.table,
            "operation": self.source,
            "conditions": conditions,
        })
    }

    /// Execute and return all rows.
    pub async fn fetch_all(self) -> ModelResult<Vec<Value>> {
        if self.graph {
            let row = self.run_graph().await?;
            return Ok(vec![row]);
        }
        let pool = self.handle()?.pool().map_err(ModelError::from)?.clone();
        let (sql, bindings) = self.build()?;
        tracing::debug!(table = %self.def.table, %sql, "Executing query");
        let mut query = sqlx::query(&sql);
        for value in &bindings {
            query = bind_value(query, value);
        }
        let rows = query
            .fetch_all(&pool)
            .await
            .map_err(|e| self.map_db_error(e))?;
        rows.iter().map(row_to_value).collect()
    }

    /// Execute and return the first row, or the model's not-found error.
    pub async fn fetch_one(self) -> ModelResult<Value> {
        if self.graph {
            return self.run_graph().await;
        }
        let pool = self.handle()?.pool().map_err(ModelError::from)?.clone();
        let (sql, bindings) = self.build()?;
        tracing::debug!(table = %self.def.table, %sql, "Executing query");
        let mut query = sqlx::query(&sql);
        for value in &bindings {
            query = bind_value(query, value);
        }
        let row = query
            .fetch_optional(&pool)
            .await
            .map_err(|e| self.map_db_error(e))?;
        match row {
            Some(row) => row_to_value(&row),
            None => Err(self.not_found_error()),
        }
    }

    /// Execute and return the number of affected rows.
    pub async fn execute(self) -> ModelResult<u64> {
        if self.graph {
            let def = Arc::clone(&self.def);
            let graph = self.run_graph().await?;
            return Ok(count_rows(&def, &graph));
        }
        let pool = self.handle()?.pool().map_err(ModelError::from)?.clone();
        let (sql, bindings) = self.build()?;
        tracing::debug!(table = %self.def.table, %sql, "Executing query");
        let mut query = sqlx::query(&sql);
        for value in &bindings {
            query = bind_value(query, value);
        }
        let result = query
            .execute(&pool)
            .await
            .map_err(|e| self.map_db_error(e))?;
        Ok(result.rows_affected())
    }

    /// Write a relation graph: `belongsToOne` payload objects before the
    /// root, `hasOne`/`hasMany` children after it, keyed through the
    /// relation's join columns.
    async fn run_graph(self) -> ModelResult<Value> {
        let pool = self.handle()?.pool().map_err(ModelError::from)?.clone();
        let payload = match &self.payload {
            Some(Value::Object(map)) => map.clone(),
            _ => {
                return Err(QueryError::InvalidParameter(format!(
                    "graph payload for {} must be an object",
                    self.source
                ))
                .into())
            }
        };
        let upsert = self.op == Operation::Upsert;
        insert_tree(
            pool,
            Arc::clone(&self.def),
            payload,
            upsert,
            self.def.translate_db_errors,
        )
        .await
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn upsert_clause(id_column: &str, payload: &BTreeMap<String, Value>) -> String {
    let assignments: Vec<String> = payload
        .keys()
        .filter(|column| column.as_str() != id_column)
        .map(|column| format!("{} = EXCLUDED.{}", column, column))
        .collect();
    if assignments.is_empty() {
        format!(" ON CONFLICT ({}) DO NOTHING", id_column)
    } else {
        format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            id_column,
            assignments.join(", ")
        )
    }
}

/// Recursively insert a payload tree rooted at `def`.
fn insert_tree(
    pool: Pool<Postgres>,
    def: Arc<ModelDefinition>,
    mut payload: Map<String, Value>,
    upsert: bool,
    translate: bool,
) -> Pin<Box<dyn Future<Output = ModelResult<Value>> + Send>> {
    Box::pin(async move {
        // Split relation values out of the row payload.
        let mut children: Vec<(String, Value)> = Vec::new();
        for name in def.relations.keys() {
            if let Some(value) = payload.remove(name) {
                children.push((name.clone(), value));
            }
        }

        // Related rows the root points at go first so the foreign key can be
        // filled in before the root is written.
        for (name, value) in &children {
            let relation = &def.relations[name];
            if relation.kind != RelationKind::BelongsToOne {
                continue;
            }
            let target = resolve_graph_target(name, &relation.target)?;
            let child_map = match value {
                Value::Object(map) => map.clone(),
                other => {
                    return Err(ModelError::Relationship(format!(
                        "relation '{}' expects an object payload, got {}",
                        name,
                        type_name(other)
                    )))
                }
            };
            let inserted =
                insert_tree(pool.clone(), target, child_map, upsert, translate).await?;
            let key = relation.to_column();
            let fk = inserted.get(key).cloned().unwrap_or(Value::Null);
            payload.insert(relation.from_column().to_string(), fk);
        }

        let mut root = match insert_row(&pool, &def, payload, upsert, translate).await? {
            Value::Object(map) => map,
            other => return Ok(other),
        };

        // Children referencing the root go after it.
        for (name, value) in children {
            let relation = &def.relations[&name];
            if relation.kind == RelationKind::BelongsToOne {
                continue;
            }
            let target = resolve_graph_target(&name, &relation.target)?;
            let parent_key = root
                .get(relation.from_column())
                .cloned()
                .unwrap_or(Value::Null);

            let rows: Vec<Value> = match value {
                Value::Array(rows) => rows,
                single => vec![single],
            };
            let mut inserted_rows = Vec::with_capacity(rows.len());
            for row in rows {
                let mut child_map = match row {
                    Value::Object(map) => map,
                    other => {
                        return Err(ModelError::Relationship(format!(
                            "relation '{}' expects object payloads, got {}",
                            name,
                            type_name(&other)
                        )))
                    }
                };
                child_map.insert(relation.to_column().to_string(), parent_key.clone());
                inserted_rows.push(
                    insert_tree(pool.clone(), Arc::clone(&target), child_map, upsert, translate)
                        .await?,
                );
            }

            let value = match relation.kind {
                RelationKind::HasMany => Value::Array(inserted_rows),
                _ => inserted_rows.into_iter().next().unwrap_or(Value::Null),
            };
            root.insert(name, value);
        }

        Ok(Value::Object(root))
    })
}

fn resolve_graph_target(
    name: &str,
    target: &RelationTarget,
) -> ModelResult<Arc<ModelDefinition>> {
    match target {
        RelationTarget::Model(def) => Ok(Arc::clone(def)),
        RelationTarget::Named(reference) => Err(ModelError::Relationship(format!(
            "relation '{}' targets deferred model '{}' and cannot be written in a graph",
            name, reference
        ))),
    }
}

/// Insert one row, returning the stored row.
async fn insert_row(
    pool: &Pool<Postgres>,
    def: &ModelDefinition,
    payload: Map<String, Value>,
    upsert: bool,
    translate: bool,
) -> ModelResult<Value> {
    let sorted: BTreeMap<String, Value> = payload.into_iter().collect();
    let mut sql = if sorted.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", def.table)
    } else {
        let placeholders: Vec<String> = (1..=sorted.len()).map(|i| format!("${}", i)).collect();
        let columns: Vec<&str> = sorted.keys().map(String::as_str).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            def.table,
            columns.join(", "),
            placeholders.join(", ")
        )
    };
    if upsert {
        sql.push_str(&upsert_clause(&def.id_column, &sorted));
    }
    sql.push_str(" RETURNING *");

    tracing::debug!(table = %def.table, %sql, "Inserting graph row");
    let mut query = sqlx::query(&sql);
    for value in sorted.values() {
        query = bind_value(query, value);
    }
    let row = query.fetch_optional(pool).await.map_err(|e| {
        if translate {
            translate_db_error(&e)
        } else {
            ModelError::Database(e.to_string())
        }
    })?;
    match row {
        Some(row) => row_to_value(&row),
        // ON CONFLICT DO NOTHING returns no row; the input is all we know.
        None => Ok(Value::Object(sorted.into_iter().collect())),
    }
}

/// Number of rows in an assembled graph result: the root plus every row
/// reached through a declared relation key. Plain object-valued attributes
/// (jsonb columns) are not rows.
fn count_rows(def: &ModelDefinition, value: &Value) -> u64 {
    match value {
        Value::Object(map) => {
            let mut count = 1;
            for (name, relation) in &def.relations {
                if let (Some(child), RelationTarget::Model(target)) =
                    (map.get(name), &relation.target)
                {
                    count += count_rows(target, child);
                }
            }
            count
        }
        Value::Array(rows) => rows.iter().map(|row| count_rows(def, row)).sum(),
        _ => 0,
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<Value>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.clone()),
        // Arrays and nested objects go in as jsonb.
        other => query.bind(other.clone()),
    }
}

/// Hydrate a Postgres row into a JSON object keyed by column name.
fn row_to_value(row: &PgRow) -> ModelResult<Value> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name())?;
        map.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(map))
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> ModelResult<Value> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| Value::from(v as i64)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| Value::from(v as i64)),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Value::from(v as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
        "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" | "CHAR" => row
            .try_get::<Option<String>, _>(index)?
            .map(Value::String),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|v| Value::String(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|v| Value::String(v.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|v| Value::String(v.to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(|v| Value::String(v.to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
        other => {
            tracing::debug!(column_type = %other, "Unsupported column type, hydrating as null");
            None
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> Arc<ModelDefinition> {
        Arc::new(ModelDefinition::new("users").with_name("User"))
    }

    fn bound_users() -> BoundModel {
        let mut def = ModelDefinition::new("users").with_name("User");
        def.shortcut_methods = true;
        Arc::new(def).bind(crate::database::DatabaseHandle::detached("primary"))
    }

    #[test]
    fn select_with_conditions_and_limit() {
        let (sql, bindings) = ModelQuery::for_model(users())
            .where_eq("active", true)
            .limit(10)
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE active = $1 LIMIT 10");
        assert_eq!(bindings, vec![json!(true)]);
    }

    #[test]
    fn find_by_id_uses_id_column() {
        let def = Arc::new(
            ModelDefinition::new("users")
                .with_name("User")
                .with_id_column("user_id"),
        );
        let (sql, bindings) = ModelQuery::for_model(def).find_by_id(7).build().unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE user_id = $1 LIMIT 1");
        assert_eq!(bindings, vec![json!(7)]);
    }

    #[test]
    fn find_by_ids_builds_in_clause() {
        let (sql, bindings) = ModelQuery::for_model(users())
            .find_by_ids(vec![json!(1), json!(2), json!(3)])
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE id IN ($1, $2, $3)");
        assert_eq!(bindings.len(), 3);
    }

    #[test]
    fn find_one_sorts_filter_columns() {
        let (sql, _) = ModelQuery::for_model(users())
            .find_one(json!({"name": "amy", "active": true}))
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE active = $1 AND name = $2 LIMIT 1"
        );
    }

    #[test]
    fn insert_and_fetch_appends_returning() {
        let query = ModelQuery::for_model(users()).insert(json!({"name": "amy", "age": 30}));
        let (sql, bindings) = query.build().unwrap();
        assert_eq!(sql, "INSERT INTO users (age, name) VALUES ($1, $2)");
        assert_eq!(bindings, vec![json!(30), json!("amy")]);

        let (sql, _) = ModelQuery::for_model(users())
            .insert_and_fetch(json!({"name": "amy"}))
            .build()
            .unwrap();
        assert_eq!(sql, "INSERT INTO users (name) VALUES ($1) RETURNING *");
    }

    #[test]
    fn empty_insert_uses_default_values() {
        let (sql, bindings) = ModelQuery::for_model(users())
            .insert(json!({}))
            .build()
            .unwrap();
        assert_eq!(sql, "INSERT INTO users DEFAULT VALUES");
        assert!(bindings.is_empty());
    }

    #[test]
    fn update_and_patch_share_sql_shape() {
        let (update_sql, _) = ModelQuery::for_model(users())
            .update_and_fetch_by_id(5, json!({"name": "bo"}))
            .build()
            .unwrap();
        assert_eq!(
            update_sql,
            "UPDATE users SET name = $1 WHERE id = $2 RETURNING *"
        );

        let (patch_sql, _) = ModelQuery::for_model(users())
            .patch_and_fetch_by_id(5, json!({"name": "bo"}))
            .build()
            .unwrap();
        assert_eq!(patch_sql, update_sql);
    }

    #[test]
    fn update_without_payload_fails() {
        let err = ModelQuery::for_model(users())
            .update(json!({}))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::Query(QueryError::MissingPayload(_))));

        let err = ModelQuery::for_model(users())
            .insert(json!("nope"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Query(QueryError::InvalidParameter(_))
        ));
    }

    #[test]
    fn upsert_graph_emits_conflict_clause() {
        let (sql, _) = ModelQuery::for_model(users())
            .upsert_graph(json!({"id": 1, "name": "amy"}))
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO users (id, name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"
        );

        let (sql, _) = ModelQuery::for_model(users())
            .upsert_graph(json!({"id": 1}))
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING"
        );
    }

    #[test]
    fn delete_variants() {
        let (sql, _) = ModelQuery::for_model(users()).delete().build().unwrap();
        assert_eq!(sql, "DELETE FROM users");

        let (sql, bindings) = ModelQuery::for_model(users())
            .delete_by_id(9)
            .build()
            .unwrap();
        assert_eq!(sql, "DELETE FROM users WHERE id = $1");
        assert_eq!(bindings, vec![json!(9)]);
    }

    #[test]
    fn query_context_carries_conditions() {
        let query = ModelQuery::for_model(users()).find_by_id(42);
        let context = query.query_context();
        assert_eq!(context["table"], "users");
        assert_eq!(context["operation"], "findById");
        assert_eq!(context["conditions"]["id"], 42);
    }

    #[test]
    fn shortcut_methods_match_query_builder() {
        let bound = bound_users();

        let shortcut = bound.insert(json!({"name": "amy"})).unwrap();
        let direct = bound.query().insert(json!({"name": "amy"}));
        assert_eq!(shortcut.build().unwrap(), direct.build().unwrap());

        let shortcut = bound.find_by_id(3).unwrap();
        let direct = bound.query().find_by_id(3);
        assert_eq!(shortcut.build().unwrap(), direct.build().unwrap());

        let shortcut = bound.update_and_fetch_by_id(3, json!({"age": 31})).unwrap();
        let direct = bound.query().update_and_fetch_by_id(3, json!({"age": 31}));
        assert_eq!(shortcut.build().unwrap(), direct.build().unwrap());
    }

    #[test]
    fn shortcut_methods_gated_by_decoration() {
        let mut def = ModelDefinition::new("users");
        def.shortcut_methods = false;
        let bound = Arc::new(def).bind(crate::database::DatabaseHandle::detached("primary"));

        let err = bound.insert(json!({"name": "amy"})).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Query(QueryError::UnsupportedOperation(_))
        ));
        // query() itself stays available.
        assert!(bound.query().find_by_id(1).build().is_ok());
    }

    #[tokio::test]
    async fn execution_without_connection_fails() {
        let query = ModelQuery::for_model(users()).find_by_id(1);
        let err = query.fetch_one().await.unwrap_err();
        assert!(matches!(err, ModelError::Connection(_)));

        let query = ModelQuery::for_model(users())
            .with_db(crate::database::DatabaseHandle::detached("primary"))
            .find_by_id(1);
        let err = query.fetch_one().await.unwrap_err();
        assert!(matches!(err, ModelError::Connection(_)));
    }

    #[test]
    fn count_rows_descends_relation_keys_only() {
        use crate::model::Relation;

        let def = ModelDefinition::new("users")
            .with_relation(
                "author",
                Relation::new(
                    RelationKind::BelongsToOne,
                    ModelDefinition::new("authors"),
                    "users.author_id",
                    "authors.id",
                ),
            )
            .with_relation(
                "posts",
                Relation::new(
                    RelationKind::HasMany,
                    ModelDefinition::new("posts"),
                    "users.id",
                    "posts.user_id",
                ),
            );
        let graph = json!({
            "id": 1,
            "meta": {"source": "import"},
            "author": {"id": 2},
            "posts": [{"id": 3}, {"id": 4}],
        });
        assert_eq!(count_rows(&def, &graph), 4);

        // A jsonb attribute alone is not a row.
        assert_eq!(count_rows(&def, &json!({"id": 1, "meta": {"a": 1}})), 1);
    }

    #[test]
    fn find_one_rejects_non_object_filters() {
        let err = ModelQuery::for_model(users())
            .find_one(json!("not-an-object"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Query(QueryError::InvalidParameter(_))
        ));

        let bound = bound_users();
        let err = bound.find_one(json!([1, 2])).unwrap().build().unwrap_err();
        assert!(matches!(
            err,
            ModelError::Query(QueryError::InvalidParameter(_))
        ));
    }

    #[test]
    fn empty_id_list_matches_nothing() {
        let (sql, bindings) = ModelQuery::for_model(users())
            .find_by_ids(Vec::new())
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE 1 = 0");
        assert!(bindings.is_empty());
    }

    #[test]
    fn http_not_found_mode_carries_query_context() {
        let mut def = ModelDefinition::new("users");
        def.not_found = NotFoundMode::Http;
        let query = ModelQuery::for_model(Arc::new(def)).find_by_id(42);
        match query.not_found_error() {
            ModelError::NotFoundWithContext { resource, context } => {
                assert_eq!(resource, "users");
                assert_eq!(context["table"], "users");
                assert_eq!(context["operation"], "findById");
                assert_eq!(context["conditions"]["id"], 42);
            }
            other => panic!("expected structured not-found, got {:?}", other),
        }

        let query = ModelQuery::for_model(users()).find_by_id(42);
        assert!(matches!(
            query.not_found_error(),
            ModelError::NotFound(table) if table == "users"
        ));
    }
}
