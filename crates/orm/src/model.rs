//! Runtime model definitions
//!
//! A [`ModelDefinition`] describes a persisted entity: its table, id column,
//! relation mappings and any extra attributes carried over from a literal
//! object definition. Decoration state (error translation, not-found mode,
//! injected server, shortcut methods) lives on the value itself so that the
//! decoration pipeline can be expressed as pure
//! `ModelDefinition -> ModelDefinition` transformations, with an explicit
//! `wrapped` tag guarding against a second pass.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::database::{DatabaseHandle, ServerContext};
use crate::error::{ModelError, ModelResult};
use crate::query::BoundModel;

/// How a failed single-row lookup is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundMode {
    /// Plain [`ModelError::NotFound`] carrying the table name.
    #[default]
    Default,
    /// Structured 404 error carrying the query context that failed.
    Http,
}

/// Relation cardinality, mirroring the mapping kinds the query layer
/// understands for graph writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsToOne,
    HasOne,
    HasMany,
}

/// Target of a relation mapping: either a live model definition or a
/// deferred name resolved later by the registry.
#[derive(Clone)]
pub enum RelationTarget {
    Model(Arc<ModelDefinition>),
    Named(String),
}

impl fmt::Debug for RelationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationTarget::Model(def) => write!(f, "Model({})", def.table),
            RelationTarget::Named(name) => write!(f, "Named({})", name),
        }
    }
}

/// Declared association from one model to another.
///
/// `from` and `to` are `table.column` pairs, `from` on the owning side.
#[derive(Debug, Clone)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: RelationTarget,
    pub from: String,
    pub to: String,
}

impl Relation {
    pub fn new(
        kind: RelationKind,
        target: impl Into<RelationTarget>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Column part of the `from` join reference.
    pub fn from_column(&self) -> &str {
        column_of(&self.from)
    }

    /// Column part of the `to` join reference.
    pub fn to_column(&self) -> &str {
        column_of(&self.to)
    }
}

fn column_of(join_ref: &str) -> &str {
    join_ref.rsplit('.').next().unwrap_or(join_ref)
}

impl From<Arc<ModelDefinition>> for RelationTarget {
    fn from(def: Arc<ModelDefinition>) -> Self {
        RelationTarget::Model(def)
    }
}

impl From<ModelDefinition> for RelationTarget {
    fn from(def: ModelDefinition) -> Self {
        RelationTarget::Model(Arc::new(def))
    }
}

impl From<&str> for RelationTarget {
    fn from(name: &str) -> Self {
        RelationTarget::Named(name.to_string())
    }
}

impl From<String> for RelationTarget {
    fn from(name: String) -> Self {
        RelationTarget::Named(name)
    }
}

/// Shape of a relation entry inside a literal object definition.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RelationSpec {
    kind: RelationKind,
    target: String,
    from: String,
    to: String,
}

/// Runtime description of a persisted entity.
#[derive(Debug, Clone, Default)]
pub struct ModelDefinition {
    /// Declared name; used by the registry when no explicit name is given.
    pub name: Option<String>,
    /// Table backing this model.
    pub table: String,
    /// Primary key column, `id` unless overridden.
    pub id_column: String,
    /// Relation mappings by relation name.
    pub relations: BTreeMap<String, Relation>,
    /// Extra properties copied from a literal object definition.
    pub attributes: Map<String, Value>,

    // Decoration state, set by the registration pipeline.
    /// Idempotence tag: a wrapped definition is never wrapped again.
    pub wrapped: bool,
    /// Translate low-level database errors into the violation taxonomy.
    pub translate_db_errors: bool,
    /// How failed single-row lookups are reported.
    pub not_found: NotFoundMode,
    /// Owning server, when server injection was enabled.
    pub server: Option<Arc<dyn ServerContext>>,
    /// Whether shortcut query methods are available on the bound model.
    pub shortcut_methods: bool,
    /// Opaque context attached at registration (`bind` option).
    pub bind: Option<Value>,
}

impl ModelDefinition {
    /// Create a definition for `table` with the default `id` column.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".to_string(),
            ..Self::default()
        }
    }

    /// Set the declared name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the primary key column.
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Add a relation mapping.
    pub fn with_relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    /// Synthesize a definition from a literal object.
    ///
    /// Recognized keys: `name`, `table`/`tableName`, `idColumn`/`id_column`,
    /// `relations` (string targets only). Everything else is kept verbatim
    /// in `attributes`.
    pub fn from_object(value: Value) -> ModelResult<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ModelError::Serialization(format!(
                    "model object must be a map, got {}",
                    json_type(&other)
                )))
            }
        };

        let mut def = ModelDefinition {
            id_column: "id".to_string(),
            ..ModelDefinition::default()
        };

        for (key, value) in map {
            match key.as_str() {
                "name" => def.name = Some(expect_string(&key, value)?),
                "table" | "tableName" => def.table = expect_string(&key, value)?,
                "idColumn" | "id_column" => def.id_column = expect_string(&key, value)?,
                "relations" => {
                    let specs: BTreeMap<String, RelationSpec> = serde_json::from_value(value)?;
                    for (rel_name, spec) in specs {
                        def.relations.insert(
                            rel_name,
                            Relation::new(spec.kind, spec.target, spec.from, spec.to),
                        );
                    }
                }
                _ => {
                    def.attributes.insert(key, value);
                }
            }
        }

        def.validate()?;
        Ok(def)
    }

    /// Check that this definition satisfies the persistable capability.
    pub fn validate(&self) -> ModelResult<()> {
        if self.table.is_empty() {
            return Err(ModelError::Serialization(
                "model definition has no table name".to_string(),
            ));
        }
        Ok(())
    }

    /// Bind this definition to a database connection handle.
    pub fn bind(self: &Arc<Self>, db: DatabaseHandle) -> BoundModel {
        BoundModel::new(Arc::clone(self), db)
    }
}

fn expect_string(key: &str, value: Value) -> ModelResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ModelError::Serialization(format!(
            "'{}' must be a string, got {}",
            key,
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
