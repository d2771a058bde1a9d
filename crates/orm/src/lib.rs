//! # loam-orm: runtime model layer for the loam framework
//!
//! Provides the pieces the model registration layer builds on: runtime
//! [`ModelDefinition`]s with relation mappings, the [`ModelQuery`] builder
//! with shortcut query methods on [`BoundModel`], the normalized database
//! error taxonomy, and named connection handles via [`PoolRegistry`].

pub mod database;
pub mod error;
pub mod model;
pub mod query;

pub use database::{DatabaseHandle, PoolError, PoolRegistry, ServerContext};
pub use error::{classify_sqlstate, translate_db_error, ModelError, ModelResult, QueryError};
pub use model::{ModelDefinition, NotFoundMode, Relation, RelationKind, RelationTarget};
pub use query::{BoundModel, ModelQuery, Operation};
