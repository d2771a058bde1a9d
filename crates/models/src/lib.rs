//! # loam-models: model registration for the loam framework
//!
//! Lets an application register model definitions under string names,
//! applies a fixed decoration pipeline to each model (database error
//! translation, structured not-found handling, server injection, relation
//! wrapping, shortcut query methods), and exposes the connected models as a
//! server-wide lookup tree keyed by name and aliases.
//!
//! ```no_run
//! use std::sync::Arc;
//! use loam_models::{AppContext, ModelOptions, ModelsPlugin};
//! use loam_orm::{DatabaseHandle, ModelDefinition, PoolRegistry};
//!
//! # fn main() -> Result<(), loam_models::RegistryError> {
//! let mut pools = PoolRegistry::new();
//! pools.register(DatabaseHandle::detached("primary"));
//! let server = Arc::new(AppContext::new("api", pools));
//!
//! let mut registry = ModelsPlugin::new().register(server)?;
//! registry.add(
//!     ModelDefinition::new("users").with_name("User"),
//!     ModelOptions::default().with_alias("Account"),
//! )?;
//!
//! assert!(registry.get("Account").is_some());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod options;
pub mod plugin;
pub mod registry;
pub mod tree;
pub mod wrap;

pub use error::RegistryError;
pub use options::{ModelOptions, ModelSettings, PluginOptions};
pub use plugin::{AppContext, ModelsPlugin};
pub use registry::{ModelDescriptor, ModelRegistry, ModelSource};
pub use tree::{ModelNode, ModelTree};
pub use wrap::wrap;
