//! Model registry
//!
//! Owns the name-to-model lookup tree and the registration path: name
//! validation, option merging, the decoration pipeline, connection binding
//! and name-tree insertion. One registry exists per server instance; all
//! registration happens during server setup, the tree is read-only
//! afterwards.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use loam_orm::{BoundModel, ModelDefinition, ServerContext};

use crate::error::RegistryError;
use crate::options::{ModelOptions, ModelSettings};
use crate::tree::ModelTree;
use crate::wrap::wrap;

/// Identifier-with-dot-segments pattern a model name must match.
static MODEL_NAME_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[_$A-Za-z][_$0-9A-Za-z]*(?:\.[_$A-Za-z][_$0-9A-Za-z]*)*$")
        .expect("model name pattern is a valid regex")
});

/// Input to registration: a model definition, or a literal object a
/// definition is synthesized from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Definition(ModelDefinition),
    Object(Value),
}

impl From<ModelDefinition> for ModelSource {
    fn from(def: ModelDefinition) -> Self {
        ModelSource::Definition(def)
    }
}

impl From<Value> for ModelSource {
    fn from(value: Value) -> Self {
        ModelSource::Object(value)
    }
}

impl ModelSource {
    fn into_definition(self) -> Result<ModelDefinition, RegistryError> {
        match self {
            ModelSource::Definition(def) => Ok(def),
            ModelSource::Object(value) => {
                ModelDefinition::from_object(value).map_err(|e| RegistryError::InvalidModel {
                    name: "<object>".to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Descriptor form of a registration: a name, exactly one of
/// `model_class`/`model`, and optional per-model options.
#[derive(Debug, Clone, Default)]
pub struct ModelDescriptor {
    pub name: Option<String>,
    pub model_class: Option<ModelDefinition>,
    pub model: Option<Value>,
    pub options: Option<ModelOptions>,
}

impl ModelDescriptor {
    pub fn class(model_class: ModelDefinition) -> Self {
        Self {
            model_class: Some(model_class),
            ..Self::default()
        }
    }

    pub fn object(model: Value) -> Self {
        Self {
            model: Some(model),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Validate the descriptor shape and resolve it to a concrete
    /// registration.
    fn resolve(self) -> Result<(String, ModelDefinition, ModelOptions), RegistryError> {
        let def = match (self.model_class, self.model) {
            (Some(_), Some(_)) => {
                return Err(RegistryError::InvalidDescriptor {
                    message: "exactly one of 'modelClass' and 'model' must be set, got both"
                        .to_string(),
                })
            }
            (None, None) => {
                return Err(RegistryError::InvalidDescriptor {
                    message: "exactly one of 'modelClass' and 'model' must be set, got neither"
                        .to_string(),
                })
            }
            (Some(def), None) => def,
            (None, Some(value)) => {
                ModelDefinition::from_object(value).map_err(|e| {
                    RegistryError::InvalidDescriptor {
                        message: e.to_string(),
                    }
                })?
            }
        };

        let name = self
            .name
            .or_else(|| def.name.clone())
            .ok_or_else(|| RegistryError::InvalidDescriptor {
                message: "descriptor has no name and the model declares none".to_string(),
            })?;

        Ok((name, def, self.options.unwrap_or_default()))
    }
}

/// Registry of connected models for one server instance.
pub struct ModelRegistry {
    server: Arc<dyn ServerContext>,
    defaults: ModelSettings,
    tree: ModelTree,
}

impl ModelRegistry {
    pub fn new(server: Arc<dyn ServerContext>, defaults: ModelSettings) -> Self {
        Self {
            server,
            defaults,
            tree: ModelTree::new(),
        }
    }

    /// Register a model under the name it declares itself.
    pub fn add(
        &mut self,
        source: impl Into<ModelSource>,
        options: ModelOptions,
    ) -> Result<(), RegistryError> {
        let def = source.into().into_definition()?;
        let name = def
            .name
            .clone()
            .ok_or_else(|| RegistryError::InvalidName {
                name: "<unnamed>".to_string(),
            })?;
        self.register(&name, def, &options)
    }

    /// Register a model under an explicit name.
    pub fn add_named(
        &mut self,
        name: &str,
        source: impl Into<ModelSource>,
        options: ModelOptions,
    ) -> Result<(), RegistryError> {
        let def = source.into().into_definition()?;
        self.register(name, def, &options)
    }

    /// Register from a descriptor.
    pub fn add_descriptor(&mut self, descriptor: ModelDescriptor) -> Result<(), RegistryError> {
        let (name, def, options) = descriptor.resolve()?;
        self.register(&name, def, &options)
    }

    /// Register a list of descriptors, in order.
    pub fn add_descriptors(
        &mut self,
        descriptors: Vec<ModelDescriptor>,
    ) -> Result<(), RegistryError> {
        for descriptor in descriptors {
            self.add_descriptor(descriptor)?;
        }
        Ok(())
    }

    /// Single-name registration path.
    ///
    /// Validates the name and definition, merges options over the registry
    /// defaults, decorates, binds the model to its connection and inserts it
    /// under every computed name: aliases, declared name, and the two
    /// backward-compatible case variants.
    fn register(
        &mut self,
        name: &str,
        def: ModelDefinition,
        options: &ModelOptions,
    ) -> Result<(), RegistryError> {
        if !MODEL_NAME_RX.is_match(name) {
            return Err(RegistryError::InvalidName {
                name: name.to_string(),
            });
        }
        if self.tree.contains(name) {
            return Err(RegistryError::DuplicateName {
                name: name.to_string(),
            });
        }
        def.validate().map_err(|e| RegistryError::InvalidModel {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        let settings = self.defaults.merge(options);

        let mut names = settings.alias.clone();
        names.push(name.to_string());
        // Backward-compatible case variants.
        names.push(lower_first(name));
        names.push(name.to_lowercase());

        let mut def = def;
        def.bind = settings.bind.clone();
        let wrapped = wrap(Arc::new(def), &settings, &self.server);

        // Connection selection uses the explicit per-model option; a default
        // inherited into the settings does not participate.
        let db = self.server.db(options.db.as_deref())?;
        let bound = Arc::new(wrapped.bind(db));

        tracing::info!(
            model = %name,
            db = %bound.db().name(),
            aliases = names.len() - 3,
            "Registered model"
        );

        for model_name in &names {
            self.tree.assign(model_name, Arc::clone(&bound));
        }
        Ok(())
    }

    /// Look up a connected model by dotted path.
    pub fn get(&self, path: &str) -> Option<&Arc<BoundModel>> {
        self.tree.get(path)
    }

    /// The name-to-model lookup tree.
    pub fn models(&self) -> &ModelTree {
        &self.tree
    }

    pub fn defaults(&self) -> &ModelSettings {
        &self.defaults
    }

    pub fn server(&self) -> &Arc<dyn ServerContext> {
        &self.server
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("server", &self.server.name())
            .field("model_count", &self.tree.len())
            .finish()
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
