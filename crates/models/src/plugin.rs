//! Plugin surface
//!
//! [`AppContext`] is the owning server: it carries the named connection
//! pools and implements the [`ServerContext`] seam the registry and the
//! decorated models resolve databases through. [`ModelsPlugin`] is the
//! activation glue: it validates plugin options, merges them over the
//! process defaults and produces the per-server [`ModelRegistry`].

use std::sync::Arc;

use serde_json::Value;

use loam_orm::{DatabaseHandle, PoolError, PoolRegistry, ServerContext};

use crate::error::RegistryError;
use crate::options::{ModelSettings, PluginOptions};
use crate::registry::ModelRegistry;

/// Server context owning the database pools.
#[derive(Debug)]
pub struct AppContext {
    name: String,
    pools: PoolRegistry,
}

impl AppContext {
    pub fn new(name: impl Into<String>, pools: PoolRegistry) -> Self {
        Self {
            name: name.into(),
            pools,
        }
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }
}

impl ServerContext for AppContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn db(&self, name: Option<&str>) -> Result<DatabaseHandle, PoolError> {
        self.pools.get(name)
    }
}

/// Model-layer plugin for a loam server.
#[derive(Debug, Clone, Default)]
pub struct ModelsPlugin {
    options: PluginOptions,
}

impl ModelsPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: PluginOptions) -> Self {
        Self { options }
    }

    /// Build the plugin from raw configuration, failing on unrecognized
    /// keys.
    pub fn from_value(value: Value) -> Result<Self, RegistryError> {
        Ok(Self::with_options(PluginOptions::from_value(value)?))
    }

    /// Activate the plugin on `server`, yielding its model registry.
    pub fn register(&self, server: Arc<AppContext>) -> Result<ModelRegistry, RegistryError> {
        let defaults = self.options.apply_to(&ModelSettings::default());
        tracing::info!(server = %server.name(), "Activating models plugin");
        Ok(ModelRegistry::new(server, defaults))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Arc<AppContext> {
        let mut pools = PoolRegistry::new();
        pools.register(DatabaseHandle::detached("primary"));
        Arc::new(AppContext::new("api", pools))
    }

    #[test]
    fn register_merges_plugin_options_into_defaults() {
        let plugin = ModelsPlugin::from_value(json!({"boomNotFound": false})).unwrap();
        let registry = plugin.register(context()).unwrap();

        assert!(!registry.defaults().boom_not_found);
        assert!(registry.defaults().wrap_db_errors);
        assert!(registry.defaults().add_shortcut_methods);
    }

    #[test]
    fn invalid_plugin_settings_fail_activation() {
        let err = ModelsPlugin::from_value(json!({"alias": ["X"]})).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidOptions { .. }));
    }

    #[test]
    fn context_resolves_databases_by_name() {
        let ctx = context();
        assert_eq!(ctx.db(None).unwrap().name(), "primary");
        assert!(ctx.db(Some("missing")).is_err());
    }
}
