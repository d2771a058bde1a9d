//! Registration options and their merge semantics
//!
//! [`ModelOptions`] and [`PluginOptions`] are the externally supplied shapes;
//! both reject unrecognized keys when deserialized. [`ModelSettings`] is the
//! fully resolved configuration a model is decorated with: process-wide
//! defaults overridden by explicit per-model options, with `alias` treated as
//! an additive list and `bind` taken only from the explicit options.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::RegistryError;

/// Per-model registration options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct ModelOptions {
    pub wrap_db_errors: Option<bool>,
    pub boom_not_found: Option<bool>,
    pub inject_server: Option<bool>,
    pub wrap_relation: Option<bool>,
    pub proxy_query_methods: Option<bool>,
    /// Named database connection to bind against.
    pub db: Option<String>,
    /// Additional names the model is reachable under. Accepts a single
    /// string or a list.
    #[serde(deserialize_with = "one_or_many")]
    pub alias: Vec<String>,
    /// Opaque context attached to the model. Never inherited from defaults.
    pub bind: Option<Value>,
}

impl ModelOptions {
    /// Parse options from a JSON value, failing on unrecognized keys.
    pub fn from_value(value: Value) -> Result<Self, RegistryError> {
        serde_json::from_value(value).map_err(|e| RegistryError::InvalidOptions {
            message: e.to_string(),
        })
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias.push(alias.into());
        self
    }

    pub fn with_bind(mut self, bind: Value) -> Self {
        self.bind = Some(bind);
        self
    }
}

/// Plugin-level options: the base flag set plus a default connection name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct PluginOptions {
    pub wrap_db_errors: Option<bool>,
    pub boom_not_found: Option<bool>,
    pub inject_server: Option<bool>,
    pub wrap_relation: Option<bool>,
    pub proxy_query_methods: Option<bool>,
    pub db: Option<String>,
}

impl PluginOptions {
    /// Parse options from a JSON value, failing on unrecognized keys.
    pub fn from_value(value: Value) -> Result<Self, RegistryError> {
        serde_json::from_value(value).map_err(|e| RegistryError::InvalidOptions {
            message: e.to_string(),
        })
    }

    /// Merge these options over process defaults, producing the registry's
    /// default settings.
    pub fn apply_to(&self, defaults: &ModelSettings) -> ModelSettings {
        ModelSettings {
            wrap_db_errors: self.wrap_db_errors.unwrap_or(defaults.wrap_db_errors),
            boom_not_found: self.boom_not_found.unwrap_or(defaults.boom_not_found),
            inject_server: self.inject_server.unwrap_or(defaults.inject_server),
            wrap_relation: self.wrap_relation.unwrap_or(defaults.wrap_relation),
            proxy_query_methods: self
                .proxy_query_methods
                .unwrap_or(defaults.proxy_query_methods),
            add_shortcut_methods: defaults.add_shortcut_methods,
            db: self.db.clone().or_else(|| defaults.db.clone()),
            alias: defaults.alias.clone(),
            bind: None,
        }
    }
}

/// Fully resolved model configuration.
///
/// `add_shortcut_methods` has no counterpart in the option shapes: it is
/// controlled through the process defaults only. `proxy_query_methods` is
/// accepted and merged but not consulted by the decoration pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub wrap_db_errors: bool,
    pub boom_not_found: bool,
    pub inject_server: bool,
    pub wrap_relation: bool,
    pub add_shortcut_methods: bool,
    pub proxy_query_methods: bool,
    pub db: Option<String>,
    pub alias: Vec<String>,
    pub bind: Option<Value>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            wrap_db_errors: true,
            boom_not_found: true,
            inject_server: true,
            wrap_relation: true,
            add_shortcut_methods: true,
            proxy_query_methods: false,
            db: None,
            alias: Vec::new(),
            bind: None,
        }
    }
}

impl ModelSettings {
    /// Merge explicit per-model options over these defaults.
    ///
    /// `alias` is additive; `bind` comes only from the explicit options.
    pub fn merge(&self, options: &ModelOptions) -> ModelSettings {
        let mut alias = self.alias.clone();
        alias.extend(options.alias.iter().cloned());
        ModelSettings {
            wrap_db_errors: options.wrap_db_errors.unwrap_or(self.wrap_db_errors),
            boom_not_found: options.boom_not_found.unwrap_or(self.boom_not_found),
            inject_server: options.inject_server.unwrap_or(self.inject_server),
            wrap_relation: options.wrap_relation.unwrap_or(self.wrap_relation),
            add_shortcut_methods: self.add_shortcut_methods,
            proxy_query_methods: options
                .proxy_query_methods
                .unwrap_or(self.proxy_query_methods),
            db: options.db.clone().or_else(|| self.db.clone()),
            alias,
            bind: options.bind.clone(),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(alias) => vec![alias],
        OneOrMany::Many(aliases) => aliases,
    })
}
