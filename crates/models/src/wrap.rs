//! Model decoration pipeline
//!
//! A fixed, ordered sequence of optional transformations applied to a model
//! definition at registration time. Each step is a pure
//! `ModelDefinition -> ModelDefinition` function; the pipeline marks the
//! result with the `wrapped` tag so a definition reached both top-level and
//! through a relation is decorated exactly once.

use std::sync::Arc;

use loam_orm::{ModelDefinition, NotFoundMode, RelationTarget, ServerContext};

use crate::options::ModelSettings;

/// Run the decoration pipeline over `def`.
///
/// Order: database error translation, structured not-found, server
/// injection, relation wrapping, shortcut methods. A definition already
/// carrying the `wrapped` tag passes through untouched.
pub fn wrap(
    def: Arc<ModelDefinition>,
    settings: &ModelSettings,
    server: &Arc<dyn ServerContext>,
) -> Arc<ModelDefinition> {
    if def.wrapped {
        return def;
    }

    let mut model = (*def).clone();
    if settings.wrap_db_errors {
        model = wrap_db_errors(model);
    }
    if settings.boom_not_found {
        model = boomify(model);
    }
    if settings.inject_server {
        model = inject_server(model, server);
    }
    if settings.wrap_relation {
        model = wrap_relations(model, settings, server);
    }
    if settings.add_shortcut_methods {
        model = add_shortcut_methods(model);
    }
    model.wrapped = true;
    tracing::debug!(table = %model.table, "Decorated model");
    Arc::new(model)
}

/// Translate low-level database errors into the violation taxonomy at query
/// time.
fn wrap_db_errors(mut model: ModelDefinition) -> ModelDefinition {
    model.translate_db_errors = true;
    model
}

/// Report failed single-row lookups as structured 404 errors carrying the
/// query context.
fn boomify(mut model: ModelDefinition) -> ModelDefinition {
    model.not_found = NotFoundMode::Http;
    model
}

/// Expose the owning server on the model.
fn inject_server(
    mut model: ModelDefinition,
    server: &Arc<dyn ServerContext>,
) -> ModelDefinition {
    model.server = Some(Arc::clone(server));
    model
}

/// Recursively decorate live relation targets with the same settings.
/// Named (deferred) targets are left for late resolution.
fn wrap_relations(
    mut model: ModelDefinition,
    settings: &ModelSettings,
    server: &Arc<dyn ServerContext>,
) -> ModelDefinition {
    for relation in model.relations.values_mut() {
        if let RelationTarget::Model(target) = &mut relation.target {
            *target = wrap(Arc::clone(target), settings, server);
        }
    }
    model
}

/// Enable the static shortcut query methods on the bound model.
fn add_shortcut_methods(mut model: ModelDefinition) -> ModelDefinition {
    model.shortcut_methods = true;
    model
}
