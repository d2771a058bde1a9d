//! End-to-end registration scenarios against a plugin-activated registry.

use std::sync::Arc;

use serde_json::json;

use loam_models::{
    AppContext, ModelDescriptor, ModelOptions, ModelsPlugin, PluginOptions, RegistryError,
};
use loam_orm::{
    DatabaseHandle, ModelDefinition, NotFoundMode, PoolRegistry, Relation, RelationKind,
    RelationTarget,
};

fn server() -> Arc<AppContext> {
    let mut pools = PoolRegistry::new();
    pools.register(DatabaseHandle::detached("primary"));
    pools.register(DatabaseHandle::detached("secondary"));
    Arc::new(AppContext::new("api", pools))
}

#[test]
fn model_is_reachable_under_aliases_and_case_variants() {
    let mut registry = ModelsPlugin::new().register(server()).unwrap();
    registry
        .add_named(
            "Baz",
            ModelDefinition::new("baz_records"),
            ModelOptions::default()
                .with_alias("Foo")
                .with_alias("Bar"),
        )
        .unwrap();

    for name in ["Foo", "Bar", "Baz", "baz"] {
        let model = registry.get(name).unwrap_or_else(|| panic!("missing {}", name));
        assert_eq!(model.definition().table, "baz_records");
    }
    // Both case variants of "Baz" collapse onto the same entry.
    assert_eq!(registry.models().len(), 4);
}

#[test]
fn dotted_names_build_a_navigable_tree() {
    let mut registry = ModelsPlugin::new().register(server()).unwrap();
    registry
        .add_named(
            "admin.audit.Entry",
            ModelDefinition::new("audit_entries"),
            ModelOptions::default(),
        )
        .unwrap();

    assert!(registry.get("admin.audit.Entry").is_some());
    assert!(registry.get("admin.audit.entry").is_some());
    assert!(registry.get("admin").is_none());

    // The intermediate branch makes the top-level name taken.
    let err = registry
        .add_named("admin", ModelDefinition::new("admins"), ModelOptions::default())
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName { .. }));
}

#[test]
fn literal_object_models_are_synthesized() {
    let mut registry = ModelsPlugin::new().register(server()).unwrap();
    registry
        .add_named(
            "User",
            json!({
                "tableName": "users",
                "idColumn": "user_id",
                "jsonSchema": {"required": ["email"]},
            }),
            ModelOptions::default(),
        )
        .unwrap();

    let user = registry.get("User").unwrap();
    assert_eq!(user.definition().table, "users");
    assert_eq!(user.definition().id_column, "user_id");
    assert!(user.definition().attributes.contains_key("jsonSchema"));
    // The synthesized model went through the full pipeline.
    assert!(user.definition().wrapped);
    assert!(user.definition().shortcut_methods);
}

#[test]
fn descriptor_list_registers_each_entry() {
    let mut registry = ModelsPlugin::new().register(server()).unwrap();
    registry
        .add_descriptors(vec![
            ModelDescriptor::class(ModelDefinition::new("users").with_name("User")),
            ModelDescriptor::object(json!({"table": "posts"})).with_name("Post"),
            ModelDescriptor::class(ModelDefinition::new("tags"))
                .with_name("Tag")
                .with_options(ModelOptions::default().with_db("secondary")),
        ])
        .unwrap();

    assert!(registry.get("User").is_some());
    assert!(registry.get("Post").is_some());
    assert_eq!(registry.get("Tag").unwrap().db().name(), "secondary");
    assert_eq!(registry.get("User").unwrap().db().name(), "primary");
}

#[test]
fn relation_reached_models_are_not_double_wrapped() {
    let mut registry = ModelsPlugin::new().register(server()).unwrap();

    let posts = Arc::new(ModelDefinition::new("posts").with_name("Post"));
    let users = ModelDefinition::new("users").with_name("User").with_relation(
        "posts",
        Relation::new(
            RelationKind::HasMany,
            Arc::clone(&posts),
            "users.id",
            "posts.user_id",
        ),
    );

    registry.add(users, ModelOptions::default()).unwrap();

    // The relation target was wrapped during User's registration; registering
    // it top-level afterwards decorates the original definition once.
    let user = registry.get("User").unwrap();
    let target = match &user.definition().relations["posts"].target {
        RelationTarget::Model(def) => Arc::clone(def),
        other => panic!("expected model target, got {:?}", other),
    };
    assert!(target.wrapped);

    registry
        .add_named("Post", (*posts).clone(), ModelOptions::default())
        .unwrap();
    let post = registry.get("Post").unwrap();
    assert!(post.definition().wrapped);
    assert!(post.definition().translate_db_errors);
}

#[test]
fn plugin_defaults_propagate_to_registered_models() {
    let plugin = ModelsPlugin::with_options(
        PluginOptions::from_value(json!({"boomNotFound": false, "wrapDbErrors": false})).unwrap(),
    );
    let mut registry = plugin.register(server()).unwrap();

    registry
        .add_named("User", ModelDefinition::new("users"), ModelOptions::default())
        .unwrap();
    let user = registry.get("User").unwrap();
    assert_eq!(user.definition().not_found, NotFoundMode::Default);
    assert!(!user.definition().translate_db_errors);

    // Per-model options still override the plugin-level defaults.
    registry
        .add_named(
            "Post",
            ModelDefinition::new("posts"),
            ModelOptions::from_value(json!({"boomNotFound": true})).unwrap(),
        )
        .unwrap();
    let post = registry.get("Post").unwrap();
    assert_eq!(post.definition().not_found, NotFoundMode::Http);
}

#[test]
fn bind_context_is_attached_per_model_only() {
    let mut registry = ModelsPlugin::new().register(server()).unwrap();
    registry
        .add_named(
            "User",
            ModelDefinition::new("users"),
            ModelOptions::default().with_bind(json!({"tenant": "acme"})),
        )
        .unwrap();
    registry
        .add_named("Post", ModelDefinition::new("posts"), ModelOptions::default())
        .unwrap();

    assert_eq!(
        registry.get("User").unwrap().definition().bind,
        Some(json!({"tenant": "acme"}))
    );
    assert_eq!(registry.get("Post").unwrap().definition().bind, None);
}

#[test]
fn injected_server_reaches_the_owning_context() {
    let ctx = server();
    let mut registry = ModelsPlugin::new().register(Arc::clone(&ctx)).unwrap();
    registry
        .add_named("User", ModelDefinition::new("users"), ModelOptions::default())
        .unwrap();

    let user = registry.get("User").unwrap();
    let injected = user.server().expect("server should be injected");
    assert_eq!(injected.name(), "api");
    assert_eq!(injected.db(None).unwrap().name(), "primary");
}

#[test]
fn shortcut_methods_delegate_to_fresh_query_builders() {
    let mut registry = ModelsPlugin::new().register(server()).unwrap();
    registry
        .add_named("User", ModelDefinition::new("users"), ModelOptions::default())
        .unwrap();
    let user = registry.get("User").unwrap();

    let shortcut = user.insert(json!({"name": "amy"})).unwrap();
    let direct = user.query().insert(json!({"name": "amy"}));
    assert_eq!(shortcut.build().unwrap(), direct.build().unwrap());

    let shortcut = user.delete_by_id(3).unwrap();
    let direct = user.query().delete_by_id(3);
    assert_eq!(shortcut.build().unwrap(), direct.build().unwrap());
}

#[test]
fn registration_options_are_validated() {
    let mut registry = ModelsPlugin::new().register(server()).unwrap();
    let err = ModelOptions::from_value(json!({"unknownFlag": true})).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidOptions { .. }));

    // A model synthesized from a bad literal object fails registration.
    let err = registry
        .add_named("User", json!({"name": "User"}), ModelOptions::default())
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidModel { .. }));
}
