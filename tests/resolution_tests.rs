//! Request-time variant resolution

use serde_json::json;

use tenant_module_engine::module::registry::ImplementationDescriptor;
use tenant_module_engine::module::types::NewVariant;
use tenant_module_engine::module::{ModuleError, OperationalStatus};

mod common;
use common::*;

#[tokio::test]
async fn test_config_layers_merge_in_order() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({"a": 1, "b": 2}))]).await;
    t.enable("acme", &module).await;
    t.engine
        .update_assignment_config("acme", &module.id, json!({"b": 3, "c": 4}), &admin())
        .await
        .unwrap();

    let resolved = t
        .engine
        .resolve("acme", "alerts", Some(&json!({"c": 5})))
        .unwrap();
    assert_eq!(resolved.config, json!({"a": 1, "b": 3, "c": 5}));
    assert!(resolved.is_active);
    assert_eq!(resolved.status, OperationalStatus::Enabled);
}

#[tokio::test]
async fn test_disabled_assignment_resolves_inactive() {
    let t = TestEngine::new();
    let (module, variants) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    t.engine
        .request_assignment("acme", "alerts", None, &admin())
        .await
        .unwrap();
    t.engine
        .update_assignment_status("acme", &module.id, OperationalStatus::Disabled, &admin())
        .await
        .unwrap();

    let resolved = t.engine.resolve("acme", "alerts", None).unwrap();
    assert!(!resolved.is_active);
    assert_eq!(resolved.status, OperationalStatus::Disabled);
    assert_eq!(resolved.variant.id, variants[0].id);
}

#[tokio::test]
async fn test_missing_pieces_are_not_found() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;

    // Unknown module
    assert!(matches!(
        t.engine.resolve("acme", "billing", None),
        Err(ModuleError::NotFound(_))
    ));
    // No assignment
    assert!(matches!(
        t.engine.resolve("acme", "alerts", None),
        Err(ModuleError::NotFound(_))
    ));

    t.enable("acme", &module).await;
    t.engine
        .set_assignment_visibility("acme", &module.id, false, &admin())
        .await
        .unwrap();
    assert!(matches!(
        t.engine.resolve("acme", "alerts", None),
        Err(ModuleError::NotFound(_))
    ));

    t.engine
        .set_assignment_visibility("acme", &module.id, true, &admin())
        .await
        .unwrap();
    assert!(t.engine.resolve("acme", "alerts", None).is_ok());

    t.engine.delete_module(&module.id, &admin()).await.unwrap();
    assert!(matches!(
        t.engine.resolve("acme", "alerts", None),
        Err(ModuleError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pinned_variant_never_falls_back() {
    let t = TestEngine::new();
    let (module, variants) = t
        .seed_module("alerts", &[("premium", json!({})), ("standard", json!({}))])
        .await;
    let premium = &variants[0];

    t.engine
        .request_assignment("acme", "alerts", Some(premium.id.clone()), &admin())
        .await
        .unwrap();
    assert_eq!(
        t.engine.resolve("acme", "alerts", None).unwrap().variant.id,
        premium.id
    );

    t.engine.remove_variant(&premium.id, &admin()).await.unwrap();
    assert!(matches!(
        t.engine.resolve("acme", "alerts", None),
        Err(ModuleError::ImplementationUnavailable(_))
    ));

    // Clearing the pin brings back the default
    t.engine
        .set_assignment_implementation("acme", &module.id, None, &admin())
        .await
        .unwrap();
    let resolved = t.engine.resolve("acme", "alerts", None).unwrap();
    assert_eq!(resolved.variant.implementation_key, "standard");
}

#[tokio::test]
async fn test_no_usable_default_is_unavailable() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("premium", json!({}))]).await;
    t.enable("acme", &module).await;

    assert!(matches!(
        t.engine.resolve("acme", "alerts", None),
        Err(ModuleError::ImplementationUnavailable(_))
    ));
}

#[tokio::test]
async fn test_audience_selects_default_variant() {
    let mut config = memory_config();
    config
        .resolution
        .tenant_audiences
        .insert("acme".to_string(), "enterprise".to_string());
    config
        .resolution
        .audience_keys
        .insert("enterprise".to_string(), "premium".to_string());
    config.resolution.registry.push(ImplementationDescriptor {
        key: "premium".to_string(),
        display_name: "Premium".to_string(),
        description: "Full feature set".to_string(),
        capabilities: vec!["escalation".to_string()],
    });
    let t = TestEngine::with_config(config);

    let (alerts, _) = t
        .seed_module("alerts", &[("premium", json!({})), ("standard", json!({}))])
        .await;
    let (reports, _) = t.seed_module("reports", &[("standard", json!({}))]).await;
    t.enable("acme", &alerts).await;
    t.enable("acme", &reports).await;
    t.enable("globex", &alerts).await;

    let resolved = t.engine.resolve("acme", "alerts", None).unwrap();
    assert_eq!(resolved.variant.implementation_key, "premium");
    assert_eq!(resolved.implementation.display_name, "Premium");
    assert_eq!(resolved.implementation.capabilities, vec!["escalation".to_string()]);

    // Audience key without a matching variant falls back to the default key
    let resolved = t.engine.resolve("acme", "reports", None).unwrap();
    assert_eq!(resolved.variant.implementation_key, "standard");

    // Tenants without an audience get the default key
    let resolved = t.engine.resolve("globex", "alerts", None).unwrap();
    assert_eq!(resolved.variant.implementation_key, "standard");
}

#[tokio::test]
async fn test_audience_skips_unusable_variant() {
    let mut config = memory_config();
    config
        .resolution
        .tenant_audiences
        .insert("acme".to_string(), "smb".to_string());
    let t = TestEngine::with_config(config);

    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    for key in ["alpha", "beta"] {
        let mut variant = NewVariant::new(key, format!("alerts/{}", key));
        variant.target_audience = "smb".to_string();
        t.engine.add_variant(&module.id, variant, &admin()).await.unwrap();
    }
    let alpha = t
        .engine
        .list_variants(&module.id)
        .unwrap()
        .into_iter()
        .find(|v| v.implementation_key == "alpha")
        .unwrap();
    t.catalog
        .update_variant(&alpha.id, |v| {
            v.is_active = false;
            true
        })
        .unwrap();
    t.enable("acme", &module).await;

    let resolved = t.engine.resolve("acme", "alerts", None).unwrap();
    assert_eq!(resolved.variant.implementation_key, "beta");
}

#[tokio::test]
async fn test_unknown_implementation_key_gets_default_descriptor() {
    let t = TestEngine::new();
    let (_, variants) = t
        .seed_module("alerts", &[("experimental", json!({})), ("standard", json!({}))])
        .await;
    t.engine
        .request_assignment("acme", "alerts", Some(variants[0].id.clone()), &admin())
        .await
        .unwrap();

    let resolved = t.engine.resolve("acme", "alerts", None).unwrap();
    assert_eq!(resolved.variant.implementation_key, "experimental");
    assert_eq!(resolved.implementation.key, "standard");
}

#[tokio::test]
async fn test_invalid_overrides_are_rejected() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    t.enable("acme", &module).await;

    match t.engine.resolve("acme", "alerts", Some(&json!(["not", "an", "object"]))) {
        Err(ModuleError::ConfigValidation(errors)) => assert!(!errors.is_empty()),
        other => panic!("expected ConfigValidation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resolution_has_no_side_effects() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({"x": 1}))]).await;
    t.enable("acme", &module).await;
    let before = t.engine.get_assignment("acme", &module.id).unwrap();
    let events = t.audit.events().len();

    for _ in 0..5 {
        t.engine
            .resolve("acme", "alerts", Some(&json!({"x": 2})))
            .unwrap();
    }

    assert_eq!(t.engine.get_assignment("acme", &module.id).unwrap(), before);
    assert_eq!(t.audit.events().len(), events);
}
