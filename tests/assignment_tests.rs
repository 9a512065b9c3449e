//! Tenant assignments: requests, status transitions, config edits, concurrency

use serde_json::json;
use std::sync::Arc;

use tenant_module_engine::module::sinks::AuditAction;
use tenant_module_engine::module::traits::RoleTransitionPolicy;
use tenant_module_engine::module::types::{ActorContext, ActorRole, NewModule};
use tenant_module_engine::module::{ModuleError, OperationalStatus};
use tenant_module_engine::storage::Storage;
use tenant_module_engine::ModuleEngine;

mod common;
use common::*;

#[tokio::test]
async fn test_request_creates_requested_assignment() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;

    let assignment = t
        .engine
        .request_assignment("acme", "alerts", None, &admin())
        .await
        .unwrap();
    assert_eq!(assignment.status, OperationalStatus::Requested);
    assert_eq!(assignment.base_module_id, module.id);
    assert_eq!(assignment.assigned_by, admin().actor_id);
    assert!(assignment.is_visible);
    assert_eq!(assignment.custom_config, json!({}));
    assert!(assignment.activated_at.is_none());

    let err = t
        .engine
        .request_assignment("acme", "alerts", None, &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::AlreadyAssigned { .. }));

    assert!(matches!(
        t.engine.request_assignment("acme", "billing", None, &admin()).await,
        Err(ModuleError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_provisioning_cannot_jump_to_disabled() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    t.engine
        .request_assignment("acme", "alerts", None, &admin())
        .await
        .unwrap();
    for status in [OperationalStatus::PendingApproval, OperationalStatus::Provisioning] {
        t.engine
            .update_assignment_status("acme", &module.id, status, &admin())
            .await
            .unwrap();
    }

    let err = t
        .engine
        .update_assignment_status("acme", &module.id, OperationalStatus::Disabled, &admin())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModuleError::InvalidTransition {
            from: OperationalStatus::Provisioning,
            to: OperationalStatus::Disabled,
        }
    ));
    assert_eq!(
        t.engine.get_assignment("acme", &module.id).unwrap().status,
        OperationalStatus::Provisioning
    );
}

#[tokio::test]
async fn test_self_loops_and_skips_are_rejected() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    t.engine
        .request_assignment("acme", "alerts", None, &admin())
        .await
        .unwrap();

    for next in [OperationalStatus::Requested, OperationalStatus::Enabled] {
        assert!(matches!(
            t.engine
                .update_assignment_status("acme", &module.id, next, &admin())
                .await,
            Err(ModuleError::InvalidTransition { .. })
        ));
    }
}

#[tokio::test]
async fn test_activated_at_tracks_latest_enable() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    t.enable("acme", &module).await;
    assert_eq!(
        t.engine.get_assignment("acme", &module.id).unwrap().activated_at,
        Some(START)
    );

    t.clock.advance(100);
    t.engine
        .update_assignment_status("acme", &module.id, OperationalStatus::Suspended, &admin())
        .await
        .unwrap();
    let suspended = t.engine.get_assignment("acme", &module.id).unwrap();
    assert_eq!(suspended.activated_at, Some(START));
    assert_eq!(suspended.updated_at, START + 100);

    t.clock.advance(100);
    let enabled = t
        .engine
        .update_assignment_status("acme", &module.id, OperationalStatus::Enabled, &admin())
        .await
        .unwrap();
    assert_eq!(enabled.activated_at, Some(START + 200));

    let changes = t.audit.events_of(AuditAction::AssignmentStatusChanged);
    let last = changes.last().unwrap();
    assert_eq!(last.details["from"], json!("SUSPENDED"));
    assert_eq!(last.details["to"], json!("ENABLED"));
}

#[tokio::test]
async fn test_role_policy_limits_tenant_admins() {
    let engine = ModuleEngine::builder(memory_config())
        .storage(Storage::in_memory().unwrap())
        .transition_policy(Arc::new(RoleTransitionPolicy))
        .build()
        .unwrap();
    let module = engine
        .create_module(
            NewModule {
                slug: "alerts".to_string(),
                name: "Alerts".to_string(),
                category: String::new(),
            },
            &admin(),
        )
        .await
        .unwrap();

    let tenant_admin = ActorContext::new("acme", "jane", ActorRole::TenantAdmin);
    engine
        .request_assignment("acme", "alerts", None, &tenant_admin)
        .await
        .unwrap();
    engine
        .update_assignment_status(
            "acme",
            &module.id,
            OperationalStatus::PendingApproval,
            &tenant_admin,
        )
        .await
        .unwrap();

    let err = engine
        .update_assignment_status(
            "acme",
            &module.id,
            OperationalStatus::Provisioning,
            &tenant_admin,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::PermissionDenied(_)));

    engine
        .update_assignment_status("acme", &module.id, OperationalStatus::Provisioning, &admin())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_config_edit_replaces_and_validates() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    t.enable("acme", &module).await;

    t.engine
        .update_assignment_config(
            "acme",
            &module.id,
            json!({"channel": "sms", "quiet": true}),
            &admin(),
        )
        .await
        .unwrap();
    let updated = t
        .engine
        .update_assignment_config("acme", &module.id, json!({"channel": "email"}), &admin())
        .await
        .unwrap();
    assert_eq!(updated.custom_config, json!({"channel": "email"}));

    let err = t
        .engine
        .update_assignment_config("acme", &module.id, json!("loud"), &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::ConfigValidation(_)));
    assert_eq!(
        t.engine.get_assignment("acme", &module.id).unwrap().custom_config,
        json!({"channel": "email"})
    );

    assert!(matches!(
        t.engine
            .update_assignment_config("globex", &module.id, json!({}), &admin())
            .await,
        Err(ModuleError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pin_must_belong_to_module() {
    let t = TestEngine::new();
    let (alerts, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    let (_, report_variants) = t.seed_module("reports", &[("standard", json!({}))]).await;
    t.enable("acme", &alerts).await;

    let err = t
        .engine
        .set_assignment_implementation(
            "acme",
            &alerts.id,
            Some(report_variants[0].id.clone()),
            &admin(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::ImplementationUnavailable(_)));
}

#[tokio::test]
async fn test_list_assigned_modules() {
    let t = TestEngine::new();
    let (reports, _) = t.seed_module("reports", &[("standard", json!({}))]).await;
    let (alerts, alert_variants) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    let (billing, _) = t.seed_module("billing", &[("standard", json!({}))]).await;

    t.enable("acme", &reports).await;
    t.engine
        .request_assignment("acme", "alerts", Some(alert_variants[0].id.clone()), &admin())
        .await
        .unwrap();
    t.enable("acme", &billing).await;
    t.engine.delete_module(&billing.id, &admin()).await.unwrap();
    t.enable("globex", &alerts).await;

    let assigned = t.engine.list_assigned_modules("acme").unwrap();
    let slugs: Vec<&str> = assigned.iter().map(|a| a.module.slug.as_str()).collect();
    assert_eq!(slugs, vec!["alerts", "reports"]);

    assert!(!assigned[0].is_active);
    assert_eq!(
        assigned[0].variant.as_ref().map(|v| v.id.clone()),
        Some(alert_variants[0].id.clone())
    );
    assert!(assigned[1].is_active);
    assert!(assigned[1].variant.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transitions_apply_once() {
    let t = TestEngine::new();
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    t.enable("acme", &module).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = t.engine.clone();
        let module_id = module.id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .update_assignment_status(
                    "acme",
                    &module_id,
                    OperationalStatus::Suspended,
                    &admin(),
                )
                .await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => applied += 1,
            Err(ModuleError::InvalidTransition { from, .. }) => {
                assert_eq!(from, OperationalStatus::Suspended)
            }
            Err(ModuleError::ConcurrentModification(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(
        t.engine.get_assignment("acme", &module.id).unwrap().status,
        OperationalStatus::Suspended
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_config_edits_all_land() {
    let mut config = memory_config();
    config.concurrency.max_attempts = 50;
    config.concurrency.initial_backoff_ms = 1;
    config.concurrency.max_backoff_ms = 5;
    let t = TestEngine::with_config(config);
    let (module, _) = t.seed_module("alerts", &[("standard", json!({}))]).await;
    t.enable("acme", &module).await;

    let mut handles = Vec::new();
    for writer in 0..8 {
        let engine = t.engine.clone();
        let module_id = module.id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .update_assignment_config("acme", &module_id, json!({ "writer": writer }), &admin())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let final_config = t.engine.get_assignment("acme", &module.id).unwrap().custom_config;
    let writer = final_config["writer"].as_u64().unwrap();
    assert!(writer < 8);
    assert_eq!(t.audit.events_of(AuditAction::AssignmentConfigUpdated).len(), 8);
}
