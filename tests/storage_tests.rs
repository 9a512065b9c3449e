//! Durable storage tests

use serde_json::json;
use tempfile::TempDir;

use tenant_module_engine::config::{DatabaseBackendConfig, EngineConfig, StorageConfig};
use tenant_module_engine::module::types::{NewModule, NewVariant};
use tenant_module_engine::module::OperationalStatus;
use tenant_module_engine::storage::Storage;
use tenant_module_engine::ModuleEngine;

mod common;
use common::admin;

fn disk_config(dir: &TempDir, backend: DatabaseBackendConfig) -> EngineConfig {
    EngineConfig {
        storage: StorageConfig {
            database_backend: backend,
            data_dir: dir.path().to_string_lossy().into_owned(),
        },
        ..Default::default()
    }
}

async fn seed_and_assign(engine: &ModuleEngine) -> String {
    let module = engine
        .create_module(
            NewModule {
                slug: "alerts".to_string(),
                name: "Alerts".to_string(),
                category: "operations".to_string(),
            },
            &admin(),
        )
        .await
        .unwrap();
    engine
        .add_variant(
            &module.id,
            NewVariant::new("standard", "alerts/Standard")
                .with_default_config(json!({"channel": "email"})),
            &admin(),
        )
        .await
        .unwrap();
    engine
        .request_assignment("acme", "alerts", None, &admin())
        .await
        .unwrap();
    engine
        .update_assignment_status("acme", &module.id, OperationalStatus::Disabled, &admin())
        .await
        .unwrap();
    engine.flush().unwrap();
    module.id
}

#[cfg(feature = "redb")]
#[tokio::test]
async fn test_redb_state_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();

    let module_id = {
        let engine =
            ModuleEngine::open(disk_config(&temp_dir, DatabaseBackendConfig::Redb)).unwrap();
        seed_and_assign(&engine).await
    };

    let engine = ModuleEngine::open(disk_config(&temp_dir, DatabaseBackendConfig::Redb)).unwrap();
    let module = engine.get_module_by_slug("alerts").unwrap();
    assert_eq!(module.id, module_id);
    assert_eq!(engine.list_variants(&module_id).unwrap().len(), 1);

    let resolved = engine.resolve("acme", "alerts", None).unwrap();
    assert!(!resolved.is_active);
    assert_eq!(resolved.config, json!({"channel": "email"}));
}

#[cfg(feature = "sled")]
#[tokio::test]
async fn test_sled_state_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();

    let module_id = {
        let engine =
            ModuleEngine::open(disk_config(&temp_dir, DatabaseBackendConfig::Sled)).unwrap();
        seed_and_assign(&engine).await
    };

    let engine = ModuleEngine::open(disk_config(&temp_dir, DatabaseBackendConfig::Sled)).unwrap();
    assert_eq!(
        engine.get_assignment("acme", &module_id).unwrap().status,
        OperationalStatus::Disabled
    );
}

#[test]
fn test_default_storage_opens_in_temp_dir() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::new(temp_dir.path()).unwrap();

    assert!(storage.catalog().list_modules().unwrap().is_empty());
    assert_eq!(storage.backups().backup_count().unwrap(), 0);
    storage.flush().unwrap();
}

#[tokio::test]
async fn test_memory_storage_is_isolated_per_instance() {
    let first = ModuleEngine::builder(common::memory_config())
        .storage(Storage::in_memory().unwrap())
        .build()
        .unwrap();
    seed_and_assign(&first).await;

    let second = ModuleEngine::builder(common::memory_config())
        .storage(Storage::in_memory().unwrap())
        .build()
        .unwrap();
    assert!(second.list_modules().unwrap().is_empty());
}
