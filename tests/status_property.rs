//! Property tests for the status machine and config merge
//!
//! Invariants that must hold for every state and every document.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use tenant_module_engine::module::resolver::merge_config;
use tenant_module_engine::module::status::{validate_transition, OperationalStatus};

fn any_status() -> impl Strategy<Value = OperationalStatus> {
    (0..OperationalStatus::ALL.len()).prop_map(|i| OperationalStatus::ALL[i])
}

fn flat_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-e]", 0i64..100, 0..5).prop_map(|entries| {
        let map: Map<String, Value> = entries.into_iter().map(|(k, v)| (k, json!(v))).collect();
        Value::Object(map)
    })
}

proptest! {
    #[test]
    fn test_validate_matches_transition_table(from in any_status(), to in any_status()) {
        let allowed = from.allowed_targets().contains(&to);
        prop_assert_eq!(validate_transition(from, to).is_ok(), allowed);
    }

    #[test]
    fn test_no_self_loops(status in any_status()) {
        prop_assert!(validate_transition(status, status).is_err());
    }

    #[test]
    fn test_random_walk_stays_in_table(steps in prop::collection::vec(0usize..8, 0..40)) {
        // Invariant: following only allowed targets never produces a rejected step
        let mut current = OperationalStatus::INITIAL;
        for choice in steps {
            let targets = current.allowed_targets();
            prop_assert!(!targets.is_empty(), "{} is a dead end", current);
            let next = targets[choice % targets.len()];
            prop_assert!(validate_transition(current, next).is_ok());
            current = next;
        }
    }

    #[test]
    fn test_status_parse_is_case_insensitive(status in any_status(), upper in any::<bool>()) {
        let text = if upper {
            status.as_str().to_string()
        } else {
            status.as_str().to_lowercase().replace('_', "-")
        };
        prop_assert_eq!(text.parse::<OperationalStatus>().unwrap(), status);
    }

    #[test]
    fn test_later_layers_win(
        base in flat_object(),
        custom in flat_object(),
        overrides in flat_object(),
    ) {
        let merged = merge_config(&[&base, &custom, &overrides]);
        let merged = merged.as_object().unwrap();

        for layer in [&base, &custom, &overrides] {
            for key in layer.as_object().unwrap().keys() {
                prop_assert!(merged.contains_key(key));
            }
        }
        for (key, value) in overrides.as_object().unwrap() {
            prop_assert_eq!(&merged[key], value);
        }
        for (key, value) in custom.as_object().unwrap() {
            if !overrides.as_object().unwrap().contains_key(key) {
                prop_assert_eq!(&merged[key], value);
            }
        }
    }
}

#[test]
fn test_active_states() {
    let active: Vec<OperationalStatus> = OperationalStatus::ALL
        .iter()
        .copied()
        .filter(|s| s.is_active())
        .collect();
    assert_eq!(
        active,
        vec![
            OperationalStatus::Enabled,
            OperationalStatus::Upgrading,
            OperationalStatus::UpToDate,
        ]
    );
}
