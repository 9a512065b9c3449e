//! Default-variant selection by audience

use std::collections::HashMap;

use crate::config::ResolutionConfig;
use crate::module::types::ImplementationVariant;

/// Chooses the implementation key a tenant gets when its assignment does not
/// pin an implementation. `None` means "no audience match".
///
/// `variants` holds only the module's usable variants.
pub trait AudiencePolicy: Send + Sync {
    fn preferred_key(&self, tenant_id: &str, variants: &[ImplementationVariant]) -> Option<String>;
}

/// Audience lookups driven by `ResolutionConfig`
///
/// tenant -> audience comes from `tenant_audiences`; audience -> key from
/// `audience_keys`, or else the first active variant (by key) targeting that audience.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredAudiencePolicy {
    tenant_audiences: HashMap<String, String>,
    audience_keys: HashMap<String, String>,
}

impl ConfiguredAudiencePolicy {
    pub fn new(
        tenant_audiences: HashMap<String, String>,
        audience_keys: HashMap<String, String>,
    ) -> Self {
        Self {
            tenant_audiences,
            audience_keys,
        }
    }

    pub fn from_config(config: &ResolutionConfig) -> Self {
        Self::new(config.tenant_audiences.clone(), config.audience_keys.clone())
    }
}

impl AudiencePolicy for ConfiguredAudiencePolicy {
    fn preferred_key(&self, tenant_id: &str, variants: &[ImplementationVariant]) -> Option<String> {
        let audience = self.tenant_audiences.get(tenant_id)?;
        if let Some(key) = self.audience_keys.get(audience) {
            return Some(key.clone());
        }
        variants
            .iter()
            .filter(|v| v.is_active && &v.target_audience == audience)
            .map(|v| v.implementation_key.clone())
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variant(key: &str, audience: &str) -> ImplementationVariant {
        ImplementationVariant {
            id: format!("v-{}", key),
            base_module_id: "m1".into(),
            implementation_key: key.into(),
            component_path: key.into(),
            target_audience: audience.into(),
            complexity_tier: "basic".into(),
            is_active: true,
            archived_at: None,
            default_config: json!({}),
        }
    }

    #[test]
    fn test_explicit_audience_key_wins() {
        let policy = ConfiguredAudiencePolicy::new(
            HashMap::from([("acme".to_string(), "enterprise".to_string())]),
            HashMap::from([("enterprise".to_string(), "advanced".to_string())]),
        );
        assert_eq!(
            policy.preferred_key("acme", &[variant("pro", "enterprise")]),
            Some("advanced".to_string())
        );
    }

    #[test]
    fn test_variant_audience_match() {
        let policy = ConfiguredAudiencePolicy::new(
            HashMap::from([("acme".to_string(), "smb".to_string())]),
            HashMap::new(),
        );
        let variants = [
            variant("standard", "all"),
            variant("zlite", "smb"),
            variant("lite", "smb"),
        ];
        assert_eq!(policy.preferred_key("acme", &variants), Some("lite".to_string()));
    }

    #[test]
    fn test_unknown_tenant_has_no_match() {
        let policy = ConfiguredAudiencePolicy::default();
        assert_eq!(policy.preferred_key("acme", &[variant("standard", "all")]), None);
    }

    #[test]
    fn test_inactive_variant_is_skipped() {
        let policy = ConfiguredAudiencePolicy::new(
            HashMap::from([("acme".to_string(), "smb".to_string())]),
            HashMap::new(),
        );
        let mut alpha = variant("alpha", "smb");
        alpha.is_active = false;
        let variants = [alpha, variant("beta", "smb")];
        assert_eq!(policy.preferred_key("acme", &variants), Some("beta".to_string()));
    }
}
