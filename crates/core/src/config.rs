use serde::{Deserialize, Serialize};

pub const DEFAULT_LIFECYCLE_FINALIZER: &str = "tether.dev/lifecycle-finalizer";
pub const DEFAULT_COMPANION_FINALIZER: &str = "tether.dev/companion-finalizer";
pub const DEFAULT_LABEL_REMOVAL_FINALIZER: &str = "tether.dev/label-removal-finalizer";
pub const DEFAULT_MANAGED_BY_LABEL: &str = "operator.tether.dev/managed-by";
pub const DEFAULT_MANAGED_BY_VALUE: &str = "tether";
pub const DEFAULT_FIELD_OWNER: &str = "tether.dev/lifecycle";

/// Reserved tokens injected into every lifecycle component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Primary finalizer, held for the whole manifest lifetime.
    pub lifecycle_finalizer: String,
    /// Held while a companion instance may exist in the target environment.
    pub companion_finalizer: String,
    /// Held until ownership labels are stripped from synced resources.
    pub label_removal_finalizer: String,
    pub managed_by_label: String,
    pub managed_by_value: String,
    /// Field manager used for status patches.
    pub field_owner: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            lifecycle_finalizer: DEFAULT_LIFECYCLE_FINALIZER.to_string(),
            companion_finalizer: DEFAULT_COMPANION_FINALIZER.to_string(),
            label_removal_finalizer: DEFAULT_LABEL_REMOVAL_FINALIZER.to_string(),
            managed_by_label: DEFAULT_MANAGED_BY_LABEL.to_string(),
            managed_by_value: DEFAULT_MANAGED_BY_VALUE.to_string(),
            field_owner: DEFAULT_FIELD_OWNER.to_string(),
        }
    }
}

impl LifecycleConfig {
    /// Defaults overlaid with `TETHER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let pick = |key: &str, default: String| lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default);
        let d = Self::default();
        Self {
            lifecycle_finalizer: pick("TETHER_LIFECYCLE_FINALIZER", d.lifecycle_finalizer),
            companion_finalizer: pick("TETHER_COMPANION_FINALIZER", d.companion_finalizer),
            label_removal_finalizer: pick("TETHER_LABEL_REMOVAL_FINALIZER", d.label_removal_finalizer),
            managed_by_label: pick("TETHER_MANAGED_BY_LABEL", d.managed_by_label),
            managed_by_value: pick("TETHER_MANAGED_BY_VALUE", d.managed_by_value),
            field_owner: pick("TETHER_FIELD_OWNER", d.field_owner),
        }
    }

    /// Finalizers attached to every manifest on first sight.
    pub fn mandatory_finalizers(&self) -> [&str; 2] {
        [self.lifecycle_finalizer.as_str(), self.label_removal_finalizer.as_str()]
    }
}
