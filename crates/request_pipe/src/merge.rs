//! Payload Reconciliation
//!
//! Service defaults and call-time values are combined with a recursive,
//! mutation-free deep merge. Neither input is ever modified, so a service's
//! defaults can be shared by any number of concurrent calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side wins when a service default and a call value share a key.
///
/// | policy    | base            | overlay (wins)  |
/// |-----------|-----------------|-----------------|
/// | `default` | call value      | service default |
/// | `mixin`   | service default | call value      |
/// | `replace` | service default | call value      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignPolicy {
    /// Service defaults override the caller on conflicting keys.
    Default,
    /// Caller values override a copy of the service defaults.
    Mixin,
    /// Caller values override the service defaults. Used when no policy is declared.
    #[default]
    Replace,
}

impl AssignPolicy {
    /// Reconcile one payload slot (`path`, `params` or `data`).
    pub fn reconcile(self, service_default: Option<&Value>, call: Option<&Value>) -> Option<Value> {
        match self {
            AssignPolicy::Default => merge_optional(call, service_default),
            AssignPolicy::Mixin | AssignPolicy::Replace => merge_optional(service_default, call),
        }
    }
}

/// Merge `overlay` onto `base`, returning a fresh value.
///
/// Objects merge key by key; any other overlay value (arrays included)
/// replaces the base value wholesale.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let value = match base_map.get(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// A missing side is treated as absent: the other side is copied.
pub fn merge_optional(base: Option<&Value>, overlay: Option<&Value>) -> Option<Value> {
    match (base, overlay) {
        (Some(base), Some(overlay)) => Some(deep_merge(base, overlay)),
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    }
}
