//! Process-wide widget registry
//!
//! Guards against double-initialization when the host embeds the widget
//! from more than one place: the first registration under a name wins
//! and later ones are ignored.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::Mutex;

use crate::chat::ChatConfig;

static REGISTRY: LazyLock<Mutex<HashMap<String, ChatConfig>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Register a widget under `name`. Returns `false` when the name is
/// already taken; the existing configuration is left untouched.
pub fn register(name: &str, config: ChatConfig) -> bool {
    let mut registry = REGISTRY.lock();
    if registry.contains_key(name) {
        tracing::debug!(name, "widget already registered, ignoring");
        return false;
    }
    registry.insert(name.to_string(), config);
    true
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY.lock().contains_key(name)
}

/// The configuration a name was first registered with.
pub fn config(name: &str) -> Option<ChatConfig> {
    REGISTRY.lock().get(name).cloned()
}

/// Remove a registration, freeing the name for reuse.
pub fn unregister(name: &str) -> bool {
    REGISTRY.lock().remove(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_is_idempotent() {
        let name = "test-widget-idempotent";
        assert!(!is_registered(name));

        let first = ChatConfig {
            endpoint: "/first".into(),
            ..ChatConfig::default()
        };
        assert!(register(name, first));
        assert!(is_registered(name));

        let second = ChatConfig {
            endpoint: "/second".into(),
            ..ChatConfig::default()
        };
        assert!(!register(name, second), "second registration is ignored");
        assert_eq!(config(name).map(|c| c.endpoint), Some("/first".into()));

        assert!(unregister(name));
        assert!(!is_registered(name));
    }

    #[test]
    fn test_unregister_unknown_name() {
        assert!(!unregister("test-widget-never-registered"));
    }
}
