//! Namespace restrictions on system priority classes
//!
//! Pods running at a system priority can preempt cluster-critical
//! components, so the reserved classes are only usable from the system
//! namespace.

use super::{NAMESPACE_SYSTEM, SYSTEM_PRIORITY_CLASSES};

/// Decides which priority class names a namespace may reference
pub struct NamespacePolicy;

impl NamespacePolicy {
    /// Returns false only when `priority_class_name` is a reserved system
    /// class and `namespace` is not the system namespace
    pub fn is_permitted(priority_class_name: &str, namespace: &str) -> bool {
        let reserved = SYSTEM_PRIORITY_CLASSES
            .iter()
            .any(|(name, _)| *name == priority_class_name);
        !reserved || namespace == NAMESPACE_SYSTEM
    }
}
