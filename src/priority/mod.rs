//! Pod priority resolution and PriorityClass default enforcement
//!
//! - [`namespace`] - which priority classes a namespace may use
//! - [`index`] - read-only view over the cluster's PriorityClasses
//! - [`resolver`] - stamps the effective priority onto pods
//! - [`validator`] - keeps at most one PriorityClass marked as global default

use std::collections::BTreeMap;

pub mod index;
pub mod namespace;
pub mod resolver;
pub mod validator;

pub use index::{
    default_priority_class, IndexError, PriorityClassIndex, ReadinessProbe, ReflectorIndex,
};
pub use namespace::NamespacePolicy;
pub use resolver::PriorityResolver;
pub use validator::PriorityClassValidator;

/// Namespace reserved for system components
pub const NAMESPACE_SYSTEM: &str = "kube-system";

/// Priority class for components critical to the cluster
pub const SYSTEM_CLUSTER_CRITICAL: &str = "system-cluster-critical";

/// Priority class for components critical to a node
pub const SYSTEM_NODE_CRITICAL: &str = "system-node-critical";

/// Value of [`SYSTEM_CLUSTER_CRITICAL`]
pub const SYSTEM_CRITICAL_PRIORITY: i32 = 2_000_000_000;

/// Priority assigned to pods when no PriorityClass is marked as default
pub const DEFAULT_PRIORITY_WHEN_NO_DEFAULT_CLASS_EXISTS: i32 = 0;

/// Legacy annotation marking a pod as critical
pub const CRITICAL_POD_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/critical-pod";

/// Reserved system priority classes and their values
pub const SYSTEM_PRIORITY_CLASSES: [(&str, i32); 2] = [
    (SYSTEM_CLUSTER_CRITICAL, SYSTEM_CRITICAL_PRIORITY),
    (SYSTEM_NODE_CRITICAL, SYSTEM_CRITICAL_PRIORITY + 1000),
];

/// Whether a pod is marked critical through the legacy annotation
///
/// Only pods in the system namespace qualify, and the annotation must be
/// present with an empty value.
pub fn is_critical_pod(namespace: &str, annotations: Option<&BTreeMap<String, String>>) -> bool {
    if namespace != NAMESPACE_SYSTEM {
        return false;
    }
    annotations
        .and_then(|a| a.get(CRITICAL_POD_ANNOTATION))
        .is_some_and(|v| v.is_empty())
}
