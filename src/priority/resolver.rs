//! Pod priority resolution
//!
//! On create, a pod's priority is resolved from its PriorityClass (or the
//! cluster default) and stamped onto the spec. On update, a previously
//! stamped priority is carried forward; it is never recomputed.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use super::index::{default_priority_class, IndexError, PriorityClassIndex};
use super::namespace::NamespacePolicy;
use super::{is_critical_pod, DEFAULT_PRIORITY_WHEN_NO_DEFAULT_CLASS_EXISTS, SYSTEM_CLUSTER_CRITICAL};
use crate::admission::WriteOperation;
use crate::features::FeatureGates;
use crate::Error;

/// Resolves and stamps the effective priority on pods
pub struct PriorityResolver {
    index: Arc<dyn PriorityClassIndex>,
    critical_pod_annotation: bool,
}

impl PriorityResolver {
    /// Create a resolver reading classes from `index`
    pub fn new(index: Arc<dyn PriorityClassIndex>, features: FeatureGates) -> Self {
        Self {
            index,
            critical_pod_annotation: features.critical_pod_annotation,
        }
    }

    /// Resolve the priority of `pod` in place
    ///
    /// `old_pod` is required for updates.
    pub fn resolve(
        &self,
        operation: WriteOperation,
        namespace: &str,
        pod: &mut Pod,
        old_pod: Option<&Pod>,
    ) -> Result<(), Error> {
        match operation {
            WriteOperation::Update => {
                let old_pod = old_pod.ok_or_else(|| Error::unconvertible("Pod"))?;
                preserve_priority(pod, old_pod)
            }
            WriteOperation::Create => self.resolve_on_create(namespace, pod),
        }
    }

    fn resolve_on_create(&self, namespace: &str, pod: &mut Pod) -> Result<(), Error> {
        let spec = pod
            .spec
            .as_mut()
            .ok_or_else(|| Error::malformed("Pod", "pod spec is missing"))?;

        let mut class_name = spec
            .priority_class_name
            .clone()
            .filter(|name| !name.is_empty());

        if class_name.is_none()
            && self.critical_pod_annotation
            && is_critical_pod(namespace, pod.metadata.annotations.as_ref())
        {
            debug!(
                namespace = %namespace,
                pod = ?pod.metadata.name,
                "Critical pod annotation present, using {}",
                SYSTEM_CLUSTER_CRITICAL
            );
            class_name = Some(SYSTEM_CLUSTER_CRITICAL.to_string());
        }

        let priority = match class_name.take() {
            None => {
                let (default_name, value) = self.default_priority()?;
                class_name = default_name;
                value
            }
            Some(name) => {
                let value = self.class_priority(&name, namespace)?;
                class_name = Some(name);
                value
            }
        };

        if let Some(requested) = spec.priority {
            if requested != priority {
                return Err(Error::forbidden(format!(
                    "the integer value of priority ({}) must not be provided in pod spec; \
                     priority admission controller computed {} from the given PriorityClass name",
                    requested, priority
                )));
            }
        }

        debug!(
            namespace = %namespace,
            pod = ?pod.metadata.name,
            priority_class = ?class_name,
            priority,
            "Resolved pod priority"
        );

        if class_name.is_some() {
            spec.priority_class_name = class_name;
        }
        spec.priority = Some(priority);
        Ok(())
    }

    /// Value of the named class, subject to the namespace restriction
    fn class_priority(&self, name: &str, namespace: &str) -> Result<i32, Error> {
        if !NamespacePolicy::is_permitted(name, namespace) {
            return Err(Error::forbidden(format!(
                "pods with {} priorityClass is not permitted in {} namespace",
                name, namespace
            )));
        }

        match self.index.get(name) {
            Ok(pc) => Ok(pc.value),
            Err(IndexError::NotFound(_)) => Err(Error::forbidden(format!(
                "no PriorityClass with name {} was found",
                name
            ))),
            Err(e) => Err(Error::transient(format!(
                "failed to get PriorityClass with name {}: {}",
                name, e
            ))),
        }
    }

    /// Name and value of the current default class, or the fallback value
    /// with no name when none is marked
    fn default_priority(&self) -> Result<(Option<String>, i32), Error> {
        let classes = self
            .index
            .list()
            .map_err(|e| Error::transient(format!("failed to get default priority class: {}", e)))?;

        Ok(match default_priority_class(&classes) {
            Some(pc) => (pc.metadata.name.clone(), pc.value),
            None => (None, DEFAULT_PRIORITY_WHEN_NO_DEFAULT_CLASS_EXISTS),
        })
    }
}

/// Carry a stamped priority forward when an update omits it
///
/// API validation rejects changes to priority fields, so nothing else is
/// inspected here.
fn preserve_priority(pod: &mut Pod, old_pod: &Pod) -> Result<(), Error> {
    let old_priority = old_pod.spec.as_ref().and_then(|s| s.priority);
    let spec = pod
        .spec
        .as_mut()
        .ok_or_else(|| Error::malformed("Pod", "pod spec is missing"))?;

    if spec.priority.is_none() && old_priority.is_some() {
        spec.priority = old_priority;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::index::MockPriorityClassIndex;
    use crate::priority::{CRITICAL_POD_ANNOTATION, NAMESPACE_SYSTEM, SYSTEM_CRITICAL_PRIORITY};
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::scheduling::v1::PriorityClass;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::*;
    use std::collections::BTreeMap;

    // =========================================================================
    // Test Fixtures
    // =========================================================================

    fn priority_class(name: &str, value: i32, global_default: bool) -> Arc<PriorityClass> {
        Arc::new(PriorityClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            value,
            global_default: Some(global_default),
            ..Default::default()
        })
    }

    fn pod(class_name: Option<&str>, priority: Option<i32>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                priority_class_name: class_name.map(str::to_string),
                priority,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn critical_pod() -> Pod {
        let mut pod = pod(None, None);
        pod.metadata.annotations = Some(BTreeMap::from([(
            CRITICAL_POD_ANNOTATION.to_string(),
            String::new(),
        )]));
        pod
    }

    /// Index that lists the given classes and serves `get` from them
    fn index_with(classes: Vec<Arc<PriorityClass>>) -> MockPriorityClassIndex {
        let mut index = MockPriorityClassIndex::new();
        let listed = classes.clone();
        index.expect_list().returning(move || Ok(listed.clone()));
        index.expect_get().returning(move |name| {
            classes
                .iter()
                .find(|pc| pc.metadata.name.as_deref() == Some(name))
                .cloned()
                .ok_or_else(|| IndexError::NotFound(name.to_string()))
        });
        index
    }

    fn resolver(index: MockPriorityClassIndex) -> PriorityResolver {
        PriorityResolver::new(Arc::new(index), FeatureGates::default())
    }

    fn spec(pod: &Pod) -> &PodSpec {
        pod.spec.as_ref().unwrap()
    }

    // =========================================================================
    // Create: default resolution
    // =========================================================================

    #[test]
    fn create_without_class_or_default_uses_fallback_priority() {
        let resolver = resolver(index_with(vec![priority_class("gold", 1000, false)]));
        let mut pod = pod(None, None);

        resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority, Some(DEFAULT_PRIORITY_WHEN_NO_DEFAULT_CLASS_EXISTS));
        assert_eq!(spec(&pod).priority_class_name, None);
    }

    #[test]
    fn create_with_empty_class_name_keeps_it_empty_when_no_default() {
        let resolver = resolver(index_with(vec![]));
        let mut pod = pod(Some(""), None);

        resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority, Some(0));
        assert_eq!(spec(&pod).priority_class_name.as_deref(), Some(""));
    }

    #[test]
    fn create_without_class_uses_global_default() {
        let resolver = resolver(index_with(vec![
            priority_class("gold", 1000, false),
            priority_class("standard", 100, true),
        ]));
        let mut pod = pod(None, None);

        resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority, Some(100));
        assert_eq!(spec(&pod).priority_class_name.as_deref(), Some("standard"));
    }

    /// Story: two defaults exist after a create race; the lower value wins
    #[test]
    fn story_racing_defaults_resolve_to_lowest_value() {
        let resolver = resolver(index_with(vec![
            priority_class("ten", 10, true),
            priority_class("five", 5, true),
        ]));
        let mut pod = pod(None, None);

        resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority, Some(5));
        assert_eq!(spec(&pod).priority_class_name.as_deref(), Some("five"));
    }

    #[test]
    fn create_fails_transiently_when_index_cannot_list() {
        let mut index = MockPriorityClassIndex::new();
        index
            .expect_list()
            .returning(|| Err(IndexError::Unavailable("cache not started".to_string())));
        let resolver = resolver(index);
        let mut pod = pod(None, None);

        let err = resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(err.message().starts_with("failed to get default priority class"));
        assert_eq!(spec(&pod).priority, None);
    }

    // =========================================================================
    // Create: explicit class
    // =========================================================================

    #[test]
    fn create_with_named_class_uses_its_value() {
        let mut index = MockPriorityClassIndex::new();
        index
            .expect_get()
            .with(eq("gold"))
            .times(1)
            .returning(|_| Ok(priority_class("gold", 1000, false)));
        index.expect_list().never();
        let resolver = resolver(index);
        let mut pod = pod(Some("gold"), None);

        resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority, Some(1000));
        assert_eq!(spec(&pod).priority_class_name.as_deref(), Some("gold"));
    }

    #[test]
    fn create_with_unknown_class_is_forbidden() {
        let resolver = resolver(index_with(vec![]));
        let mut pod = pod(Some("platinum"), None);

        let err = resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap_err();

        assert!(matches!(err, Error::Forbidden { .. }));
        assert_eq!(err.message(), "no PriorityClass with name platinum was found");
    }

    #[test]
    fn create_fails_transiently_when_lookup_fails() {
        let mut index = MockPriorityClassIndex::new();
        index
            .expect_get()
            .returning(|_| Err(IndexError::Unavailable("connection reset".to_string())));
        let resolver = resolver(index);
        let mut pod = pod(Some("gold"), None);

        let err = resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(err
            .message()
            .starts_with("failed to get PriorityClass with name gold"));
    }

    /// Story: an ordinary workload tries to claim system preemption power
    #[test]
    fn story_system_class_outside_system_namespace_is_forbidden() {
        let mut index = MockPriorityClassIndex::new();
        index.expect_get().never();
        let resolver = resolver(index);
        let mut pod = pod(Some(SYSTEM_CLUSTER_CRITICAL), None);

        let err = resolver
            .resolve(WriteOperation::Create, "team-a", &mut pod, None)
            .unwrap_err();

        assert!(matches!(err, Error::Forbidden { .. }));
        assert_eq!(
            err.message(),
            "pods with system-cluster-critical priorityClass is not permitted in team-a namespace"
        );
    }

    /// Story: the same system workload is admitted in the system namespace
    #[test]
    fn story_system_class_in_system_namespace_is_resolved() {
        let resolver = resolver(index_with(vec![priority_class(
            SYSTEM_CLUSTER_CRITICAL,
            SYSTEM_CRITICAL_PRIORITY,
            false,
        )]));
        let mut pod = pod(Some(SYSTEM_CLUSTER_CRITICAL), None);

        resolver
            .resolve(WriteOperation::Create, NAMESPACE_SYSTEM, &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority, Some(SYSTEM_CRITICAL_PRIORITY));
    }

    // =========================================================================
    // Create: caller-supplied priority
    // =========================================================================

    #[test]
    fn create_with_mismatched_priority_is_forbidden() {
        let resolver = resolver(index_with(vec![priority_class("gold", 1000, false)]));
        let mut pod = pod(Some("gold"), Some(42));

        let err = resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap_err();

        assert!(matches!(err, Error::Forbidden { .. }));
        assert!(err
            .message()
            .contains("the integer value of priority (42) must not be provided in pod spec"));
        assert!(err.message().contains("computed 1000"));
    }

    #[test]
    fn create_with_mismatched_priority_against_fallback_is_forbidden() {
        let resolver = resolver(index_with(vec![]));
        let mut pod = pod(None, Some(7));

        let err = resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap_err();

        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[test]
    fn create_with_matching_priority_is_accepted() {
        let resolver = resolver(index_with(vec![priority_class("gold", 1000, false)]));
        let mut pod = pod(Some("gold"), Some(1000));

        resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority, Some(1000));
    }

    // =========================================================================
    // Create: legacy critical pod annotation
    // =========================================================================

    #[test]
    fn critical_annotation_maps_to_cluster_critical_when_enabled() {
        let index = index_with(vec![priority_class(
            SYSTEM_CLUSTER_CRITICAL,
            SYSTEM_CRITICAL_PRIORITY,
            false,
        )]);
        let features = FeatureGates {
            critical_pod_annotation: true,
            ..Default::default()
        };
        let resolver = PriorityResolver::new(Arc::new(index), features);
        let mut pod = critical_pod();

        resolver
            .resolve(WriteOperation::Create, NAMESPACE_SYSTEM, &mut pod, None)
            .unwrap();

        assert_eq!(
            spec(&pod).priority_class_name.as_deref(),
            Some(SYSTEM_CLUSTER_CRITICAL)
        );
        assert_eq!(spec(&pod).priority, Some(SYSTEM_CRITICAL_PRIORITY));
    }

    #[test]
    fn critical_annotation_is_ignored_when_disabled() {
        let resolver = resolver(index_with(vec![priority_class(
            SYSTEM_CLUSTER_CRITICAL,
            SYSTEM_CRITICAL_PRIORITY,
            false,
        )]));
        let mut pod = critical_pod();

        resolver
            .resolve(WriteOperation::Create, NAMESPACE_SYSTEM, &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority_class_name, None);
        assert_eq!(spec(&pod).priority, Some(0));
    }

    #[test]
    fn critical_annotation_does_not_override_explicit_class() {
        let index = index_with(vec![priority_class("gold", 1000, false)]);
        let features = FeatureGates {
            critical_pod_annotation: true,
            ..Default::default()
        };
        let resolver = PriorityResolver::new(Arc::new(index), features);
        let mut pod = critical_pod();
        pod.spec.as_mut().unwrap().priority_class_name = Some("gold".to_string());

        resolver
            .resolve(WriteOperation::Create, NAMESPACE_SYSTEM, &mut pod, None)
            .unwrap();

        assert_eq!(spec(&pod).priority, Some(1000));
    }

    #[test]
    fn create_without_spec_is_malformed() {
        let resolver = resolver(index_with(vec![]));
        let mut pod = Pod::default();

        let err = resolver
            .resolve(WriteOperation::Create, "default", &mut pod, None)
            .unwrap_err();

        assert!(matches!(err, Error::Malformed { .. }));
    }

    // =========================================================================
    // Update: preservation
    // =========================================================================

    #[test]
    fn update_copies_previous_priority_forward() {
        let mut index = MockPriorityClassIndex::new();
        index.expect_get().never();
        index.expect_list().never();
        let resolver = resolver(index);
        let old = pod(Some("gold"), Some(7));
        let mut new = pod(Some("gold"), None);

        resolver
            .resolve(WriteOperation::Update, "default", &mut new, Some(&old))
            .unwrap();

        assert_eq!(spec(&new).priority, Some(7));
        assert_eq!(spec(&new).priority_class_name.as_deref(), Some("gold"));
    }

    #[test]
    fn update_with_same_priority_changes_nothing() {
        let resolver = resolver(MockPriorityClassIndex::new());
        let old = pod(Some("gold"), Some(7));
        let mut new = pod(Some("gold"), Some(7));
        let before = new.clone();

        resolver
            .resolve(WriteOperation::Update, "default", &mut new, Some(&old))
            .unwrap();

        assert_eq!(new, before);
    }

    #[test]
    fn update_never_recomputes_priority() {
        let resolver = resolver(MockPriorityClassIndex::new());
        let old = pod(None, None);
        let mut new = pod(Some("gold"), None);
        let before = new.clone();

        resolver
            .resolve(WriteOperation::Update, "default", &mut new, Some(&old))
            .unwrap();

        assert_eq!(new, before);
    }

    #[test]
    fn update_without_old_pod_is_malformed() {
        let resolver = resolver(MockPriorityClassIndex::new());
        let mut new = pod(None, None);

        let err = resolver
            .resolve(WriteOperation::Update, "default", &mut new, None)
            .unwrap_err();

        assert!(matches!(err, Error::Malformed { .. }));
    }
}
