//! Typed dispatch of admission requests
//!
//! Requests arrive as untyped [`DynamicObject`]s. They are decoded exactly
//! once, here, into an [`AdmissionTarget`]; everything downstream works on
//! concrete `Pod` and `PriorityClass` values.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::features::FeatureGates;
use crate::priority::{PriorityClassIndex, PriorityClassValidator, PriorityResolver};
use crate::Error;

/// Name the admission plugin reports under
pub const PLUGIN_NAME: &str = "Priority";

/// API group of pods
pub const CORE_GROUP: &str = "";

/// API group of priority classes
pub const SCHEDULING_GROUP: &str = "scheduling.k8s.io";

/// Write operations that priority admission inspects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOperation {
    /// Object is being created
    Create,
    /// Object is being replaced or patched
    Update,
}

/// A pod write
#[derive(Clone, Debug)]
pub struct PodWrite {
    /// Create or update
    pub operation: WriteOperation,
    /// Namespace the pod is written to
    pub namespace: String,
    /// Incoming pod, mutated in place by admission
    pub pod: Pod,
    /// Previously persisted pod, present for updates
    pub old_pod: Option<Pod>,
}

/// A PriorityClass write
#[derive(Clone, Debug)]
pub struct PriorityClassWrite {
    /// Create or update
    pub operation: WriteOperation,
    /// Incoming PriorityClass
    pub class: PriorityClass,
}

/// Resource kinds priority admission inspects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// Pods, handled by the mutating pass
    Pod,
    /// PriorityClasses, handled by the validating pass
    PriorityClass,
}

impl TargetKind {
    /// Classify a request from its metadata alone
    ///
    /// Returns `None` for deletes, subresources and other resources, none of
    /// which are ever inspected.
    pub fn of(request: &AdmissionRequest<DynamicObject>) -> Option<(Self, WriteOperation)> {
        if request.sub_resource.as_deref().is_some_and(|s| !s.is_empty()) {
            return None;
        }

        let operation = match request.operation {
            Operation::Create => WriteOperation::Create,
            Operation::Update => WriteOperation::Update,
            _ => return None,
        };

        let resource = &request.resource;
        match (resource.group.as_str(), resource.resource.as_str()) {
            (CORE_GROUP, "pods") => Some((Self::Pod, operation)),
            (SCHEDULING_GROUP, "priorityclasses") => Some((Self::PriorityClass, operation)),
            _ => None,
        }
    }
}

/// An admission request decoded by resource kind
#[derive(Clone, Debug)]
pub enum AdmissionTarget {
    /// Create or update of a pod
    Pod(PodWrite),
    /// Create or update of a PriorityClass
    PriorityClass(PriorityClassWrite),
    /// Anything else: deletes, subresources, other resources
    PassThrough,
}

impl AdmissionTarget {
    /// Decode an admission request
    ///
    /// Fails only when the request names a pod or PriorityClass but carries
    /// an object that cannot be decoded as one.
    pub fn from_request(request: &AdmissionRequest<DynamicObject>) -> Result<Self, Error> {
        let Some((kind, operation)) = TargetKind::of(request) else {
            return Ok(Self::PassThrough);
        };

        match kind {
            TargetKind::Pod => {
                let pod = decode::<Pod>(request.object.as_ref(), "Pod")?;
                let old_pod = match operation {
                    WriteOperation::Update => {
                        Some(decode::<Pod>(request.old_object.as_ref(), "Pod")?)
                    }
                    WriteOperation::Create => None,
                };
                Ok(Self::Pod(PodWrite {
                    operation,
                    namespace: request.namespace.clone().unwrap_or_default(),
                    pod,
                    old_pod,
                }))
            }
            TargetKind::PriorityClass => {
                let class = decode::<PriorityClass>(request.object.as_ref(), "PriorityClass")?;
                Ok(Self::PriorityClass(PriorityClassWrite { operation, class }))
            }
        }
    }
}

fn decode<K: DeserializeOwned>(object: Option<&DynamicObject>, kind: &str) -> Result<K, Error> {
    let object = object.ok_or_else(|| Error::unconvertible(kind))?;
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|_| Error::unconvertible(kind))
}

/// Priority admission: the mutating pass for pods and the validating pass
/// for PriorityClasses
pub struct PriorityAdmission {
    resolver: PriorityResolver,
    validator: PriorityClassValidator,
    features: FeatureGates,
}

impl PriorityAdmission {
    /// Create priority admission over `index` with fixed feature gates
    pub fn new(index: Arc<dyn PriorityClassIndex>, features: FeatureGates) -> Self {
        Self {
            resolver: PriorityResolver::new(index.clone(), features),
            validator: PriorityClassValidator::new(index),
            features,
        }
    }

    /// Whether the mutating pass looks at requests of this kind
    ///
    /// Only pods are mutated, and only while pod priority is enabled.
    pub fn mutates(&self, kind: TargetKind) -> bool {
        kind == TargetKind::Pod && self.features.pod_priority
    }

    /// Whether the validating pass looks at requests of this kind
    pub fn validates(&self, kind: TargetKind) -> bool {
        kind == TargetKind::PriorityClass
    }

    /// Mutating pass: resolve pod priority in place
    ///
    /// Does nothing unless the target is a pod and pod priority is enabled.
    pub fn admit(&self, target: &mut AdmissionTarget) -> Result<(), Error> {
        if !self.features.pod_priority {
            debug!(plugin = PLUGIN_NAME, "Pod priority disabled, skipping");
            return Ok(());
        }

        match target {
            AdmissionTarget::Pod(write) => self.resolver.resolve(
                write.operation,
                &write.namespace,
                &mut write.pod,
                write.old_pod.as_ref(),
            ),
            AdmissionTarget::PriorityClass(_) | AdmissionTarget::PassThrough => Ok(()),
        }
    }

    /// Validating pass: guard the single global default PriorityClass
    pub fn validate(&self, target: &AdmissionTarget) -> Result<(), Error> {
        match target {
            AdmissionTarget::PriorityClass(write) => {
                self.validator.validate(write.operation, &write.class)
            }
            AdmissionTarget::Pod(_) | AdmissionTarget::PassThrough => Ok(()),
        }
    }
}
