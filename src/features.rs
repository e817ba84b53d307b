//! Feature gates
//!
//! Gates are parsed once at startup from the Kubernetes `Name=bool,...`
//! syntax and handed to the admission core as an immutable value.

use std::str::FromStr;

use crate::Error;

/// Gate name for the whole pod priority resolution mechanism
pub const POD_PRIORITY: &str = "PodPriority";

/// Gate name for inferring a priority class from the critical-pod annotation
pub const EXPERIMENTAL_CRITICAL_POD_ANNOTATION: &str = "ExperimentalCriticalPodAnnotation";

/// Feature gates consumed by priority admission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureGates {
    /// Resolve and stamp pod priority on create/update
    pub pod_priority: bool,
    /// Treat annotated critical pods in the system namespace as
    /// `system-cluster-critical` when they name no class
    pub critical_pod_annotation: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            pod_priority: true,
            critical_pod_annotation: false,
        }
    }
}

impl FromStr for FeatureGates {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut gates = Self::default();

        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| Error::config(format!("missing bool value for {}", entry)))?;
            let value: bool = value.trim().parse().map_err(|_| {
                Error::config(format!("invalid value of {}: {}", name.trim(), value.trim()))
            })?;

            match name.trim() {
                POD_PRIORITY => gates.pod_priority = value,
                EXPERIMENTAL_CRITICAL_POD_ANNOTATION => gates.critical_pod_annotation = value,
                other => return Err(Error::config(format!("unrecognized feature gate: {}", other))),
            }
        }

        Ok(gates)
    }
}
