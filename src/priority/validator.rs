//! Global default PriorityClass enforcement
//!
//! At most one PriorityClass may carry `globalDefault: true`. The check runs
//! against the eventually consistent index, so two concurrent creates can
//! both pass; the resolver's lowest-value tie-break covers that window.

use std::sync::Arc;

use k8s_openapi::api::scheduling::v1::PriorityClass;
use tracing::debug;

use super::index::PriorityClassIndex;
use crate::admission::WriteOperation;
use crate::Error;

/// Rejects writes that would introduce a second global default
pub struct PriorityClassValidator {
    index: Arc<dyn PriorityClassIndex>,
}

impl PriorityClassValidator {
    /// Create a validator reading existing classes from `index`
    pub fn new(index: Arc<dyn PriorityClassIndex>) -> Self {
        Self { index }
    }

    /// Validate a create or update of `class`
    ///
    /// Classes that are not marked as default are always accepted.
    pub fn validate(&self, operation: WriteOperation, class: &PriorityClass) -> Result<(), Error> {
        if !class.global_default.unwrap_or(false) {
            return Ok(());
        }

        let classes = self
            .index
            .list()
            .map_err(|e| Error::transient(format!("failed to get default priority class: {}", e)))?;

        let existing = classes.iter().find(|pc| {
            pc.global_default.unwrap_or(false)
                && (operation == WriteOperation::Create || pc.metadata.name != class.metadata.name)
        });

        if let Some(existing) = existing {
            return Err(Error::forbidden(format!(
                "PriorityClass {} is already marked as default. Only one default can exist",
                existing.metadata.name.as_deref().unwrap_or_default()
            )));
        }

        debug!(
            priority_class = ?class.metadata.name,
            "No other default PriorityClass, accepting"
        );
        Ok(())
    }
}
