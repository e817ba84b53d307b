//! Priority admission for Kubernetes
//!
//! An admission webhook that resolves the numeric priority of pods from
//! their PriorityClass and keeps at most one PriorityClass marked as the
//! cluster's global default.
//!
//! # Architecture
//!
//! - Pod writes go through the mutating pass: the effective priority is
//!   resolved once at create time and carried forward on update.
//! - PriorityClass writes go through the validating pass: a second global
//!   default is refused.
//! - Both passes read PriorityClasses from a reflector-backed index that is
//!   kept in sync outside the request path.
//!
//! # Modules
//!
//! - [`admission`] - Typed dispatch of admission requests
//! - [`priority`] - Resolution, validation, namespace policy and the index
//! - [`webhook`] - AdmissionReview HTTP handlers and TLS server
//! - [`features`] - Feature gates
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod admission;
pub mod error;
pub mod features;
pub mod priority;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default address for the webhook HTTPS server
///
/// Port 8443 avoids requiring root privileges.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8443";
