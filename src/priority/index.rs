//! Read-only view over the cluster's PriorityClasses
//!
//! The index is populated by a kube-runtime reflector that is maintained
//! outside the admission path. Admission only ever reads point-in-time
//! snapshots from it and never writes back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tracing::{error, info, warn};

#[cfg(test)]
use mockall::automock;

/// Failure to read from the index
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No PriorityClass with the given name is visible
    #[error("priorityclass \"{0}\" not found")]
    NotFound(String),

    /// The backing store could not be read
    #[error("priorityclass index unavailable: {0}")]
    Unavailable(String),
}

/// Lookup and listing over the currently visible PriorityClasses
///
/// Implementations must be safe for concurrent reads while the backing
/// store is updated asynchronously.
#[cfg_attr(test, automock)]
pub trait PriorityClassIndex: Send + Sync {
    /// Get a PriorityClass by name
    fn get(&self, name: &str) -> Result<Arc<PriorityClass>, IndexError>;

    /// Snapshot of every PriorityClass currently visible
    fn list(&self) -> Result<Vec<Arc<PriorityClass>>, IndexError>;
}

/// Signals whether the index has completed its first full sync
///
/// Only the serving layer consults this; resolution and validation assume
/// they are never called before the index is ready.
pub trait ReadinessProbe: Send + Sync {
    /// True once the initial list of PriorityClasses has been observed
    fn has_synced(&self) -> bool;
}

/// Pick the effective default among classes marked `globalDefault`
///
/// A create race can leave more than one default visible. The class with
/// the lowest value wins; equal values fall back to name order.
pub fn default_priority_class(classes: &[Arc<PriorityClass>]) -> Option<Arc<PriorityClass>> {
    classes
        .iter()
        .filter(|pc| pc.global_default.unwrap_or(false))
        .min_by(|a, b| {
            a.value
                .cmp(&b.value)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        })
        .cloned()
}

/// PriorityClass index backed by a kube-runtime reflector store
#[derive(Clone)]
pub struct ReflectorIndex {
    store: Store<PriorityClass>,
    synced: Arc<AtomicBool>,
}

impl ReflectorIndex {
    /// Start watching PriorityClasses and return an index over the result
    ///
    /// The watch runs on a background task for the life of the process.
    pub fn watch(client: Client) -> Self {
        let api: Api<PriorityClass> = Api::all(client);
        let (store, writer) = reflector::store();

        let stream = watcher::watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(writer)
            .applied_objects();

        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(event) = stream.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "PriorityClass watch error");
                }
            }
            warn!("PriorityClass watch stream ended");
        });

        Self::new(store)
    }

    /// Wrap an existing store, tracking when it completes its first sync
    pub fn new(store: Store<PriorityClass>) -> Self {
        let synced = Arc::new(AtomicBool::new(false));

        let probe = store.clone();
        let flag = synced.clone();
        tokio::spawn(async move {
            match probe.wait_until_ready().await {
                Ok(()) => {
                    flag.store(true, Ordering::Release);
                    info!("PriorityClass index synced");
                }
                Err(e) => error!(error = ?e, "PriorityClass store writer dropped before sync"),
            }
        });

        Self { store, synced }
    }
}

impl PriorityClassIndex for ReflectorIndex {
    fn get(&self, name: &str) -> Result<Arc<PriorityClass>, IndexError> {
        self.store
            .get(&ObjectRef::new(name))
            .ok_or_else(|| IndexError::NotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<Arc<PriorityClass>>, IndexError> {
        Ok(self.store.state())
    }
}

impl ReadinessProbe for ReflectorIndex {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// Readiness probe pinned to a fixed answer
#[cfg(test)]
pub(crate) struct FixedReadiness(pub bool);

#[cfg(test)]
impl ReadinessProbe for FixedReadiness {
    fn has_synced(&self) -> bool {
        self.0
    }
}
