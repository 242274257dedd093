//! Module locator
//!
//! Resolves a [`ModuleFilter`] to a live object inside a lazily populated
//! module graph. Modules may show up long after a caller starts looking, so
//! [`ModuleLocator::wait_for`] resolves once a match is registered, or fails
//! after a bounded wait. Callers should treat a miss as recoverable.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use patchbay_core::{Object, ObjectRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Predicate selecting a module
#[derive(Clone)]
pub enum ModuleFilter {
    /// Every listed slot exists (own or inherited)
    ByProps(Vec<String>),
    /// The object's display name equals this
    ByDisplayName(String),
    /// Arbitrary predicate
    Custom(Arc<dyn Fn(&Object) -> bool + Send + Sync>),
}

impl ModuleFilter {
    pub fn props<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ByProps(names.into_iter().map(Into::into).collect())
    }

    pub fn display_name(name: impl Into<String>) -> Self {
        Self::ByDisplayName(name.into())
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Object) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    #[must_use]
    pub fn matches(&self, module: &Object) -> bool {
        match self {
            Self::ByProps(names) => !names.is_empty() && names.iter().all(|n| module.has(n)),
            Self::ByDisplayName(name) => module.name() == name.as_str(),
            Self::Custom(predicate) => predicate(module),
        }
    }
}

impl fmt::Debug for ModuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByProps(names) => write!(f, "props{names:?}"),
            Self::ByDisplayName(name) => write!(f, "displayName({name})"),
            Self::Custom(_) => f.write_str("custom"),
        }
    }
}

/// Locator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocateError {
    /// Nothing matched within the allowed wait
    #[error("no module matching {filter} after {waited:?}")]
    Timeout { filter: String, waited: Duration },
}

/// Lookup over the host's module graph
#[async_trait]
pub trait ModuleLocator: Send + Sync {
    /// First module matching `filter` right now
    fn find(&self, filter: &ModuleFilter) -> Option<ObjectRef>;

    /// Resolve once a module matching `filter` is loaded
    async fn wait_for(
        &self,
        filter: &ModuleFilter,
        timeout: Duration,
    ) -> Result<ObjectRef, LocateError>;

    /// Wait used when the caller has no stronger opinion
    fn default_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Locator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Default bounded wait in milliseconds
    pub default_timeout_ms: u64,
}

impl LocatorConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
        }
    }
}

/// In-memory module graph, populated as modules load
#[derive(Debug, Default)]
pub struct ModuleGraph {
    config: LocatorConfig,
    modules: RwLock<IndexMap<String, ObjectRef>>,
    loaded: Notify,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: LocatorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Add (or replace) a module and wake pending waiters
    pub fn register(&self, module_id: impl Into<String>, module: ObjectRef) {
        let module_id = module_id.into();
        tracing::debug!(module = %module_id, name = module.name(), "module registered");
        self.modules.write().insert(module_id, module);
        self.loaded.notify_waiters();
    }

    pub fn unregister(&self, module_id: &str) -> Option<ObjectRef> {
        self.modules.write().shift_remove(module_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

#[async_trait]
impl ModuleLocator for ModuleGraph {
    fn find(&self, filter: &ModuleFilter) -> Option<ObjectRef> {
        self.modules
            .read()
            .values()
            .find(|module| filter.matches(module))
            .cloned()
    }

    async fn wait_for(
        &self,
        filter: &ModuleFilter,
        timeout: Duration,
    ) -> Result<ObjectRef, LocateError> {
        let search = async {
            loop {
                // register interest before checking, so a module loaded in
                // between cannot be missed
                let notified = self.loaded.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(module) = self.find(filter) {
                    return module;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, search).await.map_err(|_| {
            tracing::warn!(filter = ?filter, waited = ?timeout, "module not found");
            LocateError::Timeout {
                filter: format!("{filter:?}"),
                waited: timeout,
            }
        })
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.config.default_timeout_ms)
    }
}
