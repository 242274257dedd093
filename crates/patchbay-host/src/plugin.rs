//! Plugin lifecycle
//!
//! A plugin is a consumer of the registry: on start it locates the objects
//! it wants to modify and injects patches, on unload it removes them. The
//! [`PluginHost`] namespaces every patch id with the plugin id, so whatever
//! a plugin forgets to remove is still cleaned up when it unloads or fails
//! to start.

use crate::locator::{LocateError, ModuleFilter, ModuleLocator};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use patchbay_core::{InjectError, ObjectRef, Patch, PatchId, PatchRegistry};
use std::sync::Arc;

/// Plugin host errors
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("plugin '{0}' is not loaded")]
    NotLoaded(String),

    /// Ids are owner prefixes, so they must be non-empty and free of ':'
    #[error("invalid plugin id '{0}': must be non-empty and must not contain ':'")]
    InvalidId(String),

    /// `start` returned an error; its patches have been removed
    #[error("plugin '{plugin}' failed to start: {source}")]
    StartFailed {
        plugin: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A unit of behavior built from patches
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier, also the owner prefix of the plugin's patch ids
    fn id(&self) -> &str;

    async fn start(&self, ctx: &PluginContext) -> anyhow::Result<()>;

    /// Teardown hook; patches still installed afterwards are removed anyway
    async fn unload(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// What a plugin sees of its host
#[derive(Clone)]
pub struct PluginContext {
    plugin_id: String,
    registry: PatchRegistry,
    locator: Arc<dyn ModuleLocator>,
}

impl PluginContext {
    #[inline]
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn locator(&self) -> &dyn ModuleLocator {
        self.locator.as_ref()
    }

    /// Owner prefix shared by all of this plugin's patch ids
    #[must_use]
    pub fn owner_prefix(&self) -> String {
        format!("{}:", self.plugin_id)
    }

    /// Registry id for a plugin-local patch name
    #[must_use]
    pub fn patch_id(&self, local_id: &str) -> PatchId {
        PatchId::from(format!("{}:{local_id}", self.plugin_id))
    }

    pub fn inject(
        &self,
        local_id: &str,
        target: &ObjectRef,
        method: &str,
        patch: Patch,
    ) -> Result<(), InjectError> {
        self.registry
            .inject(self.patch_id(local_id), target, method, patch)
    }

    pub fn uninject(&self, local_id: &str) -> bool {
        self.registry.uninject(self.patch_id(local_id).as_str())
    }

    /// Wait for a module with the locator's default timeout
    pub async fn wait_for(&self, filter: &ModuleFilter) -> Result<ObjectRef, LocateError> {
        self.locator
            .wait_for(filter, self.locator.default_timeout())
            .await
    }
}

/// Loads and unloads plugins against one registry
pub struct PluginHost {
    registry: PatchRegistry,
    locator: Arc<dyn ModuleLocator>,
    plugins: Mutex<IndexMap<String, Arc<dyn Plugin>>>,
}

impl PluginHost {
    #[must_use]
    pub fn new(registry: PatchRegistry, locator: Arc<dyn ModuleLocator>) -> Self {
        Self {
            registry,
            locator,
            plugins: Mutex::new(IndexMap::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    fn context(&self, plugin_id: &str) -> PluginContext {
        PluginContext {
            plugin_id: plugin_id.to_string(),
            registry: self.registry.clone(),
            locator: Arc::clone(&self.locator),
        }
    }

    /// Start a plugin
    ///
    /// If `start` fails, every patch it installed is removed before the
    /// error is returned.
    pub async fn load(&self, plugin: Arc<dyn Plugin>) -> Result<(), HostError> {
        let plugin_id = plugin.id().to_string();
        if plugin_id.is_empty() || plugin_id.contains(':') {
            return Err(HostError::InvalidId(plugin_id));
        }
        let already_loaded = self.plugins.lock().contains_key(&plugin_id);
        if already_loaded {
            return Err(HostError::AlreadyLoaded(plugin_id));
        }

        let ctx = self.context(&plugin_id);
        if let Err(source) = plugin.start(&ctx).await {
            let removed = self.registry.uninject_prefix(&ctx.owner_prefix());
            tracing::error!(plugin = %plugin_id, removed, "failed to start plugin: {source:#}");
            return Err(HostError::StartFailed {
                plugin: plugin_id,
                source: source.into(),
            });
        }

        self.plugins.lock().insert(plugin_id.clone(), plugin);
        tracing::info!(plugin = %plugin_id, "plugin loaded");
        Ok(())
    }

    /// Stop a plugin and remove every patch it still owns
    ///
    /// Returns the number of leftover patches removed on its behalf. A
    /// failing teardown hook is logged, never propagated.
    pub async fn unload(&self, plugin_id: &str) -> Result<usize, HostError> {
        let plugin = self
            .plugins
            .lock()
            .shift_remove(plugin_id)
            .ok_or_else(|| HostError::NotLoaded(plugin_id.to_string()))?;

        let ctx = self.context(plugin_id);
        if let Err(error) = plugin.unload(&ctx).await {
            tracing::warn!(plugin = %plugin_id, "plugin teardown failed: {error:#}");
        }

        let leftover = self.registry.uninject_prefix(&ctx.owner_prefix());
        if leftover > 0 {
            tracing::debug!(plugin = %plugin_id, leftover, "removed patches left behind by plugin");
        }
        tracing::info!(plugin = %plugin_id, "plugin unloaded");
        Ok(leftover)
    }

    /// Unload everything, most recently loaded first
    pub async fn unload_all(&self) {
        let ids: Vec<String> = self.plugins.lock().keys().rev().cloned().collect();
        for plugin_id in ids {
            // NotLoaded only if another caller raced us to it
            let _ = self.unload(&plugin_id).await;
        }
    }

    #[must_use]
    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.plugins.lock().contains_key(plugin_id)
    }

    /// Loaded plugin ids in load order
    #[must_use]
    pub fn loaded(&self) -> Vec<String> {
        self.plugins.lock().keys().cloned().collect()
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.loaded())
            .field("registry", &self.registry)
            .finish()
    }
}
