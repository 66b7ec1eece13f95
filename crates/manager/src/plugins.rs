//! Plugin registry: maps plugin types to source/destination factories.
//!
//! Registration is process-wide and happens once at startup; lookups occur
//! on every orchestration. Factories build per-run instances bound to a
//! task's config.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use foerderband_core::{Destination, PipelineError, PluginConfig, Source, Transformer};

/// Builds a per-run source bound to the given config.
pub type SourceFactory =
    Arc<dyn Fn(&PluginConfig) -> Result<Box<dyn Source>, PipelineError> + Send + Sync>;

/// Builds a per-run destination bound to the given config.
pub type DestinationFactory =
    Arc<dyn Fn(&PluginConfig) -> Result<Box<dyn Destination>, PipelineError> + Send + Sync>;

#[derive(Default)]
pub struct PluginRegistry {
    sources: RwLock<HashMap<String, (SourceFactory, Arc<dyn Transformer>)>>,
    destinations: RwLock<HashMap<String, DestinationFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(
        &self,
        plugin_type: impl Into<String>,
        factory: SourceFactory,
        default_transformer: Arc<dyn Transformer>,
    ) {
        self.sources
            .write()
            .unwrap()
            .insert(plugin_type.into(), (factory, default_transformer));
    }

    pub fn register_destination(&self, plugin_type: impl Into<String>, factory: DestinationFactory) {
        self.destinations
            .write()
            .unwrap()
            .insert(plugin_type.into(), factory);
    }

    pub fn lookup_source(&self, plugin_type: &str) -> Option<(SourceFactory, Arc<dyn Transformer>)> {
        self.sources.read().unwrap().get(plugin_type).cloned()
    }

    pub fn lookup_destination(&self, plugin_type: &str) -> Option<DestinationFactory> {
        self.destinations.read().unwrap().get(plugin_type).cloned()
    }

    pub fn has_source(&self, plugin_type: &str) -> bool {
        self.sources.read().unwrap().contains_key(plugin_type)
    }

    /// Registered source plugin types, for startup logs and health output.
    pub fn source_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.sources.read().unwrap().keys().cloned().collect();
        types.sort();
        types
    }
}

// ── Tests ────────────────────────────────────────────────────────────
