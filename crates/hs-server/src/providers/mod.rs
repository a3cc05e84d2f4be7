//! Resource providers: named sources of playable items.
//!
//! The streaming routes dispatch on the `{provider}` path segment and ask
//! the matching [`ResourceProvider`] to describe the requested id.

mod library;

pub use library::LibraryProvider;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hs_core::SourceDescriptor;

/// Describes playable items by id.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// `Ok(None)` means the id is unknown; `Err` means the item exists but
    /// could not be introspected.
    async fn describe(&self, id: &str) -> hs_core::Result<Option<SourceDescriptor>>;

    /// Local image file behind a `cover` reference this provider handed out.
    async fn cover(&self, _cover: &str) -> hs_core::Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Providers by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ResourceProvider>) {
        let name = name.into();
        if self.providers.insert(name.clone(), provider).is_some() {
            tracing::warn!(provider = %name, "Provider registered twice; keeping the last one");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ResourceProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
