use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hs_av::ToolRegistry;
use hs_core::{Error, MediaSource, MediaType, SourceDescriptor};

use super::ResourceProvider;

/// Image names picked up as album art next to an audio file.
const COVER_NAMES: &[&str] = &["cover.jpg", "cover.png", "folder.jpg", "folder.png"];

/// Serves files below a directory; ids are paths relative to it.
pub struct LibraryProvider {
    root: PathBuf,
    media_type: MediaType,
    tools: Arc<ToolRegistry>,
}

impl LibraryProvider {
    pub fn new(root: impl Into<PathBuf>, media_type: MediaType, tools: Arc<ToolRegistry>) -> Self {
        Self {
            root: root.into(),
            media_type,
            tools,
        }
    }

    /// Resolve `id` below the root. `None` for anything that escapes it.
    async fn resolve(&self, id: &str) -> Option<PathBuf> {
        let rel = Path::new(id);
        if id.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            tracing::warn!(id = %id, root = %self.root.display(), "Rejected library id");
            return None;
        }

        let root = tokio::fs::canonicalize(&self.root).await.ok()?;
        let path = tokio::fs::canonicalize(root.join(rel)).await.ok()?;
        // Symlinks may still point outside.
        if !path.starts_with(&root) {
            tracing::warn!(id = %id, root = %root.display(), "Library id resolves outside the root");
            return None;
        }

        let meta = tokio::fs::metadata(&path).await.ok()?;
        meta.is_file().then_some(path)
    }

    async fn find_cover(&self, id: &str, path: &Path) -> Option<String> {
        let dir = path.parent()?;
        for name in COVER_NAMES {
            if tokio::fs::try_exists(dir.join(name)).await.unwrap_or(false) {
                let rel_dir = Path::new(id).parent().unwrap_or(Path::new(""));
                return Some(rel_dir.join(name).to_string_lossy().to_string());
            }
        }
        None
    }
}

#[async_trait]
impl ResourceProvider for LibraryProvider {
    async fn describe(&self, id: &str) -> hs_core::Result<Option<SourceDescriptor>> {
        let Some(path) = self.resolve(id).await else {
            return Ok(None);
        };

        let probe = hs_av::probe::probe_file(&self.tools, &path).await?;
        let mut desc = probe.into_descriptor(self.media_type, MediaSource::Path(path.clone()));

        if !desc.has_primary_stream() {
            return Err(Error::Probe(format!(
                "{} has no {} stream",
                path.display(),
                self.media_type
            )));
        }

        if desc.title.is_none() {
            desc.title = path.file_stem().map(|s| s.to_string_lossy().to_string());
        }
        if self.media_type == MediaType::Audio {
            desc.cover = self.find_cover(id, &path).await;
        }

        Ok(Some(desc))
    }

    async fn cover(&self, cover: &str) -> hs_core::Result<Option<PathBuf>> {
        let is_cover_name = Path::new(cover)
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| COVER_NAMES.contains(&n));
        if !is_cover_name {
            return Ok(None);
        }
        Ok(self.resolve(cover).await)
    }
}
