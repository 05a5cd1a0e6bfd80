//! Registered sources and their per-resource fetch contexts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rangefetch::{BlobStore, FetchContext, FetchError, ResourceClient, ResourceDescriptor};
use tracing::{debug, info};

use super::manifest::{self, QualityVariant};

/// One playable source: an immutable quality set plus lazily created
/// fetch contexts for its resources.
pub struct HlsSource {
    id: String,
    variants: BTreeMap<u32, QualityVariant>,
    client: Arc<dyn ResourceClient>,
    store: Arc<dyn BlobStore>,
    contexts: Mutex<HashMap<u64, Arc<FetchContext>>>,
    warmed_playlists: Mutex<HashSet<u32>>,
}

impl HlsSource {
    pub fn new(
        id: impl Into<String>,
        variants: Vec<QualityVariant>,
        client: Arc<dyn ResourceClient>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        let variants: BTreeMap<u32, QualityVariant> = variants
            .into_iter()
            .map(|variant| (variant.quality, variant))
            .collect();
        Self {
            id: id.into(),
            variants,
            client,
            store,
            contexts: Mutex::new(HashMap::new()),
            warmed_playlists: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn master_playlist(&self) -> String {
        manifest::master_playlist(&self.variants)
    }

    /// The stored per-quality playlist with media references rewritten
    /// to local partial-file paths. `None` for an unknown quality.
    pub async fn quality_playlist(&self, quality: u32) -> Result<Option<String>, FetchError> {
        let Some(variant) = self.variants.get(&quality) else {
            return Ok(None);
        };

        let context = self.context_for(&variant.playlist)?;

        // One cache-warm pass per quality; later requests are served
        // from coverage.
        if self.warmed_playlists.lock().insert(quality) {
            debug!(source = %self.id, quality, "warming quality playlist");
            context.prefetch(0..variant.playlist.size);
        }

        context.read(0..variant.playlist.size).wait_complete().await?;
        let bytes = context
            .cached_bytes(0..variant.playlist.size)?
            .ok_or_else(|| FetchError::store("playlist bytes missing after fetch"))?;

        let text = String::from_utf8_lossy(&bytes);
        Ok(Some(manifest::rewrite_media_references(&text)))
    }

    /// Fetch context for the quality variant whose media resource id
    /// matches `file_id`; `None` when no variant matches.
    pub fn file_context(&self, file_id: u64) -> Result<Option<Arc<FetchContext>>, FetchError> {
        let Some(variant) = self
            .variants
            .values()
            .find(|variant| variant.media.id == file_id)
        else {
            return Ok(None);
        };
        self.context_for(&variant.media).map(Some)
    }

    fn context_for(&self, resource: &ResourceDescriptor) -> Result<Arc<FetchContext>, FetchError> {
        let mut contexts = self.contexts.lock();
        if let Some(context) = contexts.get(&resource.id) {
            return Ok(context.clone());
        }

        let context = Arc::new(FetchContext::new(
            resource.clone(),
            self.client.clone(),
            self.store.clone(),
        )?);
        contexts.insert(resource.id, context.clone());
        Ok(context)
    }
}

/// Shared registry of live sources, keyed by source id.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Arc<RwLock<HashMap<String, Arc<HlsSource>>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: HlsSource) -> Arc<HlsSource> {
        let source = Arc::new(source);
        info!(source = %source.id(), "registering source");
        self.sources
            .write()
            .insert(source.id().to_string(), source.clone());
        source
    }

    /// Unregister a source; dropping the last reference tears down its
    /// fetch contexts and cancels in-flight work.
    pub fn unregister(&self, id: &str) -> Option<Arc<HlsSource>> {
        let removed = self.sources.write().remove(id);
        if removed.is_some() {
            info!(source = %id, "unregistered source");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<HlsSource>> {
        self.sources.read().get(id).cloned()
    }
}
