//! Server configuration and the sources manifest.

use std::net::SocketAddr;
use std::path::PathBuf;

use rangefetch::ResourceDescriptor;
use serde::Deserialize;

use crate::hls::QualityVariant;

/// Configurable options for the local content server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the local HTTP surface.
    pub listen: SocketAddr,

    /// Cache directory for fetched resource data. A temporary directory
    /// is used when unset.
    pub cache_dir: Option<PathBuf>,

    /// Directory of static runtime assets (player HTML/JS) served for
    /// unknown sub-paths.
    pub assets_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8016)),
            cache_dir: None,
            assets_dir: None,
        }
    }
}

/// JSON manifest describing the sources to register at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesManifest {
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    pub qualities: Vec<QualityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityEntry {
    pub quality: u32,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Media duration in seconds; zero or absent means unknown.
    #[serde(default)]
    pub duration: f64,
    pub playlist: ResourceEntry,
    pub media: ResourceEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub id: u64,
    pub size: u64,
    pub url: String,
}

impl ResourceEntry {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            id: self.id,
            size: self.size,
            location: self.url.clone(),
        }
    }
}

impl QualityEntry {
    pub fn variant(&self) -> QualityVariant {
        QualityVariant {
            quality: self.quality,
            width: self.width,
            height: self.height,
            duration: self.duration,
            playlist: self.playlist.descriptor(),
            media: self.media.descriptor(),
        }
    }
}
