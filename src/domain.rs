use std::path::PathBuf;

use serde::Deserialize;

/// File names produced by desktop environments that never hold a manifest.
pub const IGNORED_FILE_NAMES: &[&str] = &[".DS_Store", "Thumbs.db"];

pub const MODEL_MEDIA_TYPE_SUFFIX: &str = "model";

const DIGEST_PREFIX: &str = "sha256:";
const BLOB_DIGEST_PREFIX: &str = "sha256-";

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub config: ManifestConfig,
    pub layers: Vec<Layer>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub digest: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Layer {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
}

impl Manifest {
    /// First layer, in document order, whose media type ends in `model`.
    pub fn model_layer(&self) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|layer| layer.media_type.ends_with(MODEL_MEDIA_TYPE_SUFFIX))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub file_type: String,
    pub model_format: String,
    pub model_type: String,
}

/// Everything the link installer needs to know about one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedManifest {
    pub manifest_path: PathBuf,
    pub model_blob: PathBuf,
    pub model_name: String,
    pub model_type: String,
    pub model_format: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Symlink,
    Copy,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Symlink => "symlink",
            LinkKind::Copy => "copy",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub manifests_found: u64,
    pub manifests_resolved: u64,
    pub manifests_failed: u64,
    pub links_created: u64,
    pub copies_created: u64,
    pub destination_failures: u64,
}

/// Maps a manifest digest (`sha256:<hex>`) to the blob file name
/// (`sha256-<hex>`). Digests already in blob form are returned unchanged.
pub fn normalize_digest(digest: &str) -> String {
    match digest.strip_prefix(DIGEST_PREFIX) {
        Some(hex) => format!("{BLOB_DIGEST_PREFIX}{hex}"),
        None => digest.to_string(),
    }
}

pub fn is_ignored_file(name: &str) -> bool {
    IGNORED_FILE_NAMES
        .iter()
        .any(|ignored| name.contains(ignored))
}

pub fn link_file_name(model_name: &str, config: &ModelConfig) -> String {
    format!(
        "{}-{}-{}.{}",
        model_name, config.model_type, config.file_type, config.model_format
    )
}
