use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::domain::{
    LinkKind, Manifest, ModelConfig, ResolvedManifest, SyncStats, link_file_name,
    normalize_digest,
};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("unable to determine user home directory")]
    NoHomeDir,
    #[error("failed to read config file {path}: {source}")]
    ConfigRead { path: PathBuf, source: io::Error },
    #[error("failed to write default config file {path}: {source}")]
    ConfigWrite { path: PathBuf, source: io::Error },
    #[error("failed to decode config file {path}: {source}")]
    ConfigDecode {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("failed to encode default config for {path}: {source}")]
    ConfigEncode {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("failed to resolve {path} to an absolute path: {source}")]
    Absolutize { path: PathBuf, source: io::Error },
    #[error("failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },
    #[error("failed to read manifest file {path}: {source}")]
    ReadManifest { path: PathBuf, source: io::Error },
    #[error("failed to decode manifest JSON {path}: {source}")]
    DecodeManifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no model layer found in manifest {path}")]
    NoModelLayer { path: PathBuf },
    #[error("manifest {path} has no parent directory to name the model after")]
    UnnamedModel { path: PathBuf },
    #[error("failed to read model config file {path}: {source}")]
    ReadModelConfig { path: PathBuf, source: io::Error },
    #[error("failed to decode model config JSON {path}: {source}")]
    DecodeModelConfig {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to create symbolic link from {blob} to {target}: {source}")]
    Link {
        blob: PathBuf,
        target: PathBuf,
        source: io::Error,
    },
    #[error("failed to copy {blob} to {target} as fallback: {source}")]
    Copy {
        blob: PathBuf,
        target: PathBuf,
        source: io::Error,
    },
    #[error("{target} does not exist after creation")]
    Verify { target: PathBuf },
}

pub trait FilePorts {
    /// Calls `on_file` for every non-directory entry below `root`.
    fn for_each_file(
        &self,
        root: &Path,
        on_file: &mut dyn FnMut(PathBuf) -> Result<(), SyncError>,
    ) -> Result<(), SyncError>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Does not follow symlinks, so dangling links count as existing.
    fn entry_exists(&self, path: &Path) -> bool;
    fn read_link(&self, path: &Path) -> Option<PathBuf>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

pub trait LinkStrategy {
    fn kind(&self) -> LinkKind;
    fn create(&self, blob: &Path, target: &Path) -> io::Result<()>;
}

pub trait ProgressReporter {
    fn on_start(&self, config: &Config);
    fn on_manifest_found(&self, manifest_path: &Path);
    fn on_manifest_resolved(&self, resolved: &ResolvedManifest);
    fn on_manifest_failed(&self, manifest_path: &Path, err: &SyncError);
    fn on_existing_removed(&self, target: &Path);
    fn on_remove_failed(&self, target: &Path, err: &io::Error);
    /// The target being replaced pointed at a different blob.
    fn on_replacing_foreign(&self, target: &Path, previous: &Path);
    fn on_link_fallback(&self, target: &Path, err: &io::Error);
    fn on_installed(&self, target: &Path, blob: &Path, kind: LinkKind);
    fn on_destination_failed(&self, destination: &Path, err: &SyncError);
    fn on_no_manifests(&self, manifest_dir: &Path);
    fn on_update(&self, stats: &SyncStats);
    fn on_finish(&self, stats: &SyncStats);
}

pub fn find_manifest_files(
    ports: &dyn FilePorts,
    manifest_dir: &Path,
) -> Result<Vec<PathBuf>, SyncError> {
    let mut files = Vec::new();
    ports.for_each_file(manifest_dir, &mut |path| {
        files.push(path);
        Ok::<(), SyncError>(())
    })?;

    Ok(files)
}

pub fn resolve_manifest(
    ports: &dyn FilePorts,
    manifest_path: &Path,
    blob_dir: &Path,
) -> Result<ResolvedManifest, SyncError> {
    let data = ports
        .read(manifest_path)
        .map_err(|source| SyncError::ReadManifest {
            path: manifest_path.to_path_buf(),
            source,
        })?;
    let manifest: Manifest =
        serde_json::from_slice(&data).map_err(|source| SyncError::DecodeManifest {
            path: manifest_path.to_path_buf(),
            source,
        })?;

    let model_config_path = blob_dir.join(normalize_digest(&manifest.config.digest));

    let model_layer = manifest
        .model_layer()
        .ok_or_else(|| SyncError::NoModelLayer {
            path: manifest_path.to_path_buf(),
        })?;
    let model_blob = blob_dir.join(normalize_digest(&model_layer.digest));

    let config_data =
        ports
            .read(&model_config_path)
            .map_err(|source| SyncError::ReadModelConfig {
                path: model_config_path.clone(),
                source,
            })?;
    let model_config: ModelConfig =
        serde_json::from_slice(&config_data).map_err(|source| SyncError::DecodeModelConfig {
            path: model_config_path.clone(),
            source,
        })?;

    let model_name = manifest_path
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::UnnamedModel {
            path: manifest_path.to_path_buf(),
        })?;
    let file_name = link_file_name(&model_name, &model_config);

    Ok(ResolvedManifest {
        manifest_path: manifest_path.to_path_buf(),
        model_blob,
        model_name,
        model_type: model_config.model_type,
        model_format: model_config.model_format,
        file_name,
    })
}

/// Creates `primary` links, trying `fallback` when the primary attempt fails.
pub struct LinkInstaller {
    primary: Box<dyn LinkStrategy>,
    fallback: Option<Box<dyn LinkStrategy>>,
}

impl LinkInstaller {
    pub fn new(primary: Box<dyn LinkStrategy>, fallback: Option<Box<dyn LinkStrategy>>) -> Self {
        Self { primary, fallback }
    }

    pub fn target_path(destination: &Path, resolved: &ResolvedManifest) -> PathBuf {
        destination
            .join(&resolved.model_name)
            .join(&resolved.file_name)
    }

    pub fn install(
        &self,
        ports: &dyn FilePorts,
        progress: &dyn ProgressReporter,
        destination: &Path,
        resolved: &ResolvedManifest,
    ) -> Result<LinkKind, SyncError> {
        ensure_dir(ports, destination)?;
        let model_dir = destination.join(&resolved.model_name);
        ensure_dir(ports, &model_dir)?;

        let target = Self::target_path(destination, resolved);
        let blob = &resolved.model_blob;

        if ports.entry_exists(&target) {
            if let Some(previous) = ports.read_link(&target) {
                if previous != *blob {
                    progress.on_replacing_foreign(&target, &previous);
                }
            }
            // Not fatal: a leftover entry makes the create below fail instead.
            match ports.remove_file(&target) {
                Ok(()) => progress.on_existing_removed(&target),
                Err(err) => progress.on_remove_failed(&target, &err),
            }
        }

        let kind = match self.primary.create(blob, &target) {
            Ok(()) => self.primary.kind(),
            Err(link_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(SyncError::Link {
                        blob: blob.clone(),
                        target,
                        source: link_err,
                    });
                };
                progress.on_link_fallback(&target, &link_err);
                fallback
                    .create(blob, &target)
                    .map_err(|source| SyncError::Copy {
                        blob: blob.clone(),
                        target: target.clone(),
                        source,
                    })?;
                fallback.kind()
            }
        };

        if !ports.entry_exists(&target) {
            return Err(SyncError::Verify { target });
        }

        progress.on_installed(&target, blob, kind);
        Ok(kind)
    }
}

fn ensure_dir(ports: &dyn FilePorts, path: &Path) -> Result<(), SyncError> {
    ports
        .create_dir_all(path)
        .map_err(|source| SyncError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Links every model found under `config.manifest_dir` into each destination.
///
/// Only a failed walk aborts the run. Per-manifest and per-destination
/// failures are reported and counted in the returned stats.
pub fn sync_models(
    ports: &dyn FilePorts,
    installer: &LinkInstaller,
    progress: &dyn ProgressReporter,
    config: &Config,
) -> Result<SyncStats, SyncError> {
    let mut stats = SyncStats::default();
    let config = &config.absolutized()?;

    progress.on_start(config);

    let manifest_files = find_manifest_files(ports, &config.manifest_dir)?;
    if manifest_files.is_empty() {
        progress.on_no_manifests(&config.manifest_dir);
        progress.on_finish(&stats);
        return Ok(stats);
    }
    stats.manifests_found = manifest_files.len() as u64;

    for manifest_path in manifest_files {
        progress.on_manifest_found(&manifest_path);

        let resolved = match resolve_manifest(ports, &manifest_path, &config.blob_dir) {
            Ok(resolved) => resolved,
            Err(err) => {
                stats.manifests_failed += 1;
                progress.on_manifest_failed(&manifest_path, &err);
                progress.on_update(&stats);
                continue;
            }
        };
        stats.manifests_resolved += 1;
        progress.on_manifest_resolved(&resolved);

        for destination in &config.destinations {
            match installer.install(ports, progress, destination, &resolved) {
                Ok(LinkKind::Symlink) => stats.links_created += 1,
                Ok(LinkKind::Copy) => stats.copies_created += 1,
                Err(err) => {
                    stats.destination_failures += 1;
                    progress.on_destination_failed(destination, &err);
                }
            }
        }

        progress.on_update(&stats);
    }

    progress.on_finish(&stats);

    Ok(stats)
}
