pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use crate::application::{
    FilePorts, LinkInstaller, LinkStrategy, ProgressReporter, SyncError, find_manifest_files,
    resolve_manifest, sync_models,
};
pub use crate::config::{Config, Overrides};
pub use crate::domain::{
    IGNORED_FILE_NAMES, LinkKind, Manifest, ModelConfig, ResolvedManifest, SyncStats,
    normalize_digest,
};
pub use crate::infrastructure::{
    CopyStrategy, FsPorts, IndicatifProgressReporter, LineProgressReporter, NoProgressReporter,
    SymlinkStrategy, TracingReporter, platform_link_installer,
};
