use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use walkdir::WalkDir;

use crate::application::{FilePorts, LinkInstaller, LinkStrategy, ProgressReporter, SyncError};
use crate::config::Config;
use crate::domain::{LinkKind, ResolvedManifest, SyncStats, is_ignored_file};

pub struct FsPorts;

impl FsPorts {
    pub fn new() -> Self {
        Self
    }
}

impl FilePorts for FsPorts {
    fn for_each_file(
        &self,
        root: &Path,
        on_file: &mut dyn FnMut(PathBuf) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|source| SyncError::Walk {
                root: root.to_path_buf(),
                source,
            })?;

            if entry.file_type().is_dir() {
                continue;
            }
            if is_ignored_file(&entry.file_name().to_string_lossy()) {
                continue;
            }

            on_file(entry.into_path())?;
        }

        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn entry_exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn read_link(&self, path: &Path) -> Option<PathBuf> {
        fs::read_link(path).ok()
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

pub struct SymlinkStrategy;

impl LinkStrategy for SymlinkStrategy {
    fn kind(&self) -> LinkKind {
        LinkKind::Symlink
    }

    #[cfg(unix)]
    fn create(&self, blob: &Path, target: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(blob, target)
    }

    #[cfg(windows)]
    fn create(&self, blob: &Path, target: &Path) -> io::Result<()> {
        std::os::windows::fs::symlink_file(blob, target)
    }

    #[cfg(not(any(unix, windows)))]
    fn create(&self, _blob: &Path, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symbolic links are not supported on this platform",
        ))
    }
}

pub struct CopyStrategy;

impl LinkStrategy for CopyStrategy {
    fn kind(&self) -> LinkKind {
        LinkKind::Copy
    }

    fn create(&self, blob: &Path, target: &Path) -> io::Result<()> {
        if !fs::metadata(blob)?.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", blob.display()),
            ));
        }

        // A surviving entry may be a link back to the blob; never open it
        // for writing.
        let mut source = fs::File::open(blob)?;
        let mut destination = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)?;
        io::copy(&mut source, &mut destination)?;
        destination.flush()
    }
}

/// Symlinks everywhere. Windows needs elevated rights or developer mode for
/// symlinks, so there a failed link falls back to a full copy.
pub fn platform_link_installer() -> LinkInstaller {
    let fallback: Option<Box<dyn LinkStrategy>> = if cfg!(windows) {
        Some(Box::new(CopyStrategy))
    } else {
        None
    };

    LinkInstaller::new(Box::new(SymlinkStrategy), fallback)
}

/// Structured log output through `tracing`.
pub struct TracingReporter;

impl TracingReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for TracingReporter {
    fn on_start(&self, config: &Config) {
        tracing::info!(
            manifest_dir = %config.manifest_dir.display(),
            blob_dir = %config.blob_dir.display(),
            destinations = ?config.destinations,
            "application directories determined from config"
        );
    }

    fn on_manifest_found(&self, manifest_path: &Path) {
        tracing::info!(manifest_path = %manifest_path.display(), "found manifest file");
    }

    fn on_manifest_resolved(&self, resolved: &ResolvedManifest) {
        tracing::info!(
            model_name = %resolved.model_name,
            model_type = %resolved.model_type,
            model_format = %resolved.model_format,
            model_file = %resolved.model_blob.display(),
            "extracted model details"
        );
    }

    fn on_manifest_failed(&self, manifest_path: &Path, err: &SyncError) {
        tracing::error!(
            manifest_path = %manifest_path.display(),
            error = %err,
            "failed to process manifest"
        );
    }

    fn on_existing_removed(&self, target: &Path) {
        tracing::info!(symlink = %target.display(), "removed existing symlink");
    }

    fn on_remove_failed(&self, target: &Path, err: &io::Error) {
        tracing::warn!(
            symlink = %target.display(),
            error = %err,
            "failed to remove existing symlink"
        );
    }

    fn on_replacing_foreign(&self, target: &Path, previous: &Path) {
        tracing::debug!(
            symlink = %target.display(),
            previous = %previous.display(),
            "replacing link that pointed at a different blob"
        );
    }

    fn on_link_fallback(&self, target: &Path, err: &io::Error) {
        tracing::warn!(
            symlink = %target.display(),
            error = %err,
            "symlink creation failed; attempting file copy as fallback"
        );
    }

    fn on_installed(&self, target: &Path, blob: &Path, kind: LinkKind) {
        tracing::info!(
            model_file = %blob.display(),
            symlink = %target.display(),
            kind = kind.as_str(),
            "completed link creation"
        );
    }

    fn on_destination_failed(&self, destination: &Path, err: &SyncError) {
        tracing::error!(
            destination = %destination.display(),
            error = %err,
            "failed to install model into destination"
        );
    }

    fn on_no_manifests(&self, manifest_dir: &Path) {
        tracing::warn!(manifest_dir = %manifest_dir.display(), "no manifest files found");
    }

    fn on_update(&self, stats: &SyncStats) {
        tracing::debug!("{}", format_stats(stats));
    }

    fn on_finish(&self, stats: &SyncStats) {
        tracing::info!("ollama-sync complete: {}", format_stats(stats));
    }
}

pub struct NoProgressReporter;

impl NoProgressReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NoProgressReporter {
    fn on_start(&self, _config: &Config) {}

    fn on_manifest_found(&self, _manifest_path: &Path) {}

    fn on_manifest_resolved(&self, _resolved: &ResolvedManifest) {}

    fn on_manifest_failed(&self, _manifest_path: &Path, _err: &SyncError) {}

    fn on_existing_removed(&self, _target: &Path) {}

    fn on_remove_failed(&self, _target: &Path, _err: &io::Error) {}

    fn on_replacing_foreign(&self, _target: &Path, _previous: &Path) {}

    fn on_link_fallback(&self, _target: &Path, _err: &io::Error) {}

    fn on_installed(&self, _target: &Path, _blob: &Path, _kind: LinkKind) {}

    fn on_destination_failed(&self, _destination: &Path, _err: &SyncError) {}

    fn on_no_manifests(&self, _manifest_dir: &Path) {}

    fn on_update(&self, _stats: &SyncStats) {}

    fn on_finish(&self, _stats: &SyncStats) {}
}

pub struct IndicatifProgressReporter {
    bar: ProgressBar,
}

impl IndicatifProgressReporter {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(draw_target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(None, draw_target);
        let style = ProgressStyle::with_template("{spinner:.yellow} {msg:.blue}")
            .expect("invalid progress style template")
            .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));

        Self { bar }
    }

    fn print_failure(&self, message: String) {
        let _ = self.bar.println(style(message).red().to_string());
    }

    fn print_warning(&self, message: String) {
        let _ = self.bar.println(style(message).yellow().to_string());
    }
}

impl ProgressReporter for IndicatifProgressReporter {
    fn on_start(&self, config: &Config) {
        let _ = self
            .bar
            .println(format!("scanning: {}", config.manifest_dir.display()));
        self.bar.set_message(format_stats(&SyncStats::default()));
    }

    fn on_manifest_found(&self, _manifest_path: &Path) {}

    fn on_manifest_resolved(&self, _resolved: &ResolvedManifest) {}

    fn on_manifest_failed(&self, manifest_path: &Path, err: &SyncError) {
        self.print_failure(format!("failed: {} ({})", manifest_path.display(), err));
    }

    fn on_existing_removed(&self, _target: &Path) {}

    fn on_remove_failed(&self, target: &Path, err: &io::Error) {
        self.print_warning(format!("could not remove: {} ({})", target.display(), err));
    }

    fn on_replacing_foreign(&self, _target: &Path, _previous: &Path) {}

    fn on_link_fallback(&self, target: &Path, err: &io::Error) {
        self.print_warning(format!("copying instead: {} ({})", target.display(), err));
    }

    fn on_installed(&self, target: &Path, _blob: &Path, kind: LinkKind) {
        let _ = self
            .bar
            .println(format!("{}: {}", kind.as_str(), target.display()));
    }

    fn on_destination_failed(&self, destination: &Path, err: &SyncError) {
        self.print_failure(format!("failed: {} ({})", destination.display(), err));
    }

    fn on_no_manifests(&self, manifest_dir: &Path) {
        self.print_warning(format!("no manifests in {}", manifest_dir.display()));
    }

    fn on_update(&self, stats: &SyncStats) {
        self.bar.set_message(format_stats(stats));
    }

    fn on_finish(&self, stats: &SyncStats) {
        self.bar.disable_steady_tick();
        self.bar.finish_with_message(format_stats(stats));
    }
}

struct LineProgressState<W: Write> {
    writer: W,
    last_stats: SyncStats,
}

/// Plain line output for non-terminal writers.
pub struct LineProgressReporter<W: Write> {
    state: RefCell<LineProgressState<W>>,
}

impl LineProgressReporter<std::io::Stderr> {
    pub fn new() -> Self {
        Self::with_writer(std::io::stderr())
    }
}

impl<W: Write> LineProgressReporter<W> {
    pub fn with_writer(writer: W) -> Self {
        Self {
            state: RefCell::new(LineProgressState {
                writer,
                last_stats: SyncStats::default(),
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.state.into_inner().writer
    }

    fn line(&self, message: std::fmt::Arguments<'_>) {
        let mut state = self.state.borrow_mut();
        let _ = writeln!(state.writer, "{message}");
        let _ = state.writer.flush();
    }
}

impl<W: Write> ProgressReporter for LineProgressReporter<W> {
    fn on_start(&self, config: &Config) {
        self.line(format_args!("scanning: {}", config.manifest_dir.display()));
    }

    fn on_manifest_found(&self, _manifest_path: &Path) {}

    fn on_manifest_resolved(&self, resolved: &ResolvedManifest) {
        self.line(format_args!(
            "model: {} -> {}",
            resolved.model_name, resolved.file_name
        ));
    }

    fn on_manifest_failed(&self, manifest_path: &Path, err: &SyncError) {
        self.line(format_args!(
            "failed manifest: {} ({})",
            manifest_path.display(),
            err
        ));
    }

    fn on_existing_removed(&self, _target: &Path) {}

    fn on_remove_failed(&self, target: &Path, err: &io::Error) {
        self.line(format_args!("could not remove: {} ({})", target.display(), err));
    }

    fn on_replacing_foreign(&self, target: &Path, previous: &Path) {
        self.line(format_args!(
            "replacing: {} (was {})",
            target.display(),
            previous.display()
        ));
    }

    fn on_link_fallback(&self, target: &Path, err: &io::Error) {
        self.line(format_args!("copying instead: {} ({})", target.display(), err));
    }

    fn on_installed(&self, target: &Path, _blob: &Path, kind: LinkKind) {
        self.line(format_args!("{}: {}", kind.as_str(), target.display()));
    }

    fn on_destination_failed(&self, destination: &Path, err: &SyncError) {
        self.line(format_args!(
            "failed destination: {} ({})",
            destination.display(),
            err
        ));
    }

    fn on_no_manifests(&self, manifest_dir: &Path) {
        self.line(format_args!("no manifests in {}", manifest_dir.display()));
    }

    fn on_update(&self, stats: &SyncStats) {
        if self.state.borrow().last_stats == *stats {
            return;
        }
        self.state.borrow_mut().last_stats = *stats;
        self.line(format_args!("{}", format_stats(stats)));
    }

    fn on_finish(&self, stats: &SyncStats) {
        self.on_update(stats);
        self.line(format_args!("done"));
    }
}

pub fn format_stats(stats: &SyncStats) -> String {
    format!(
        "manifests: {} links: {} copies: {} failed: {}",
        stats.manifests_found,
        stats.links_created,
        stats.copies_created,
        stats.manifests_failed + stats.destination_failures
    )
}
