//! Archive-based export and import of the certificate store
//!
//! An export is a gzip-compressed tar archive:
//!
//! ```text
//! metadata.json
//! certs/<dir_name>/key.pem
//! certs/<dir_name>/cert.pem
//! ...
//! config/<file>.yaml
//! ```
//!
//! Import restores `certs/` under the certificate root and `config/` under
//! the configuration directory. Individual files that cannot be read or
//! written are skipped with a warning; the archive as a whole still fails
//! if it cannot be opened or decoded.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use autocert_common::{validate_domain, SAN_DIR_SUFFIX};

use crate::acme::KEY_FILE;
use crate::scheduler::{RenewalTask, TaskScheduler};

/// Archive entry holding [`BackupMetadata`]
pub const METADATA_FILE: &str = "metadata.json";

/// Layout version written into every archive
pub const BACKUP_VERSION: &str = "1.0";

const CERTS_PREFIX: &str = "certs";
const CONFIG_PREFIX: &str = "config";

/// Errors from export and import
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("unsupported archive format: {0} (supported: tar.gz)")]
    UnsupportedFormat(String),

    #[error("backup file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("no stored certificate for '{0}'")]
    DomainNotFound(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode backup metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl BackupError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupFormat {
    #[default]
    TarGz,
}

impl FromStr for BackupFormat {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tar.gz" | "tgz" => Ok(Self::TarGz),
            _ => Err(BackupError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl BackupFormat {
    /// Format implied by a file name
    pub fn from_path(path: &Path) -> Result<Self, BackupError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else {
            Err(BackupError::UnsupportedFormat(path.display().to_string()))
        }
    }
}

/// Describes what an archive contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub version: String,
    pub created_at: DateTime<Utc>,
    /// `<os>/<arch>` of the exporting host
    pub platform: String,
    /// Store directory names included in the archive
    pub domains: Vec<String>,
    pub has_schedule: bool,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output: PathBuf,
    pub format: BackupFormat,
    /// Restrict the export to one stored certificate (domain or directory name)
    pub domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub input: PathBuf,
    /// Reinstall the renewal task after restoring files
    pub restore_schedule: bool,
}

/// What an import did
#[derive(Debug, Default)]
pub struct ImportReport {
    pub metadata: Option<BackupMetadata>,
    pub restored: Vec<PathBuf>,
    pub skipped: usize,
    pub schedule_restored: bool,
}

/// Exports and imports the certificate store and configuration files
pub struct BackupManager {
    cert_dir: PathBuf,
    config_dir: PathBuf,
    /// Per-user configuration file, e.g. `~/.autocert.yaml`
    user_config: Option<PathBuf>,
    scheduler: Option<(Arc<dyn TaskScheduler>, RenewalTask)>,
}

impl BackupManager {
    pub fn new(cert_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            config_dir: config_dir.into(),
            user_config: None,
            scheduler: None,
        }
    }

    /// Include the per-user configuration file in exports and restore
    /// dot-files next to it on import
    pub fn with_user_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_config = Some(path.into());
        self
    }

    /// Scheduler used for `has_schedule` and `restore_schedule`
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>, task: RenewalTask) -> Self {
        self.scheduler = Some((scheduler, task));
        self
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Write an archive of the store and configuration to `options.output`
    pub fn export(&self, options: &ExportOptions) -> Result<BackupMetadata, BackupError> {
        info!(
            output = %options.output.display(),
            domain = ?options.domain,
            "Exporting certificates"
        );

        let files = self.collect_files(options.domain.as_deref())?;
        let metadata = self.metadata_for(&files);

        match options.format {
            BackupFormat::TarGz => self.write_tar_gz(&options.output, &files, &metadata)?,
        }

        info!(
            output = %options.output.display(),
            files = files.len(),
            domains = metadata.domains.len(),
            "Export complete"
        );
        Ok(metadata)
    }

    /// `(archive path, local path)` pairs to include
    fn collect_files(&self, domain: Option<&str>) -> Result<Vec<(String, PathBuf)>, BackupError> {
        let mut files = Vec::new();

        let dirs = match domain {
            Some(domain) => vec![self.resolve_store_dir(domain)?],
            None => sorted_entries(&self.cert_dir)?
                .into_iter()
                .filter(|p| p.is_dir())
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect(),
        };

        for dir_name in dirs {
            for path in sorted_entries(&self.cert_dir.join(&dir_name))? {
                if !path.is_file() {
                    continue;
                }
                if let Some(file) = path.file_name() {
                    let archive_path =
                        format!("{}/{}/{}", CERTS_PREFIX, dir_name, file.to_string_lossy());
                    files.push((archive_path, path));
                }
            }
        }

        for path in sorted_entries(&self.config_dir)? {
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if path.is_file() && is_yaml {
                if let Some(file) = path.file_name() {
                    files.push((format!("{}/{}", CONFIG_PREFIX, file.to_string_lossy()), path));
                }
            }
        }

        if let Some(user_config) = self.user_config.as_ref().filter(|p| p.is_file()) {
            if let Some(file) = user_config.file_name() {
                files.push((
                    format!("{}/{}", CONFIG_PREFIX, file.to_string_lossy()),
                    user_config.clone(),
                ));
            }
        }

        Ok(files)
    }

    /// Store directory for a domain or directory name
    fn resolve_store_dir(&self, domain: &str) -> Result<String, BackupError> {
        let bare = domain.strip_suffix(SAN_DIR_SUFFIX).unwrap_or(domain);
        if validate_domain(bare).is_err() {
            return Err(BackupError::DomainNotFound(domain.to_string()));
        }
        [domain.to_string(), format!("{}{}", domain, SAN_DIR_SUFFIX)]
            .into_iter()
            .find(|name| self.cert_dir.join(name).is_dir())
            .ok_or_else(|| BackupError::DomainNotFound(domain.to_string()))
    }

    fn metadata_for(&self, files: &[(String, PathBuf)]) -> BackupMetadata {
        let domains: BTreeSet<String> = files
            .iter()
            .filter_map(|(archive_path, _)| {
                let mut parts = archive_path.split('/');
                match (parts.next(), parts.next()) {
                    (Some(CERTS_PREFIX), Some(dir)) => Some(dir.to_string()),
                    _ => None,
                }
            })
            .collect();

        let has_schedule = self
            .scheduler
            .as_ref()
            .is_some_and(|(scheduler, task)| scheduler.is_installed(&task.name));

        BackupMetadata {
            version: BACKUP_VERSION.to_string(),
            created_at: Utc::now(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            domains: domains.into_iter().collect(),
            has_schedule,
        }
    }

    fn write_tar_gz(
        &self,
        output: &Path,
        files: &[(String, PathBuf)],
        metadata: &BackupMetadata,
    ) -> Result<(), BackupError> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
        }

        let file = File::create(output).map_err(|e| BackupError::io(output, e))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let data = serde_json::to_vec_pretty(metadata)?;
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(metadata.created_at.timestamp().max(0) as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, METADATA_FILE, data.as_slice())
            .map_err(|e| BackupError::io(output, e))?;

        for (archive_path, local_path) in files {
            match builder.append_path_with_name(local_path, archive_path) {
                Ok(()) => debug!(file = %archive_path, "Added to archive"),
                Err(e) => warn!(
                    file = %local_path.display(),
                    error = %e,
                    "Skipping unreadable file"
                ),
            }
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| BackupError::io(output, e))?;
        encoder.finish().map_err(|e| BackupError::io(output, e))?;
        Ok(())
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Restore an archive written by [`export`](Self::export)
    pub fn import(&self, options: &ImportOptions) -> Result<ImportReport, BackupError> {
        info!(input = %options.input.display(), "Importing certificates");

        if !options.input.is_file() {
            return Err(BackupError::InputNotFound(options.input.clone()));
        }

        let mut report = match BackupFormat::from_path(&options.input)? {
            BackupFormat::TarGz => self.read_tar_gz(&options.input)?,
        };

        if options.restore_schedule {
            match &self.scheduler {
                Some((scheduler, task)) => match task.install(scheduler.as_ref()) {
                    Ok(()) => {
                        report.schedule_restored = true;
                        info!(task = %task.name, "Renewal task restored");
                    }
                    // Files are already restored; the task can be reinstalled later.
                    Err(e) => warn!(task = %task.name, error = %e, "Renewal task not restored"),
                },
                None => warn!("No scheduler available, renewal task not restored"),
            }
        }

        info!(
            restored = report.restored.len(),
            skipped = report.skipped,
            "Import complete"
        );
        Ok(report)
    }

    fn read_tar_gz(&self, input: &Path) -> Result<ImportReport, BackupError> {
        let file = File::open(input).map_err(|e| BackupError::io(input, e))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut report = ImportReport::default();

        let entries = archive.entries().map_err(|e| BackupError::io(input, e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| BackupError::io(input, e))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let name = match entry.path() {
                Ok(path) => path.into_owned(),
                Err(e) => {
                    warn!(error = %e, "Skipping entry with unreadable path");
                    report.skipped += 1;
                    continue;
                }
            };

            if name == Path::new(METADATA_FILE) {
                match serde_json::from_reader::<_, BackupMetadata>(&mut entry) {
                    Ok(metadata) => {
                        debug!(
                            version = %metadata.version,
                            platform = %metadata.platform,
                            domains = ?metadata.domains,
                            "Read backup metadata"
                        );
                        report.metadata = Some(metadata);
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed backup metadata"),
                }
                continue;
            }

            let Some(target) = self.target_path(&name) else {
                warn!(entry = %name.display(), "Skipping entry with unsafe or unknown path");
                report.skipped += 1;
                continue;
            };

            match extract(&mut entry, &target) {
                Ok(()) => {
                    debug!(entry = %name.display(), target = %target.display(), "Restored file");
                    report.restored.push(target);
                }
                Err(e) => {
                    warn!(entry = %name.display(), error = %e, "Skipping file that could not be restored");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Local destination of an archive entry, if it is safe to restore
    fn target_path(&self, name: &Path) -> Option<PathBuf> {
        let parts = safe_components(name)?;
        let (prefix, rest) = parts.split_first()?;

        match prefix.as_str() {
            CERTS_PREFIX if rest.len() == 2 => {
                Some(self.cert_dir.join(&rest[0]).join(&rest[1]))
            }
            CONFIG_PREFIX if rest.len() == 1 => {
                let file = &rest[0];
                let user_dir = self
                    .user_config
                    .as_ref()
                    .and_then(|p| p.parent())
                    .filter(|_| file.starts_with('.'));
                Some(user_dir.unwrap_or(self.config_dir.as_path()).join(file))
            }
            _ => None,
        }
    }
}

/// Normal path components of a relative archive path; `None` when the path
/// is absolute or climbs out with `..`
fn safe_components(path: &Path) -> Option<Vec<String>> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn extract<R: io::Read>(entry: &mut tar::Entry<'_, R>, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    entry.unpack(target)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if target.file_name().is_some_and(|n| n == KEY_FILE) {
            fs::set_permissions(target, fs::Permissions::from_mode(0o600))?;
        }
    }

    Ok(())
}

/// Directory entries sorted by name; a missing directory is empty
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, BackupError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BackupError::io(dir, e)),
    };

    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(|e| BackupError::io(dir, e))?.path());
    }
    paths.sort();
    Ok(paths)
}
