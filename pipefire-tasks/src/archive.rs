//! `archive`: bundles the files a run has touched into a dated tarball for
//! retention (spec.md §4.5). Not fatal on failure.
//!
//! The archive name is `YYYY-MM-DD.tar`, computed from the current date —
//! deliberately not the original system's time-format string, which had a
//! typo that produced a malformed name (spec.md §9 Design Note). Files are
//! written with mode `0600`, since archives can contain plaintext financial
//! data pending cleanup.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use pipefire_domain::PipelineError;

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub archive_dir: PathBuf,
}

pub async fn run(config: ArchiveConfig, paths: &[PathBuf]) -> Result<PathBuf, PipelineError> {
    tokio::fs::create_dir_all(&config.archive_dir)
        .await
        .map_err(PipelineError::Io)?;

    let archive_name = format!("{}.tar", Utc::now().format("%Y-%m-%d"));
    let archive_path = config.archive_dir.join(archive_name);
    let paths = paths.to_vec();
    let file_count = paths.len();
    let archive_path_clone = archive_path.clone();

    tokio::task::spawn_blocking(move || write_archive(&archive_path_clone, &paths))
        .await
        .map_err(|e| PipelineError::TransientInfra(format!("archive task panicked: {e}")))??;

    info!(path = %archive_path.display(), files = file_count, "archived run");
    Ok(archive_path)
}

fn write_archive(archive_path: &Path, paths: &[PathBuf]) -> Result<(), PipelineError> {
    use std::os::unix::fs::PermissionsExt;

    let file = std::fs::File::create(archive_path).map_err(PipelineError::Io)?;
    let mut builder = tar::Builder::new(file);
    for path in paths {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::Config(format!("path {} has no file name", path.display())))?;
        let mut f = std::fs::File::open(path).map_err(PipelineError::Io)?;

        // `append_file` would copy the source file's own mode into the tar
        // header; a hand-built header pins every entry's mode to owner
        // read/write regardless of what the file was created with on disk
        // (spec.md §4.4.5).
        let mut header = tar::Header::new_gnu();
        header.set_size(metadata.len());
        header.set_mode(0o600);
        header.set_mtime(
            metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0),
        );
        header.set_cksum();

        builder
            .append_data(&mut header, name, &mut f)
            .map_err(|e| PipelineError::TransientInfra(format!("adding {} to archive: {e}", path.display())))?;
    }
    builder
        .into_inner()
        .map_err(|e| PipelineError::TransientInfra(format!("finishing archive: {e}")))?;

    std::fs::set_permissions(archive_path, std::fs::Permissions::from_mode(0o600)).map_err(PipelineError::Io)?;
    Ok(())
}
