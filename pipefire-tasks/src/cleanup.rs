//! `cleanup`: removes the local working copies a run produced — fetched
//! plaintext and encrypted intermediates — once they are archived and
//! delivered (spec.md §4.6). Not fatal on failure; a file that can't be
//! removed is logged and the run still ends successfully.

use std::path::PathBuf;

use tracing::warn;

use pipefire_domain::PipelineError;

pub async fn run(paths: &[PathBuf]) -> Result<usize, PipelineError> {
    let mut removed = 0;
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove local working file"),
        }
    }
    Ok(removed)
}
