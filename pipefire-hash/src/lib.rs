//! Content Hasher (C1).
//!
//! Produces a deterministic fingerprint of a file's bytes: SHA-256 over the
//! exact byte content, streamed so memory use is bounded regardless of file
//! size (spec.md §4.1). This digest is the content-addressable identity used
//! by both the transfer ledger and the encryption ledger, and appears in
//! logs and ledger rows verbatim, lowercase hex.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Hashes the file at `path`, returning its SHA-256 digest as lowercase hex.
///
/// Reads the file in fixed-size chunks rather than loading it whole, so a
/// multi-gigabyte transfer costs a constant amount of memory to fingerprint.
pub async fn hash(path: impl AsRef<Path>) -> Result<String, HashError> {
    let path = path.as_ref();
    let file = File::open(path).await.map_err(|source| HashError::Read {
        path: path.display().to_string(),
        source,
    })?;
    hash_reader(file, path).await
}

/// Hashes bytes from any async reader, for callers (e.g. the SFTP `get`
/// runner) that compute the digest while streaming a download rather than
/// re-reading a file from disk afterward.
pub async fn hash_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    path_for_errors: &Path,
) -> Result<String, HashError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|source| HashError::Read {
                path: path_for_errors.display().to_string(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Minimal hex encoding so this crate doesn't need the `hex` crate just for
/// this one call site; kept private-surface simple and dependency-light.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(out, "{:02x}", b).expect("writing to a String cannot fail");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn hashes_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut f = tokio::fs::File::create(&path).await.unwrap();
        f.write_all(b"hello world").await.unwrap();
        f.flush().await.unwrap();

        let digest = hash(&path).await.unwrap();
        // sha256("hello world")
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn same_content_same_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        tokio::fs::write(&a, b"identical content").await.unwrap();
        tokio::fs::write(&b, b"identical content").await.unwrap();

        assert_eq!(hash(&a).await.unwrap(), hash(&b).await.unwrap());
    }

    #[tokio::test]
    async fn different_content_different_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        tokio::fs::write(&a, b"content a").await.unwrap();
        tokio::fs::write(&b, b"content b").await.unwrap();

        assert_ne!(hash(&a).await.unwrap(), hash(&b).await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = hash("/nonexistent/path/does-not-exist.csv").await;
        assert!(matches!(err, Err(HashError::Read { .. })));
    }
}
