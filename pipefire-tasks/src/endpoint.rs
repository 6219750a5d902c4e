//! SFTP endpoint connection handling shared by `sftp.get`, `sftp.clean` and
//! `sftp.put`.
//!
//! Host key verification is strict and fixed (spec.md §9 Open Issue
//! resolution): the configured fingerprint must match the key the server
//! presents during the handshake, every time, with no "accept on first use"
//! or "ignore" escape hatch. A mismatch is a `Protocol` error, not a retry
//! candidate.

use std::net::TcpStream;
use std::path::PathBuf;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use ssh2::Session;

use pipefire_domain::PipelineError;

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub private_key_path: Option<PathBuf>,
    pub password: Option<String>,
    /// Lowercase hex SHA-256 of the server's host key, required on every
    /// connection attempt.
    pub host_key_fingerprint: String,
    pub remote_path: String,
}

fn default_port() -> u16 {
    22
}

/// A live SSH session plus the TCP socket backing it, kept together because
/// `ssh2::Session` borrows the socket for the lifetime of the connection.
/// `Drop` always sends a disconnect, so every exit path — including an
/// early `?` inside a task runner — tears the connection down, the RAII
/// equivalent of the original's `defer session.Close()`.
pub struct Endpoint {
    session: Session,
    _tcp: TcpStream,
    pub host: String,
}

impl Endpoint {
    /// Performs the blocking handshake, host-key check and authentication.
    /// `ssh2` has no async API, so this must run on a blocking thread; see
    /// `connect` for the `spawn_blocking` wrapper callers should use.
    pub fn connect_blocking(config: &EndpointConfig) -> Result<Self, PipelineError> {
        let addr = format!("{}:{}", config.host, config.port);
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| PipelineError::TransientInfra(format!("connecting to {addr}: {e}")))?;

        let mut session = Session::new()
            .map_err(|e| PipelineError::Protocol(format!("creating ssh session: {e}")))?;
        session.set_tcp_stream(tcp.try_clone().map_err(|e| {
            PipelineError::TransientInfra(format!("cloning socket for {addr}: {e}"))
        })?);
        session
            .handshake()
            .map_err(|e| PipelineError::TransientInfra(format!("ssh handshake with {addr}: {e}")))?;

        verify_host_key(&session, &config.host, &config.host_key_fingerprint)?;

        authenticate(&mut session, config)?;

        Ok(Endpoint {
            session,
            _tcp: tcp,
            host: config.host.clone(),
        })
    }

    /// Runs `connect_blocking` on a blocking-task thread pool slot.
    pub async fn connect(config: EndpointConfig) -> Result<Self, PipelineError> {
        tokio::task::spawn_blocking(move || Endpoint::connect_blocking(&config))
            .await
            .map_err(|e| PipelineError::TransientInfra(format!("endpoint connect task panicked: {e}")))?
    }

    /// Opens an SFTP channel over this session. Cheap; callers are expected
    /// to call this per operation rather than hold the handle across an
    /// `.await` point, since the whole endpoint must be driven from a
    /// blocking context.
    pub fn sftp(&self) -> Result<ssh2::Sftp, PipelineError> {
        self.session
            .sftp()
            .map_err(|e| PipelineError::TransientInfra(format!("opening sftp channel to {}: {e}", self.host)))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "pipefire done", None);
    }
}

fn verify_host_key(session: &Session, host: &str, expected_fingerprint: &str) -> Result<(), PipelineError> {
    let (key_bytes, _key_type) = session
        .host_key()
        .ok_or_else(|| PipelineError::Protocol(format!("{host} presented no host key")))?;

    let mut hasher = Sha256::new();
    hasher.update(key_bytes);
    let digest = hasher.finalize();
    let actual = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();

    if !actual.eq_ignore_ascii_case(expected_fingerprint) {
        return Err(PipelineError::Protocol(format!(
            "host key mismatch for {host}: expected {expected_fingerprint}, got {actual}"
        )));
    }
    Ok(())
}

fn authenticate(session: &mut Session, config: &EndpointConfig) -> Result<(), PipelineError> {
    if let Some(key_path) = &config.private_key_path {
        session
            .userauth_pubkey_file(&config.username, None, key_path, None)
            .map_err(|e| {
                PipelineError::Protocol(format!(
                    "public key auth for {} at {} failed: {e}",
                    config.username, config.host
                ))
            })?;
    } else if let Some(password) = &config.password {
        session
            .userauth_password(&config.username, password)
            .map_err(|e| {
                PipelineError::Protocol(format!(
                    "password auth for {} at {} failed: {e}",
                    config.username, config.host
                ))
            })?;
    } else {
        return Err(PipelineError::Config(format!(
            "endpoint {} has neither private_key_path nor password configured",
            config.host
        )));
    }

    if !session.authenticated() {
        return Err(PipelineError::Protocol(format!(
            "authentication to {} did not complete",
            config.host
        )));
    }
    Ok(())
}
