//! Mutual TLS configuration for the Locket connection.
//!
//! Locket only accepts clients presenting a certificate signed by its CA.
//! The PEM files are read and checked up front so a bad path or a key
//! file that holds no key fails at startup instead of on every renewal.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};
use tracing::debug;

use crate::error::{LockError, LockResult};

/// Where to find the Locket service and the client credentials for it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LocketConfig {
    pub host: String,
    pub port: u16,
    /// CA bundle used to verify the Locket server.
    pub ca_file: PathBuf,
    /// Client certificate presented to Locket.
    pub cert_file: PathBuf,
    /// Private key for `cert_file`.
    pub key_file: PathBuf,
}

impl LocketConfig {
    /// `https://host:port` endpoint URI.
    pub fn endpoint_uri(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

/// Build the tonic TLS config for a Locket connection.
pub fn client_tls_config(config: &LocketConfig) -> LockResult<ClientTlsConfig> {
    let ca_pem = read_certificates(&config.ca_file)?;
    let cert_pem = read_certificates(&config.cert_file)?;
    let key_pem = read_private_key(&config.key_file)?;

    debug!(host = %config.host, ca = ?config.ca_file, cert = ?config.cert_file, "locket tls configured");

    Ok(ClientTlsConfig::new()
        .domain_name(config.host.clone())
        .ca_certificate(Certificate::from_pem(ca_pem))
        .identity(Identity::from_pem(cert_pem, key_pem)))
}

fn read_pem(path: &Path) -> LockResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| LockError::Config(format!("read {}: {e}", path.display())))
}

/// Read a PEM file that must contain at least one certificate.
fn read_certificates(path: &Path) -> LockResult<Vec<u8>> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LockError::Config(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(LockError::Config(format!(
            "{} contains no certificates",
            path.display()
        )));
    }
    Ok(pem)
}

/// Read a PEM file that must contain a private key.
fn read_private_key(path: &Path) -> LockResult<Vec<u8>> {
    let pem = read_pem(path)?;
    match rustls_pemfile::private_key(&mut pem.as_slice()) {
        Ok(Some(_)) => Ok(pem),
        Ok(None) => Err(LockError::Config(format!(
            "{} contains no private key",
            path.display()
        ))),
        Err(e) => Err(LockError::Config(format!("parse {}: {e}", path.display()))),
    }
}
