//! TLS configuration and certificate loading.

use std::future::Future;
use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;

/// Error type for TLS material loading.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificate found in {}", .0.display())]
    NoCertificate(PathBuf),
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    #[error("invalid PEM in {}: {source}", path.display())]
    Pem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rejected TLS material: {0}")]
    Rustls(#[source] std::io::Error),
}

/// Source of a ready-to-serve TLS configuration.
pub trait TlsProvider {
    /// Build the server TLS configuration.
    ///
    /// `host` is the configured bind address, passed for diagnostics only.
    /// A server-side rustls config presents the same chain on every address,
    /// so implementations must not use it to pick or filter certificates.
    fn load(
        &self,
        settings: &TlsConfig,
        host: &str,
    ) -> impl Future<Output = Result<RustlsConfig, TlsError>> + Send;
}

/// Loads a certificate chain and private key from PEM files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PemTlsProvider;

impl TlsProvider for PemTlsProvider {
    async fn load(&self, settings: &TlsConfig, host: &str) -> Result<RustlsConfig, TlsError> {
        let cert_path = Path::new(&settings.certificate);
        let key_path = Path::new(&settings.key);

        let cert_pem = read(cert_path).await?;
        let key_pem = read(key_path).await?;

        let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsError::Pem {
                path: cert_path.to_path_buf(),
                source,
            })?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificate(cert_path.to_path_buf()));
        }

        let key = rustls_pemfile::private_key(&mut key_pem.as_slice()).map_err(|source| {
            TlsError::Pem {
                path: key_path.to_path_buf(),
                source,
            }
        })?;
        if key.is_none() {
            return Err(TlsError::NoPrivateKey(key_path.to_path_buf()));
        }

        let config = RustlsConfig::from_pem(cert_pem, key_pem)
            .await
            .map_err(TlsError::Rustls)?;

        tracing::debug!(
            host = %host,
            certificates = certs.len(),
            "TLS material loaded"
        );
        Ok(config)
    }
}

async fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    tokio::fs::read(path).await.map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}
