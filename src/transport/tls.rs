//! # TLS Transport Layer
//!
//! TLS configuration and stream wrapping for connections that want
//! confidentiality on the wire.
//!
//! The protocol itself never looks inside the transport; this module only
//! turns an accepted or connected TCP stream into another opaque byte
//! stream. Certificate handling follows modern defaults (TLS 1.2+), with a
//! certificate-pinning option and an insecure mode for development setups.
//!
//! ## Responsibilities
//! - Load certificates and private keys from PEM files
//! - Generate self-signed certificates for development/testing
//! - Produce the acceptor/connector used by the server and client services

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

use crate::error::{LinkError, Result};

/// TLS server configuration
pub struct TlsServerConfig {
    cert_path: String,
    key_path: String,
}

impl TlsServerConfig {
    /// Create a new TLS server configuration
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_string_lossy().to_string(),
            key_path: key_path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// Generate a self-signed certificate for development/testing purposes
    pub fn generate_self_signed<P: AsRef<Path>>(cert_path: P, key_path: P) -> io::Result<Self> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| io::Error::other(format!("Certificate generation error: {e}")))?;

        let mut cert_file = File::create(&cert_path)?;
        cert_file.write_all(cert.cert.pem().as_bytes())?;

        let mut key_file = File::create(&key_path)?;
        key_file.write_all(cert.key_pair.serialize_pem().as_bytes())?;

        Ok(Self::new(cert_path, key_path))
    }

    /// Load the TLS configuration from files
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let cert_file = File::open(&self.cert_path)
            .map_err(|e| LinkError::Tls(format!("Failed to open cert file: {e}")))?;
        let mut cert_reader = BufReader::new(cert_file);
        let cert_chain: Vec<Certificate> = certs(&mut cert_reader)
            .map_err(|_| LinkError::Tls("Failed to parse certificate".into()))?
            .into_iter()
            .map(Certificate)
            .collect();

        let key_file = File::open(&self.key_path)
            .map_err(|e| LinkError::Tls(format!("Failed to open key file: {e}")))?;
        let mut key_reader = BufReader::new(key_file);
        let keys = pkcs8_private_keys(&mut key_reader)
            .map_err(|_| LinkError::Tls("Failed to parse private key".into()))?;
        if keys.is_empty() {
            return Err(LinkError::Tls("No private keys found".into()));
        }
        let private_key = PrivateKey(keys[0].clone());

        // Safe defaults restrict to TLS 1.2/1.3 with modern ciphersuites.
        ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| LinkError::Tls(format!("TLS error: {e}")))
    }

    /// Build the acceptor used by the server accept loop.
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(self.load_server_config()?)))
    }
}

/// TLS Client Configuration
pub struct TlsClientConfig {
    server_name: String,
    insecure: bool,
    /// Optional certificate hash to pin (SHA-256 fingerprint)
    pinned_cert_hash: Option<Vec<u8>>,
}

impl TlsClientConfig {
    /// Create a new TLS client configuration
    pub fn new<S: Into<String>>(server_name: S) -> Self {
        Self {
            server_name: server_name.into(),
            insecure: false,
            pinned_cert_hash: None,
        }
    }

    /// Allow insecure connections (skip certificate verification)
    ///
    /// # WARNING: Security Risk
    /// This mode disables certificate verification entirely and should ONLY
    /// be used for development and testing, or on internal networks combined
    /// with certificate pinning via `with_pinned_cert_hash()`.
    pub fn insecure(mut self) -> Self {
        warn!("INSECURE MODE ENABLED: Certificate verification is disabled. This should only be used for development/testing.");
        self.insecure = true;
        self
    }

    /// Pin a certificate by its SHA-256 hash/fingerprint
    ///
    /// Only servers presenting the exact certificate matching this hash are
    /// accepted. Can be combined with insecure mode for development
    /// environments that skip standard CA verification but still verify one
    /// specific certificate.
    pub fn with_pinned_cert_hash(mut self, hash: Vec<u8>) -> Self {
        if hash.len() != 32 {
            warn!(
                "Certificate hash has unexpected length: {} (expected 32 bytes for SHA-256)",
                hash.len()
            );
        }
        self.pinned_cert_hash = Some(hash);
        self
    }

    /// Calculate SHA-256 hash for a certificate to use with pinning
    pub fn calculate_cert_hash(cert: &Certificate) -> Vec<u8> {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&cert.0);
        hasher.finalize().to_vec()
    }

    /// Load the TLS client configuration
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let builder = ClientConfig::builder().with_safe_defaults();

        if !self.insecure {
            // SECURE MODE: verify against the system root certificates.
            let mut root_store = RootCertStore::empty();
            let native_certs = rustls_native_certs::load_native_certs()
                .map_err(|e| LinkError::Tls(format!("Failed to load native certs: {e}")))?;
            for cert in native_certs {
                root_store
                    .add(&Certificate(cert.0))
                    .map_err(|e| LinkError::Tls(format!("Failed to add cert to root store: {e}")))?;
            }
            return Ok(builder
                .with_root_certificates(root_store)
                .with_no_client_auth());
        }

        // INSECURE MODE: pinned certificate, or accept any.
        let config = if let Some(hash) = &self.pinned_cert_hash {
            struct CertificateFingerprint {
                fingerprint: Vec<u8>,
            }

            impl rustls::client::ServerCertVerifier for CertificateFingerprint {
                fn verify_server_cert(
                    &self,
                    end_entity: &Certificate,
                    _intermediates: &[Certificate],
                    _server_name: &ServerName,
                    _scts: &mut dyn Iterator<Item = &[u8]>,
                    _ocsp_response: &[u8],
                    _now: std::time::SystemTime,
                ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error>
                {
                    let hash = TlsClientConfig::calculate_cert_hash(end_entity);
                    if hash.as_slice() == self.fingerprint.as_slice() {
                        Ok(rustls::client::ServerCertVerified::assertion())
                    } else {
                        Err(rustls::Error::General(
                            "Pinned certificate hash mismatch".into(),
                        ))
                    }
                }
            }

            debug!("certificate pinning enabled");
            builder
                .with_custom_certificate_verifier(Arc::new(CertificateFingerprint {
                    fingerprint: hash.clone(),
                }))
                .with_no_client_auth()
        } else {
            struct AcceptAnyServerCert;

            impl rustls::client::ServerCertVerifier for AcceptAnyServerCert {
                fn verify_server_cert(
                    &self,
                    _end_entity: &Certificate,
                    _intermediates: &[Certificate],
                    _server_name: &ServerName,
                    _scts: &mut dyn Iterator<Item = &[u8]>,
                    _ocsp_response: &[u8],
                    _now: std::time::SystemTime,
                ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error>
                {
                    Ok(rustls::client::ServerCertVerified::assertion())
                }
            }

            builder
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth()
        };

        Ok(config)
    }

    /// Get the server name as a rustls::ServerName
    pub fn server_name(&self) -> Result<ServerName> {
        ServerName::try_from(self.server_name.as_str())
            .map_err(|_| LinkError::Tls("Invalid server name".into()))
    }

    /// Build the connector used by the client service.
    pub fn connector(&self) -> Result<TlsConnector> {
        Ok(TlsConnector::from(Arc::new(self.load_client_config()?)))
    }
}

/// Perform the server side of the TLS handshake on an accepted socket.
pub async fn accept(acceptor: &TlsAcceptor, stream: TcpStream) -> Result<ServerTlsStream<TcpStream>> {
    acceptor
        .accept(stream)
        .await
        .map_err(|e| LinkError::Tls(format!("TLS handshake failed: {e}")))
}

/// Perform the client side of the TLS handshake on a connected socket.
pub async fn connect(
    config: &TlsClientConfig,
    stream: TcpStream,
) -> Result<ClientTlsStream<TcpStream>> {
    let connector = config.connector()?;
    let domain = config.server_name()?;
    connector
        .connect(domain, stream)
        .await
        .map_err(|e| LinkError::Tls(format!("TLS connection failed: {e}")))
}
