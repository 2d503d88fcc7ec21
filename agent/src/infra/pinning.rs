//! Server certificate pinning for the exchange transport.
//!
//! The verifier runs inside the TLS handshake, so a server that does not
//! present the pinned certificate never sees a request byte.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};

/// The artifact the server's certificate is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinnedCertificate {
    /// Certificates from a PEM file. The server's end-entity certificate
    /// must equal one of them or chain to one of them.
    Certificates(Vec<CertificateDer<'static>>),
    /// SHA-256 of the end-entity certificate's DER encoding.
    Sha256([u8; 32]),
}

impl PinnedCertificate {
    /// Load every certificate in a PEM file.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open pinned certificate {}", path.display()))?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("cannot parse pinned certificate {}", path.display()))?;
        if certs.is_empty() {
            bail!("{} contains no PEM certificates", path.display());
        }
        Ok(Self::Certificates(certs))
    }

    /// Parse a hex SHA-256 fingerprint; `:` separators are allowed.
    pub fn from_fingerprint(fingerprint: &str) -> Result<Self> {
        let compact: String = fingerprint
            .chars()
            .filter(|c| *c != ':' && !c.is_whitespace())
            .collect();
        let bytes = hex::decode(&compact).context("fingerprint is not hex")?;
        let digest: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            anyhow::anyhow!("fingerprint must be 32 bytes, got {}", b.len())
        })?;
        Ok(Self::Sha256(digest))
    }

    /// Whether `end_entity` is byte-identical to the pinned artifact.
    #[must_use]
    pub fn matches(&self, end_entity: &CertificateDer<'_>) -> bool {
        match self {
            PinnedCertificate::Certificates(certs) => {
                certs.iter().any(|c| c.as_ref() == end_entity.as_ref())
            }
            PinnedCertificate::Sha256(digest) => {
                Sha256::digest(end_entity.as_ref()).as_slice() == digest.as_slice()
            }
        }
    }
}

/// `rustls` verifier that accepts only the pinned server certificate.
/// Handshake signatures are still checked with the provider's algorithms.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    pin: PinnedCertificate,
    /// Chain verification against the pinned certificates as trust anchors.
    chain: Option<Arc<WebPkiServerVerifier>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl PinnedCertVerifier {
    pub fn new(pin: PinnedCertificate, provider: &Arc<CryptoProvider>) -> Result<Self> {
        let chain = match &pin {
            PinnedCertificate::Certificates(certs) => {
                let mut roots = RootCertStore::empty();
                let (added, _ignored) = roots.add_parsable_certificates(certs.iter().cloned());
                if added == 0 {
                    None
                } else {
                    Some(
                        WebPkiServerVerifier::builder_with_provider(
                            Arc::new(roots),
                            Arc::clone(provider),
                        )
                        .build()
                        .context("cannot build chain verifier for pinned certificates")?,
                    )
                }
            }
            PinnedCertificate::Sha256(_) => None,
        };
        Ok(Self {
            pin,
            chain,
            algorithms: provider.signature_verification_algorithms,
        })
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.pin.matches(end_entity) {
            return Ok(ServerCertVerified::assertion());
        }
        if let Some(chain) = &self.chain {
            if chain
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .is_ok()
            {
                return Ok(ServerCertVerified::assertion());
            }
        }
        Err(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
