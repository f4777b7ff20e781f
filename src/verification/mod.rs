use rustls::crypto::CryptoProvider;
use rustls::{CertificateError, Error as TlsError};
use std::fmt;
use std::sync::Arc;

mod anchored;
pub use anchored::Verifier;

mod server_name_override;
pub use server_name_override::ServerNameOverride;

mod path;
#[cfg(test)]
pub(crate) use path::NameConstraintViolation;

/// The reason a peer certificate was not trusted by [`Verifier`].
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationError {
    /// The end-entity certificate could not be parsed.
    MalformedCertificate,
    /// No chain could be built from the end-entity certificate to the trusted root.
    UntrustedChain(TlsError),
    /// The DNS name in the certificate is not the expected server name.
    NameMismatch {
        /// The name the verifier was configured with.
        expected: String,
        /// The name found in the certificate, if any.
        presented: Option<String>,
    },
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedCertificate => f.write_str("peer certificate could not be parsed"),
            Self::UntrustedChain(err) => write!(f, "no trust chain to the root certificate: {err}"),
            Self::NameMismatch {
                expected,
                presented: Some(presented),
            } => write!(
                f,
                "certificate is for {presented:?}, expected {expected:?}"
            ),
            Self::NameMismatch {
                expected,
                presented: None,
            } => write!(f, "certificate has no DNS name, expected {expected:?}"),
        }
    }
}

impl std::error::Error for VerificationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UntrustedChain(err) => Some(err),
            _ => None,
        }
    }
}

impl From<VerificationError> for TlsError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::MalformedCertificate => {
                TlsError::InvalidCertificate(CertificateError::BadEncoding)
            }
            VerificationError::UntrustedChain(err) => err,
            VerificationError::NameMismatch { .. } => {
                TlsError::InvalidCertificate(CertificateError::NotValidForName)
            }
        }
    }
}

// Log the certificate we are verifying so that we can try and find what may be wrong with it
// if a server is rejected unexpectedly.
fn log_server_cert(_end_entity: &rustls::pki_types::CertificateDer<'_>) {
    #[cfg(feature = "cert-logging")]
    {
        use base64::Engine;
        log::debug!(
            "verifying certificate: {}",
            base64::engine::general_purpose::STANDARD.encode(_end_entity.as_ref())
        );
    }
}

/// The provider used when none was configured: the process default if one was
/// installed, `ring` otherwise.
pub(crate) fn default_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}
