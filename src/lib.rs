#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
//! A conformance harness for servers whose certificates must chain to one
//! private root and carry one expected DNS name.
//!
//! The core is [`Verifier`], a `rustls` certificate verifier that trusts only
//! the configured [`RootCertificate`], skips revocation checks and compares the
//! certificate's DNS name to an expected server name without regard to case.
//! The [`runner`] module drives a fixed table of requests against local servers
//! and reports whether each handshake succeeded or failed as expected.

use rustls::{client::WantsClientCert, ClientConfig, ConfigBuilder, WantsVerifier};
use std::sync::Arc;

mod error;
pub use error::Error;

mod root;
pub use root::RootCertificate;

mod verification;
pub use verification::{ServerNameOverride, VerificationError, Verifier};

pub mod runner;

/// Fixtures and helpers to support testing the verifier and the runner.
#[cfg(test)]
mod tests;

/// Exposed for debugging certificate issues with standalone tools.
///
/// This is not intended for production use, configure a [`ClientConfig`] with
/// [`BuilderVerifierExt`] instead.
#[cfg(feature = "dbg")]
#[cfg_attr(docsrs, doc(cfg(feature = "dbg")))]
pub fn verifier_for_dbg(
    root: &[u8],
    expected_server_name: &str,
) -> Result<Arc<dyn rustls::client::danger::ServerCertVerifier>, Error> {
    let root = RootCertificate::from_der(rustls::pki_types::CertificateDer::from(root.to_vec()))?;
    Ok(Arc::new(Verifier::new(Arc::new(root), expected_server_name)))
}

/// Extension trait to help configure [`ClientConfig`]s with the harness' verifiers.
pub trait BuilderVerifierExt {
    /// Configures the `ClientConfig` with a [`Verifier`] trusting only `root` and
    /// requiring `expected_server_name`.
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use rustls::ClientConfig;
    /// # use rustls_anchor_conformance::{BuilderVerifierExt, RootCertificate};
    /// # fn build(root: Arc<RootCertificate>) {
    /// let config = ClientConfig::builder()
    ///     .with_anchor_verifier(root, "example.com")
    ///     .with_no_client_auth();
    /// # }
    /// ```
    fn with_anchor_verifier(
        self,
        root: Arc<RootCertificate>,
        expected_server_name: &str,
    ) -> ConfigBuilder<ClientConfig, WantsClientCert>;

    /// Configures the `ClientConfig` with the stock WebPKI verifier over `root`,
    /// checking `server_name` instead of the dialed host.
    ///
    /// # Errors
    ///
    /// Fails if `server_name` is not a valid server name or the verifier can't be built.
    fn with_server_name_override(
        self,
        root: &RootCertificate,
        server_name: &str,
    ) -> Result<ConfigBuilder<ClientConfig, WantsClientCert>, Error>;
}

impl BuilderVerifierExt for ConfigBuilder<ClientConfig, WantsVerifier> {
    fn with_anchor_verifier(
        self,
        root: Arc<RootCertificate>,
        expected_server_name: &str,
    ) -> ConfigBuilder<ClientConfig, WantsClientCert> {
        let provider = self.crypto_provider().clone();
        self.dangerous().with_custom_certificate_verifier(Arc::new(
            Verifier::new(root, expected_server_name).with_provider(provider),
        ))
    }

    fn with_server_name_override(
        self,
        root: &RootCertificate,
        server_name: &str,
    ) -> Result<ConfigBuilder<ClientConfig, WantsClientCert>, Error> {
        let provider = self.crypto_provider().clone();
        let verifier = ServerNameOverride::new(root, server_name, provider)?;
        Ok(self
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier)))
    }
}
