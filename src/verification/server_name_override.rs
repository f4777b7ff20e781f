use super::log_server_cert;
use crate::{Error, RootCertificate};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types;
use rustls::{
    crypto::CryptoProvider, DigitallySignedStruct, Error as TlsError, OtherError, SignatureScheme,
};
use std::sync::Arc;

/// The stock WebPKI verifier over a root store holding only the root
/// certificate, checking a fixed server name instead of the dialed host.
///
/// This is what a client gets by trusting the root and overriding the TLS
/// server name, and is run alongside [`Verifier`][super::Verifier] for comparison.
#[derive(Debug)]
pub struct ServerNameOverride {
    inner: Arc<WebPkiServerVerifier>,
    server_name: pki_types::ServerName<'static>,
}

impl ServerNameOverride {
    /// Creates a verifier checking certificates against `root` and `server_name`.
    pub fn new(
        root: &RootCertificate,
        server_name: &str,
        crypto_provider: Arc<CryptoProvider>,
    ) -> Result<Self, Error> {
        let server_name = pki_types::ServerName::try_from(server_name.to_owned())
            .map_err(|_| Error::InvalidServerName(server_name.to_owned()))?;

        let inner =
            WebPkiServerVerifier::builder_with_provider(Arc::clone(root.store()), crypto_provider)
                .build()
                .map_err(|e| Error::Tls(TlsError::Other(OtherError(Arc::new(e)))))?;

        Ok(Self { inner, server_name })
    }
}

impl ServerCertVerifier for ServerNameOverride {
    fn verify_server_cert(
        &self,
        end_entity: &pki_types::CertificateDer<'_>,
        intermediates: &[pki_types::CertificateDer<'_>],
        _server_name: &pki_types::ServerName<'_>,
        ocsp_response: &[u8],
        now: pki_types::UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        log_server_cert(end_entity);

        self.inner
            .verify_server_cert(
                end_entity,
                intermediates,
                &self.server_name,
                ocsp_response,
                now,
            )
            .map_err(|e| {
                log::info!("rejected TLS certificate: {}", e);
                e
            })
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
