use super::{default_provider, log_server_cert, path, VerificationError};
use crate::RootCertificate;
use once_cell::sync::OnceCell;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types;
use rustls::{crypto::CryptoProvider, DigitallySignedStruct, Error as TlsError, SignatureScheme};
use std::sync::Arc;
use x509_parser::extensions::GeneralName;

/// A TLS certificate verifier that trusts exactly one root certificate and
/// requires the end-entity certificate to carry an expected DNS name.
///
/// The server name handed over by the TLS layer (the host the client dialed)
/// is ignored; the name checked is always the one the verifier was built with.
/// Revocation is not checked.
#[derive(Debug)]
pub struct Verifier {
    root: Arc<RootCertificate>,

    expected_server_name: String,

    pub(super) crypto_provider: OnceCell<Arc<CryptoProvider>>,
}

impl Verifier {
    /// Creates a verifier that accepts certificates chaining to `root` and
    /// naming `expected_server_name`.
    ///
    /// Unless a provider is set with [`with_provider`][Verifier::with_provider],
    /// the process-default [`CryptoProvider`] is used, or `ring` if none was installed.
    pub fn new(root: Arc<RootCertificate>, expected_server_name: impl Into<String>) -> Self {
        Self {
            root,
            expected_server_name: expected_server_name.into(),
            crypto_provider: OnceCell::new(),
        }
    }

    /// Chainable setter to configure the [`CryptoProvider`] for this `Verifier`.
    pub fn with_provider(mut self, crypto_provider: Arc<CryptoProvider>) -> Self {
        self.set_provider(crypto_provider);
        self
    }

    /// Configures the [`CryptoProvider`] for this `Verifier`.
    pub fn set_provider(&mut self, crypto_provider: Arc<CryptoProvider>) {
        self.crypto_provider = crypto_provider.into();
    }

    fn get_provider(&self) -> &Arc<CryptoProvider> {
        self.crypto_provider.get_or_init(default_provider)
    }

    /// The name the end-entity certificate must carry.
    pub fn expected_server_name(&self) -> &str {
        &self.expected_server_name
    }

    /// Returns whether the peer should be trusted: its chain ends at the root
    /// certificate and its DNS name is the expected server name.
    ///
    /// Never panics; anything that can't be parsed is simply not trusted.
    pub fn verify(
        &self,
        end_entity: &pki_types::CertificateDer<'_>,
        intermediates: &[pki_types::CertificateDer<'_>],
        now: pki_types::UnixTime,
    ) -> bool {
        self.check(end_entity, intermediates, now).is_ok()
    }

    /// Returns whether a chain can be built from `end_entity` to the root certificate.
    pub fn chain_valid(
        &self,
        end_entity: &pki_types::CertificateDer<'_>,
        intermediates: &[pki_types::CertificateDer<'_>],
        now: pki_types::UnixTime,
    ) -> bool {
        self.check_chain(end_entity, intermediates, now).is_ok()
    }

    /// Returns whether the DNS name of `end_entity` equals the expected server
    /// name, ignoring case.
    pub fn name_matches(&self, end_entity: &pki_types::CertificateDer<'_>) -> bool {
        self.check_name(end_entity).is_ok()
    }

    /// Like [`verify`][Verifier::verify], but reports why the peer was rejected.
    ///
    /// Both sub-checks always run; a chain failure is reported in preference
    /// to a name mismatch.
    pub fn check(
        &self,
        end_entity: &pki_types::CertificateDer<'_>,
        intermediates: &[pki_types::CertificateDer<'_>],
        now: pki_types::UnixTime,
    ) -> Result<(), VerificationError> {
        let chain = self.check_chain(end_entity, intermediates, now);
        let name = self.check_name(end_entity);
        chain.and(name)
    }

    fn check_chain(
        &self,
        end_entity: &pki_types::CertificateDer<'_>,
        intermediates: &[pki_types::CertificateDer<'_>],
        now: pki_types::UnixTime,
    ) -> Result<(), VerificationError> {
        // Issuers limited by `directoryName` subtrees are accepted here, so the
        // path is built locally rather than by `webpki`.
        path::verify_chain(end_entity, intermediates, self.root.der(), now)
    }

    fn check_name(&self, end_entity: &pki_types::CertificateDer<'_>) -> Result<(), VerificationError> {
        match dns_name(end_entity)? {
            Some(presented) if names_equal(&presented, &self.expected_server_name) => Ok(()),
            presented => Err(VerificationError::NameMismatch {
                expected: self.expected_server_name.clone(),
                presented,
            }),
        }
    }
}

/// Returns the DNS name a certificate was issued for: its first `dNSName`
/// subject alternative name, or the subject common name when it has none.
pub(crate) fn dns_name(
    end_entity: &pki_types::CertificateDer<'_>,
) -> Result<Option<String>, VerificationError> {
    let (_, cert) = x509_parser::parse_x509_certificate(end_entity.as_ref())
        .map_err(|_| VerificationError::MalformedCertificate)?;

    let san = cert
        .subject_alternative_name()
        .map_err(|_| VerificationError::MalformedCertificate)?;

    let from_san = san.and_then(|san| {
        san.value.general_names.iter().find_map(|name| match name {
            GeneralName::DNSName(name) => Some(name.to_string()),
            _ => None,
        })
    });

    if from_san.is_some() {
        return Ok(from_san);
    }

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned);
    Ok(common_name)
}

pub(super) fn names_equal(presented: &str, expected: &str) -> bool {
    presented
        .chars()
        .flat_map(char::to_lowercase)
        .eq(expected.chars().flat_map(char::to_lowercase))
}

impl ServerCertVerifier for Verifier {
    fn verify_server_cert(
        &self,
        end_entity: &pki_types::CertificateDer<'_>,
        intermediates: &[pki_types::CertificateDer<'_>],
        server_name: &pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        now: pki_types::UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        log_server_cert(end_entity);
        log::debug!(
            "verifying certificate from {} as {}",
            server_name.to_str(),
            self.expected_server_name
        );

        self.check(end_entity, intermediates, now)
            .map(|()| ServerCertVerified::assertion())
            .map_err(|e| {
                log::info!("rejected TLS certificate: {}", e);
                e.into()
            })
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.get_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.get_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.get_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
