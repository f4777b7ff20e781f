use crate::Error;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use std::path::Path;
use std::sync::Arc;

/// The single trust anchor the harness accepts.
///
/// Loaded once at startup and shared read-only; the root store holds nothing
/// but this certificate, so no platform roots are ever consulted.
#[derive(Debug)]
pub struct RootCertificate {
    der: CertificateDer<'static>,
    store: Arc<RootCertStore>,
}

impl RootCertificate {
    /// Reads the first certificate from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;

        log::debug!("loaded root certificate from {}", path.display());
        Self::from_pem(&pem)
    }

    /// Parses the first certificate in PEM-encoded data. Other sections are skipped.
    pub fn from_pem(mut pem: &[u8]) -> Result<Self, Error> {
        let mut certs = rustls_pemfile::certs(&mut pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::Pem)?
            .into_iter();

        let root = certs.next().ok_or(Error::NoCertificate)?;
        let extra = certs.count();
        if extra != 0 {
            log::warn!("Ignoring {extra} certificates after the root certificate");
        }

        Self::from_der(root)
    }

    /// Uses a DER-encoded certificate as the trust anchor.
    pub fn from_der(der: CertificateDer<'static>) -> Result<Self, Error> {
        let mut store = RootCertStore::empty();
        store.add(der.clone()).map_err(Error::InvalidRoot)?;

        Ok(Self {
            der,
            store: Arc::new(store),
        })
    }

    /// The DER encoding of the certificate.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// A root store containing only this certificate.
    pub fn store(&self) -> &Arc<RootCertStore> {
        &self.store
    }
}
