//! Path building from an end-entity certificate to the single trusted root.
//!
//! Issuers on the path may carry `directoryName` and `dNSName` name
//! constraints, marked critical or not; both kinds are enforced against the
//! end-entity certificate. Revocation is never checked.

use super::anchored::names_equal;
use super::VerificationError;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::{CertificateError, Error as TlsError, OtherError};
use std::fmt;
use std::sync::Arc;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, GeneralSubtree, ParsedExtension};
use x509_parser::x509::{RelativeDistinguishedName, X509Name};

/// Longest run of intermediates accepted between the end entity and the root.
const MAX_INTERMEDIATES: usize = 6;

/// The end-entity certificate's names fall outside the name constraints of
/// one of its issuers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameConstraintViolation {
    /// The offending subject or DNS name.
    pub name: String,
    /// Subject of the issuer whose constraints were violated.
    pub issuer: String,
    /// Whether the name matched an excluded subtree, rather than missing every
    /// permitted one.
    pub excluded: bool,
}

impl fmt::Display for NameConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.excluded {
            write!(f, "{:?} is excluded by the name constraints of {:?}", self.name, self.issuer)
        } else {
            write!(f, "{:?} is outside the permitted subtrees of {:?}", self.name, self.issuer)
        }
    }
}

impl std::error::Error for NameConstraintViolation {}

/// Checks that `end_entity` chains to `root`, possibly through some of
/// `intermediates`, at time `now`.
pub(super) fn verify_chain(
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    root: &CertificateDer<'_>,
    now: UnixTime,
) -> Result<(), VerificationError> {
    let (_, leaf) = x509_parser::parse_x509_certificate(end_entity.as_ref())
        .map_err(|_| VerificationError::MalformedCertificate)?;

    let root = match x509_parser::parse_x509_certificate(root.as_ref()) {
        Ok((_, root)) => root,
        Err(e) => {
            log::warn!("root certificate could not be parsed: {e}");
            return Err(untrusted(CertificateError::UnknownIssuer));
        }
    };

    let intermediates = intermediates
        .iter()
        .filter_map(|der| match x509_parser::parse_x509_certificate(der.as_ref()) {
            Ok((_, cert)) => Some(cert),
            Err(e) => {
                log::debug!("ignoring intermediate certificate that could not be parsed: {e}");
                None
            }
        })
        .collect();

    let builder = PathBuilder {
        root,
        intermediates,
        now: i64::try_from(now.as_secs()).unwrap_or(i64::MAX),
    };
    builder.verify(&leaf).map_err(untrusted)
}

fn untrusted(err: CertificateError) -> VerificationError {
    VerificationError::UntrustedChain(TlsError::InvalidCertificate(err))
}

struct PathBuilder<'a> {
    root: X509Certificate<'a>,
    intermediates: Vec<X509Certificate<'a>>,
    now: i64,
}

impl PathBuilder<'_> {
    fn verify(&self, leaf: &X509Certificate<'_>) -> Result<(), CertificateError> {
        self.check_validity(leaf)?;
        check_critical_extensions(leaf)?;
        check_server_auth(leaf)?;

        let mut path = Vec::new();
        self.extend(leaf, leaf, &mut path)
    }

    /// Depth-first search for an issuer of `cert`, ending at the root.
    ///
    /// `path` holds the indices of the intermediates already between `leaf`
    /// and `cert`. When several candidates fail, the first failure other than
    /// a missing issuer is reported.
    fn extend(
        &self,
        leaf: &X509Certificate<'_>,
        cert: &X509Certificate<'_>,
        path: &mut Vec<usize>,
    ) -> Result<(), CertificateError> {
        if issued_by(cert, &self.root) {
            self.check_validity(&self.root)?;
            check_critical_extensions(&self.root)?;
            return self.check_name_constraints(leaf, path);
        }

        if path.len() == MAX_INTERMEDIATES {
            return Err(CertificateError::UnknownIssuer);
        }

        let mut error = CertificateError::UnknownIssuer;
        for (index, candidate) in self.intermediates.iter().enumerate() {
            if path.contains(&index)
                || !issued_by(cert, candidate)
                || !may_issue(candidate, path.len())
            {
                continue;
            }

            path.push(index);
            let result = self
                .check_validity(candidate)
                .and_then(|()| check_critical_extensions(candidate))
                .and_then(|()| self.extend(leaf, candidate, path));
            path.pop();

            match result {
                Ok(()) => return Ok(()),
                Err(e) if matches!(error, CertificateError::UnknownIssuer) => error = e,
                Err(_) => {}
            }
        }

        Err(error)
    }

    fn check_validity(&self, cert: &X509Certificate<'_>) -> Result<(), CertificateError> {
        let validity = cert.validity();
        if self.now < validity.not_before.timestamp() {
            Err(CertificateError::NotValidYet)
        } else if self.now > validity.not_after.timestamp() {
            Err(CertificateError::Expired)
        } else {
            Ok(())
        }
    }

    fn check_name_constraints(
        &self,
        leaf: &X509Certificate<'_>,
        path: &[usize],
    ) -> Result<(), CertificateError> {
        let issuers = path
            .iter()
            .filter_map(|&index| self.intermediates.get(index))
            .chain(std::iter::once(&self.root));

        for issuer in issuers {
            check_subtrees(issuer, leaf)?;
        }
        Ok(())
    }
}

/// Whether `issuer`'s subject names `cert`'s issuer and its key signed `cert`.
fn issued_by(cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    cert.issuer().as_raw() == issuer.subject().as_raw()
        && cert.verify_signature(Some(issuer.public_key())).is_ok()
}

/// Whether `candidate` is a CA allowed to have `below` intermediates under it.
fn may_issue(candidate: &X509Certificate<'_>, below: usize) -> bool {
    let within_path_len = match candidate.basic_constraints() {
        Ok(Some(constraints)) => {
            let max = constraints.value.path_len_constraint;
            constraints.value.ca
                && max.map_or(true, |max| usize::try_from(max).map_or(true, |max| below <= max))
        }
        _ => false,
    };

    // A key usage extension, when present, must allow certificate signing.
    let signs_certificates = match candidate.key_usage() {
        Ok(Some(usage)) => usage.value.key_cert_sign(),
        Ok(None) => true,
        Err(_) => false,
    };

    within_path_len && signs_certificates
}

fn check_critical_extensions(cert: &X509Certificate<'_>) -> Result<(), CertificateError> {
    let unhandled = cert.extensions().iter().any(|ext| {
        ext.critical
            && matches!(
                ext.parsed_extension(),
                ParsedExtension::UnsupportedExtension { .. }
            )
    });

    if unhandled {
        return Err(CertificateError::UnhandledCriticalExtension);
    }
    Ok(())
}

fn check_server_auth(leaf: &X509Certificate<'_>) -> Result<(), CertificateError> {
    match leaf.extended_key_usage() {
        Ok(Some(eku)) if !(eku.value.any || eku.value.server_auth) => {
            Err(CertificateError::InvalidPurpose)
        }
        Ok(_) => Ok(()),
        Err(_) => Err(CertificateError::BadEncoding),
    }
}

/// Applies the name constraints of `issuer`, if any, to the subject and the
/// DNS names of `leaf`.
///
/// A `directoryName` subtree matches a subject that starts with the same
/// RDNs, in order. A `dNSName` subtree matches only the same name, ignoring
/// case.
fn check_subtrees(
    issuer: &X509Certificate<'_>,
    leaf: &X509Certificate<'_>,
) -> Result<(), CertificateError> {
    let constraints = match issuer.name_constraints() {
        Ok(Some(ext)) => ext.value,
        Ok(None) => return Ok(()),
        Err(_) => return Err(CertificateError::BadEncoding),
    };

    let permitted = constraints.permitted_subtrees.as_deref().unwrap_or(&[]);
    let excluded = constraints.excluded_subtrees.as_deref().unwrap_or(&[]);
    let violation = |name: String, excluded: bool| {
        CertificateError::Other(OtherError(Arc::new(NameConstraintViolation {
            name,
            issuer: issuer.subject().to_string(),
            excluded,
        })))
    };

    let subject = leaf.subject();
    if directory_names(excluded).any(|base| starts_with(subject, base)) {
        return Err(violation(subject.to_string(), true));
    }

    let mut permitted_directories = directory_names(permitted).peekable();
    if permitted_directories.peek().is_some()
        && !permitted_directories.any(|base| starts_with(subject, base))
    {
        return Err(violation(subject.to_string(), false));
    }

    let permitted_domains: Vec<&str> = dns_names(permitted).collect();
    for name in leaf_dns_names(leaf)? {
        if dns_names(excluded).any(|domain| names_equal(&name, domain)) {
            return Err(violation(name, true));
        }

        if !permitted_domains.is_empty()
            && !permitted_domains.iter().any(|domain| names_equal(&name, domain))
        {
            return Err(violation(name, false));
        }
    }

    Ok(())
}

fn directory_names<'b, 'a>(
    subtrees: &'b [GeneralSubtree<'a>],
) -> impl Iterator<Item = &'b X509Name<'a>> {
    subtrees.iter().filter_map(|subtree| match &subtree.base {
        GeneralName::DirectoryName(name) => Some(name),
        _ => None,
    })
}

fn dns_names<'b, 'a>(
    subtrees: &'b [GeneralSubtree<'a>],
) -> impl Iterator<Item = &'a str> + 'b {
    subtrees.iter().filter_map(|subtree| match &subtree.base {
        GeneralName::DNSName(name) => Some(*name),
        _ => None,
    })
}

fn leaf_dns_names(leaf: &X509Certificate<'_>) -> Result<Vec<String>, CertificateError> {
    let names = match leaf.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(name) => Some(name.to_string()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(_) => return Err(CertificateError::BadEncoding),
    };
    Ok(names)
}

/// Whether the RDN sequence of `base` is a prefix of that of `subject`.
fn starts_with(subject: &X509Name<'_>, base: &X509Name<'_>) -> bool {
    let mut subject = subject.iter();
    base.iter()
        .all(|rdn| subject.next().map_or(false, |other| rdn_equal(rdn, other)))
}

fn rdn_equal(a: &RelativeDistinguishedName<'_>, b: &RelativeDistinguishedName<'_>) -> bool {
    a.iter().count() == b.iter().count()
        && a.iter().zip(b.iter()).all(|(a, b)| {
            a.attr_type() == b.attr_type()
                && matches!((a.as_str(), b.as_str()), (Ok(a), Ok(b)) if a == b)
        })
}
