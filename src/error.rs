use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors that stop the harness before any request is made.
#[derive(Debug)]
pub enum Error {
    /// The root certificate file could not be read.
    Io {
        /// The file that was read.
        path: PathBuf,
        /// Why reading failed.
        source: io::Error,
    },
    /// The root certificate file is not valid PEM.
    Pem(io::Error),
    /// The PEM input holds no `CERTIFICATE` block.
    NoCertificate,
    /// The root certificate can't be used as a trust anchor.
    InvalidRoot(rustls::Error),
    /// A server name is not a valid DNS name or IP address.
    InvalidServerName(String),
    /// The TLS client configuration could not be built.
    Tls(rustls::Error),
    /// The HTTPS client could not be built.
    Client(reqwest::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            Self::Pem(err) => write!(f, "invalid PEM data: {err}"),
            Self::NoCertificate => f.write_str("no certificate found in PEM data"),
            Self::InvalidRoot(err) => write!(f, "root certificate is not a usable trust anchor: {err}"),
            Self::InvalidServerName(name) => write!(f, "invalid server name {name:?}"),
            Self::Tls(err) => write!(f, "TLS configuration failed: {err}"),
            Self::Client(err) => write!(f, "HTTPS client configuration failed: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Pem(err) => Some(err),
            Self::InvalidRoot(err) | Self::Tls(err) => Some(err),
            Self::Client(err) => Some(err),
            Self::NoCertificate | Self::InvalidServerName(_) => None,
        }
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Client(err)
    }
}
