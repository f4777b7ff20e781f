

mod handshake;

use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::Error as TlsError;
use std::time::Duration;

struct TestCase<'a> {
    /// The name the verifier is configured to expect.
    pub reference_id: &'a str,

    /// The certificates presented by the TLS server, in the same order.
    pub chain: fn(&pki::Fixtures) -> Vec<CertificateDer<'static>>,

    pub expected_result: Result<(), TlsError>,
}

pub(crate) fn ensure_global_state() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Return a fixed [UnixTime] for certificate validation purposes.
///
/// The generated test certificates are valid from 1975 until 4096, so any
/// fixed point in between keeps the tests independent of the clock.
pub(crate) fn verification_time() -> UnixTime {
    // Saturday, April 27, 2024 18:28:07 UTC
    UnixTime::since_unix_epoch(Duration::from_secs(1_714_242_489))
}
