//! The fixed request table and the sequential runner that reports on it.

use crate::verification::default_provider;
use crate::{BuilderVerifierExt, Error, RootCertificate};
use rustls::ClientConfig;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use termcolor::{Color, ColorSpec, WriteColor};

/// One server the harness talks to, and whether its certificate should be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestCase {
    /// Name printed in the report.
    pub name: &'static str,
    /// Port on `localhost` the server listens on.
    pub port: u16,
    /// Name the server's certificate must carry.
    pub server_name: &'static str,
    /// Whether the request is expected to succeed.
    pub expected_ok: bool,
}

impl TestCase {
    /// The URL requested for this case.
    pub fn url(&self) -> String {
        format!("https://localhost:{}/", self.port)
    }
}

/// The servers of the conformance setup, one per certificate/name combination.
pub const TEST_CASES: [TestCase; 4] = [
    TestCase {
        name: "domain_correct_ou_correct",
        port: 8443,
        server_name: "only-this-domain-is-allowed.com",
        expected_ok: true,
    },
    TestCase {
        name: "domain_incorrect_ou_correct",
        port: 8444,
        server_name: "only-this-domain-is-allowed.com",
        expected_ok: false,
    },
    TestCase {
        name: "domain_correct_ou_incorrect",
        port: 8445,
        server_name: "this-domain-is-not-allowed.com",
        expected_ok: false,
    },
    TestCase {
        name: "domain_incorrect_ou_incorrect",
        port: 8446,
        server_name: "this-domain-is-not-allowed.com",
        expected_ok: false,
    },
];

/// Which peer validation a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    /// Stock WebPKI validation against the root, with the server name overridden.
    Standard,
    /// The single-root, expected-name [`Verifier`][crate::Verifier].
    Custom,
}

impl Suite {
    /// Both suites, in the order they are run.
    pub const ALL: [Suite; 2] = [Suite::Standard, Suite::Custom];

    fn heading(self) -> &'static str {
        match self {
            Suite::Standard => "Testing using the standard TLS client",
            Suite::Custom => "Testing using the custom TLS client",
        }
    }

    /// Builds the TLS configuration for one case of this suite.
    pub fn tls_config(
        self,
        root: &Arc<RootCertificate>,
        server_name: &str,
    ) -> Result<ClientConfig, Error> {
        let builder = ClientConfig::builder_with_provider(default_provider())
            .with_safe_default_protocol_versions()?;

        let builder = match self {
            Suite::Standard => builder.with_server_name_override(root, server_name)?,
            Suite::Custom => builder.with_anchor_verifier(Arc::clone(root), server_name),
        };

        Ok(builder.with_no_client_auth())
    }
}

/// Broad cause of a failed request.
///
/// Every failure counts the same when judging a case; this only tells a
/// rejected certificate apart from a server that could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The TLS layer rejected the server's certificate.
    Certificate,
    /// Anything else: connection refused, protocol errors, client setup.
    Transport,
}

/// What happened when a case's request was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A response was received.
    Succeeded {
        /// The response body.
        body: String,
    },
    /// The request failed.
    Failed {
        /// Broad cause of the failure.
        kind: FailureKind,
        /// Rendered error, including its sources.
        message: String,
    },
}

/// Whether an outcome is the one a case expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The outcome matched the expectation.
    Pass,
    /// It did not.
    Fail,
}

/// Judges an outcome: a pass when it succeeded and was expected to, or
/// failed and was expected to.
pub fn classify(expected_ok: bool, outcome: &Outcome) -> Verdict {
    match (outcome, expected_ok) {
        (Outcome::Succeeded { .. }, true) | (Outcome::Failed { .. }, false) => Verdict::Pass,
        _ => Verdict::Fail,
    }
}

/// A case together with what happened when it was run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// The case that was run.
    pub case: TestCase,
    /// What the request did.
    pub outcome: Outcome,
}

impl Report {
    /// See [`classify`].
    pub fn verdict(&self) -> Verdict {
        classify(self.case.expected_ok, &self.outcome)
    }

    /// Writes the glyph line, and the body for an expected success.
    pub fn write(&self, out: &mut impl WriteColor) -> io::Result<()> {
        let TestCase {
            port, server_name, ..
        } = self.case;

        let glyph = match self.verdict() {
            Verdict::Pass => ('✔', Color::Green),
            Verdict::Fail => ('✘', Color::Red),
        };
        write!(out, "  ")?;
        out.set_color(ColorSpec::new().set_fg(Some(glyph.1)))?;
        write!(out, "{}", glyph.0)?;
        out.reset()?;
        write!(out, " Request to :{port} (as {server_name}) ")?;

        match (&self.outcome, self.case.expected_ok) {
            (Outcome::Succeeded { body }, true) => {
                writeln!(out, "succeeded")?;
                writeln!(out, "    - Response: {body}")
            }
            (Outcome::Succeeded { .. }, false) => {
                writeln!(out, "succeeded but was not expected to")
            }
            (Outcome::Failed { message, .. }, true) => writeln!(out, "failed: {message}"),
            (Outcome::Failed { message, .. }, false) => {
                writeln!(out, "failed as expected: {message}")
            }
        }
    }
}

/// Makes the single request for `case` using `suite`'s validation.
///
/// Never fails: any error, including building the client, becomes
/// [`Outcome::Failed`].
pub async fn run_case(suite: Suite, root: &Arc<RootCertificate>, case: &TestCase) -> Outcome {
    match request(suite, root, case).await {
        Ok(body) => Outcome::Succeeded { body },
        Err(err) => {
            let kind = failure_kind(err.as_ref());
            log::info!("{} failed ({:?}): {}", case.url(), kind, err);
            Outcome::Failed {
                kind,
                message: render_error(err.as_ref()),
            }
        }
    }
}

async fn request(
    suite: Suite,
    root: &Arc<RootCertificate>,
    case: &TestCase,
) -> Result<String, Box<dyn StdError + Send + Sync>> {
    let tls = suite.tls_config(root, case.server_name)?;
    let client = reqwest::Client::builder()
        .use_preconfigured_tls(tls)
        .build()
        .map_err(Error::from)?;

    let body = client.get(case.url()).send().await?.text().await?;
    Ok(body)
}

/// Runs every case of `suite` in order, writing a block per case to `out`.
pub async fn run_suite(
    suite: Suite,
    root: &Arc<RootCertificate>,
    cases: &[TestCase],
    out: &mut impl WriteColor,
) -> io::Result<Vec<Report>> {
    writeln!(out)?;
    writeln!(out, "{}", suite.heading())?;
    writeln!(out, "{}", "=".repeat(suite.heading().len()))?;
    writeln!(out)?;

    let mut reports = Vec::with_capacity(cases.len());
    for case in cases {
        writeln!(out, "Testing {}", case.name)?;
        let report = Report {
            case: *case,
            outcome: run_case(suite, root, case).await,
        };
        log::info!("{}: {}", case.name, report.verdict());
        report.write(out)?;
        writeln!(out)?;
        out.flush()?;
        reports.push(report);
    }

    Ok(reports)
}

fn sources<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |&err| {
        // `io::Error::source` skips over the error it wraps.
        if let Some(inner) = err.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            let inner: &(dyn StdError + 'static) = inner;
            return Some(inner);
        }
        err.source()
    })
}

fn failure_kind(err: &(dyn StdError + 'static)) -> FailureKind {
    let rejected = sources(err).any(|err| {
        matches!(
            err.downcast_ref::<rustls::Error>(),
            Some(rustls::Error::InvalidCertificate(_))
        )
    });

    if rejected {
        FailureKind::Certificate
    } else {
        FailureKind::Transport
    }
}

fn render_error(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = String::new();
    for err in sources(err) {
        let message = err.to_string();
        // Wrappers often repeat their cause's message verbatim.
        if rendered.ends_with(&message) {
            continue;
        }
        if !rendered.is_empty() {
            rendered.push_str(": ");
        }
        rendered.push_str(&message);
    }
    rendered
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        })
    }
}
