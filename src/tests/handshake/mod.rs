//! End-to-end runs of the request table against in-process TLS servers.
//!
//! Each server listens on an ephemeral port on `127.0.0.1` and answers any
//! request with `Hello from :{port}`, like the servers of the real setup.

use super::ensure_global_state;
use super::pki::{self, Identity, ALLOWED, NOT_ALLOWED};
use crate::runner::{self, FailureKind, Outcome, Suite, TestCase, Verdict};
use std::sync::Arc;
use termcolor::Buffer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

async fn serve(identity: &Identity) -> u16 {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(identity.chain.clone(), identity.private_key())
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // Most tests expect the client to abort the handshake.
                let Ok(mut stream) = acceptor.accept(stream).await else {
                    return;
                };

                let mut request = Vec::new();
                let mut buf = [0; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let body = format!("Hello from :{port}");
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    port
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// The four combinations of the real setup, each behind its own server.
async fn conformance_cases() -> [TestCase; 4] {
    let fixtures = pki::fixtures();
    [
        TestCase {
            name: "domain_correct_ou_correct",
            port: serve(&fixtures.allowed).await,
            server_name: ALLOWED,
            expected_ok: true,
        },
        TestCase {
            name: "domain_incorrect_ou_correct",
            port: serve(&fixtures.not_allowed).await,
            server_name: ALLOWED,
            expected_ok: false,
        },
        TestCase {
            name: "domain_correct_ou_incorrect",
            port: serve(&fixtures.untrusted_allowed).await,
            server_name: ALLOWED,
            expected_ok: false,
        },
        TestCase {
            name: "domain_incorrect_ou_incorrect",
            port: serve(&fixtures.untrusted_not_allowed).await,
            server_name: NOT_ALLOWED,
            expected_ok: false,
        },
    ]
}

async fn assert_suite_conforms(suite: Suite) {
    ensure_global_state();
    let root = pki::fixtures().trusted();
    let cases = conformance_cases().await;

    let mut out = Buffer::no_color();
    let reports = runner::run_suite(suite, &root, &cases, &mut out)
        .await
        .unwrap();

    assert_eq!(reports.len(), cases.len());
    for report in &reports {
        assert_eq!(report.verdict(), Verdict::Pass, "{:?}", report);
    }

    assert_eq!(
        reports[0].outcome,
        Outcome::Succeeded {
            body: format!("Hello from :{}", cases[0].port)
        }
    );
    for report in &reports[1..] {
        assert!(
            matches!(
                report.outcome,
                Outcome::Failed {
                    kind: FailureKind::Certificate,
                    ..
                }
            ),
            "{:?}",
            report
        );
    }
}

#[tokio::test]
async fn custom_suite_conforms() {
    assert_suite_conforms(Suite::Custom).await;
}

#[tokio::test]
async fn standard_suite_conforms() {
    assert_suite_conforms(Suite::Standard).await;
}

/// The real setup issues its server certificates from an intermediate that
/// permits a single organizational unit.
#[tokio::test]
async fn unit_constrained_servers() {
    ensure_global_state();
    let fixtures = pki::fixtures();
    let root = fixtures.trusted();
    let cases = [
        TestCase {
            name: "domain_correct_ou_correct",
            port: serve(&fixtures.unit_permitted).await,
            server_name: ALLOWED,
            expected_ok: true,
        },
        TestCase {
            name: "domain_correct_ou_incorrect",
            port: serve(&fixtures.unit_not_permitted).await,
            server_name: ALLOWED,
            expected_ok: false,
        },
    ];

    let mut out = Buffer::no_color();
    let custom = runner::run_suite(Suite::Custom, &root, &cases, &mut out)
        .await
        .unwrap();
    assert_eq!(
        custom.iter().map(|r| r.verdict()).collect::<Vec<_>>(),
        [Verdict::Pass, Verdict::Pass]
    );
    assert_eq!(
        custom[0].outcome,
        Outcome::Succeeded {
            body: format!("Hello from :{}", cases[0].port)
        }
    );

    // The stock verifier refuses any `directoryName` constraint.
    let standard = runner::run_suite(Suite::Standard, &root, &cases, &mut out)
        .await
        .unwrap();
    assert_eq!(
        standard.iter().map(|r| r.verdict()).collect::<Vec<_>>(),
        [Verdict::Fail, Verdict::Pass]
    );

    for report in custom[1..].iter().chain(&standard) {
        assert!(
            matches!(
                report.outcome,
                Outcome::Failed {
                    kind: FailureKind::Certificate,
                    ..
                }
            ),
            "{:?}",
            report
        );
    }
}

#[tokio::test]
async fn mixed_case_certificate_is_accepted_by_custom_suite() {
    let root = pki::fixtures().trusted();
    let case = TestCase {
        name: "mixed_case",
        port: serve(&pki::fixtures().mixed_case).await,
        server_name: ALLOWED,
        expected_ok: true,
    };

    let outcome = runner::run_case(Suite::Custom, &root, &case).await;
    assert!(matches!(outcome, Outcome::Succeeded { .. }), "{:?}", outcome);
}

#[tokio::test]
async fn unexpected_success_fails() {
    let root = pki::fixtures().trusted();
    let case = TestCase {
        name: "expects_rejection",
        port: serve(&pki::fixtures().allowed).await,
        server_name: ALLOWED,
        expected_ok: false,
    };

    let mut out = Buffer::no_color();
    let reports = runner::run_suite(Suite::Custom, &root, &[case], &mut out)
        .await
        .unwrap();

    assert_eq!(reports[0].verdict(), Verdict::Fail);
    let printed = String::from_utf8(out.into_inner()).unwrap();
    assert!(printed.contains("Testing expects_rejection\n"));
    assert!(printed.contains("succeeded but was not expected to"));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_failure() {
    let root = pki::fixtures().trusted();
    let case = TestCase {
        name: "nobody_home",
        port: closed_port().await,
        server_name: ALLOWED,
        expected_ok: true,
    };

    let outcome = runner::run_case(Suite::Custom, &root, &case).await;
    match outcome {
        Outcome::Failed { kind, message } => {
            assert_eq!(kind, FailureKind::Transport);
            assert!(!message.is_empty());
        }
        other => panic!("request unexpectedly succeeded: {:?}", other),
    }
}

#[tokio::test]
async fn suite_output_layout() {
    let root = pki::fixtures().trusted();
    let case = TestCase {
        name: "domain_correct_ou_correct",
        port: serve(&pki::fixtures().allowed).await,
        server_name: ALLOWED,
        expected_ok: true,
    };

    let mut out = Buffer::no_color();
    runner::run_suite(Suite::Custom, &root, &[case], &mut out)
        .await
        .unwrap();

    let expected = format!(
        "\n\
         Testing using the custom TLS client\n\
         ===================================\n\
         \n\
         Testing domain_correct_ou_correct\n  \
         ✔ Request to :{port} (as {ALLOWED}) succeeded\n    \
         - Response: Hello from :{port}\n\
         \n",
        port = case.port
    );
    assert_eq!(String::from_utf8(out.into_inner()).unwrap(), expected);
}
