use rustls_anchor_conformance::runner::{self, Suite, TEST_CASES};
use rustls_anchor_conformance::RootCertificate;
use std::sync::Arc;
use termcolor::{ColorChoice, StandardStream};

const ROOT_CERTIFICATE_PATH: &str = "ca/root/root.cert.pem";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let root = Arc::new(RootCertificate::from_pem_file(ROOT_CERTIFICATE_PATH)?);
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);

    // Expectation mismatches are only reported; they don't change the exit code.
    for suite in Suite::ALL {
        runner::run_suite(suite, &root, &TEST_CASES, &mut stdout).await?;
    }

    Ok(())
}
