//! External verification of certificate signing requests before they are
//! signed.
use std::sync::Arc;

use async_trait::async_trait;
use scep_certs::CertificateSigningRequest;
use snafu::{ResultExt, Snafu};
use x509_cert::Certificate;

use crate::signer::{CsrRejectedSnafu, CsrSigner, SignError, VerifierExecutionFailedSnafu};

mod executable;
pub use executable::ExecutableCsrVerifier;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the CSR verifier {path:?} is not an executable file"))]
    NotExecutable { path: std::path::PathBuf },

    #[snafu(display("failed to inspect the CSR verifier {path:?}"))]
    InspectExecutable {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to spawn the CSR verifier"))]
    Spawn { source: std::io::Error },

    #[snafu(display("failed to pass the CSR to the verifier"))]
    WriteRequest { source: std::io::Error },

    #[snafu(display("failed to wait for the CSR verifier"))]
    Wait { source: std::io::Error },

    #[snafu(display("the CSR verifier did not finish within {timeout:?}"))]
    TimedOut { timeout: std::time::Duration },

    #[snafu(display("the CSR verifier was terminated by a signal"))]
    Terminated,
}

/// The decision of a [`CsrVerifier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// Decides whether a DER encoded CSR may be signed.
///
/// An [`Err`] means that no decision could be made.
#[async_trait]
pub trait CsrVerifier: Send + Sync {
    async fn verify(&self, csr_der: &[u8]) -> Result<Verdict>;
}

/// Asks a [`CsrVerifier`] before delegating a request.
pub struct CsrVerifierMiddleware {
    verifier: Arc<dyn CsrVerifier>,
    next: Arc<dyn CsrSigner>,
}

impl CsrVerifierMiddleware {
    pub fn new(verifier: Arc<dyn CsrVerifier>, next: Arc<dyn CsrSigner>) -> Self {
        Self { verifier, next }
    }
}

#[async_trait]
impl CsrSigner for CsrVerifierMiddleware {
    async fn sign(
        &self,
        csr: &CertificateSigningRequest,
    ) -> std::result::Result<Certificate, SignError> {
        let verdict = self
            .verifier
            .verify(csr.raw())
            .await
            .context(VerifierExecutionFailedSnafu)?;

        match verdict {
            Verdict::Accepted => self.next.sign(csr).await,
            Verdict::Rejected => CsrRejectedSnafu.fail(),
        }
    }

    fn supports_renewal(&self, existing: &Certificate) -> bool {
        self.next.supports_renewal(existing)
    }
}
