//! The signer capability and the decorators which add policies to it.
//!
//! A [`DepotSigner`] issues the certificates, every other [`CsrSigner`] in
//! this module wraps another signer and either refuses the request or
//! delegates it. The chain is assembled by [`Pipeline`](crate::Pipeline).
use async_trait::async_trait;
use scep_certs::{CertificateSigningRequest, cert_builder::CreateCertificateError, csr};
use snafu::Snafu;
use strum::IntoStaticStr;
use x509_cert::Certificate;

use crate::depot;

mod challenge;
mod depot_signer;
mod logging;
pub mod verifier;

pub use challenge::ChallengeMiddleware;
pub use depot_signer::DepotSigner;
pub use logging::LoggingMiddleware;
pub use verifier::{CsrVerifier, CsrVerifierMiddleware, ExecutableCsrVerifier, Verdict};

#[derive(Debug, Snafu, IntoStaticStr)]
#[snafu(visibility(pub(crate)))]
#[strum(serialize_all = "snake_case")]
pub enum SignError {
    #[snafu(display("the challenge password does not match"))]
    ChallengeMismatch,

    #[snafu(display("the CSR verifier rejected the request"))]
    CsrRejected,

    #[snafu(display("failed to run the CSR verifier"))]
    VerifierExecutionFailed { source: verifier::Error },

    #[snafu(display(
        "a valid certificate for {subject:?} exists and is not within the renewal window"
    ))]
    RenewalNotAllowed { subject: String },

    #[snafu(display("failed to read the challenge password from the CSR"))]
    ReadChallenge { source: csr::Error },

    #[snafu(display("failed to load the CA from the depot"))]
    LoadCa { source: depot::Error },

    #[snafu(display("the depot contains no CA certificate"))]
    MissingCaCertificate,

    #[snafu(display("failed to issue the certificate"))]
    IssueCertificate { source: CreateCertificateError },

    #[snafu(display("depot operation failed"))]
    Depot { source: depot::Error },
}

impl SignError {
    /// Returns `true` if the request was refused by a policy, as opposed to
    /// failing because of a problem on the server side.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::ChallengeMismatch | Self::CsrRejected | Self::RenewalNotAllowed { .. }
        )
    }

    /// A short, stable name of the error variant, used in log events.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

/// Signs certificate signing requests.
///
/// Implementations are invoked concurrently, one call per request.
#[async_trait]
pub trait CsrSigner: Send + Sync {
    async fn sign(&self, csr: &CertificateSigningRequest) -> Result<Certificate, SignError>;

    /// Returns `true` if a client holding `existing` may already request its
    /// successor.
    fn supports_renewal(&self, existing: &Certificate) -> bool;
}
