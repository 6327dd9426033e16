use std::sync::Arc;

use async_trait::async_trait;
use scep_certs::CertificateSigningRequest;
use snafu::{ResultExt, ensure};
use subtle::ConstantTimeEq;
use tracing::debug;
use x509_cert::Certificate;

use crate::{
    secret::Secret,
    signer::{ChallengeMismatchSnafu, CsrSigner, ReadChallengeSnafu, SignError},
};

/// Refuses requests whose challenge password differs from the configured
/// one. A request without a challenge password carries the empty password.
pub struct ChallengeMiddleware {
    challenge: Secret,
    next: Arc<dyn CsrSigner>,
}

impl ChallengeMiddleware {
    pub fn new(challenge: Secret, next: Arc<dyn CsrSigner>) -> Self {
        Self { challenge, next }
    }
}

#[async_trait]
impl CsrSigner for ChallengeMiddleware {
    async fn sign(&self, csr: &CertificateSigningRequest) -> Result<Certificate, SignError> {
        let presented = csr
            .challenge_password()
            .context(ReadChallengeSnafu)?
            .unwrap_or_default();

        let matches: bool = presented
            .as_bytes()
            .ct_eq(self.challenge.as_bytes())
            .into();
        if !matches {
            debug!(csr.subject = %csr.subject(), "challenge password mismatch");
        }
        ensure!(matches, ChallengeMismatchSnafu);

        self.next.sign(csr).await
    }

    fn supports_renewal(&self, existing: &Certificate) -> bool {
        self.next.supports_renewal(existing)
    }
}
