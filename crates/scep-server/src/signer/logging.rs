use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use scep_certs::CertificateSigningRequest;
use tracing::{info, warn};
use x509_cert::Certificate;

use crate::signer::{CsrSigner, SignError};

/// Emits one event per signing attempt. The outcome of the wrapped signer is
/// passed through unchanged.
pub struct LoggingMiddleware {
    next: Arc<dyn CsrSigner>,
}

impl LoggingMiddleware {
    pub fn new(next: Arc<dyn CsrSigner>) -> Self {
        Self { next }
    }
}

#[async_trait]
impl CsrSigner for LoggingMiddleware {
    async fn sign(&self, csr: &CertificateSigningRequest) -> Result<Certificate, SignError> {
        let start = Instant::now();
        let result = self.next.sign(csr).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(certificate) => {
                let serial = certificate.tbs_certificate.serial_number.as_bytes();
                info!(
                    csr.subject = %csr.subject(),
                    certificate.serial = %hex::encode_upper(serial),
                    elapsed = ?elapsed,
                    "signed certificate"
                );
            }
            Err(err) => warn!(
                csr.subject = %csr.subject(),
                error.kind = err.kind(),
                error = err as &dyn std::error::Error,
                elapsed = ?elapsed,
                "failed to sign certificate"
            ),
        }

        result
    }

    fn supports_renewal(&self, existing: &Certificate) -> bool {
        self.next.supports_renewal(existing)
    }
}
