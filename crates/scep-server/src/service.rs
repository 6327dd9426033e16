//! The enrollment service, which binds the signer chain and the CA to the
//! operations exposed over HTTP.
use std::sync::Arc;

use scep_certs::{CertificateAuthority, CertificateSigningRequest, csr};
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::der::Encode;

use crate::signer::{CsrSigner, SignError};

/// The capabilities announced by `GetCACaps`, one per line.
pub const CA_CAPABILITIES: &[&str] = &["Renewal", "SHA-256", "POSTPKIOperation"];

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the CA key does not belong to the CA certificate"))]
    KeyMismatch,

    #[snafu(display("failed to parse the certificate signing request"))]
    ParseRequest { source: csr::Error },

    #[snafu(display("failed to sign the certificate signing request"))]
    Sign { source: SignError },

    #[snafu(display("failed to encode the certificate"))]
    Encode { source: x509_cert::der::Error },
}

impl Error {
    /// Returns `true` if the request itself is at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::ParseRequest { .. } => true,
            Self::Sign { source } => source.is_policy_violation(),
            Self::KeyMismatch | Self::Encode { .. } => false,
        }
    }
}

/// Handles the SCEP operations.
pub struct Service {
    ca: CertificateAuthority,
    signer: Arc<dyn CsrSigner>,
}

impl Service {
    /// Fails if the key of `ca` doesn't match its certificate.
    pub fn new(ca: CertificateAuthority, signer: Arc<dyn CsrSigner>) -> Result<Self> {
        ensure!(ca.key_matches_certificate(), KeyMismatchSnafu);

        Ok(Self { ca, signer })
    }

    /// `GetCACaps`
    pub fn get_ca_caps(&self) -> String {
        CA_CAPABILITIES.join("\n")
    }

    /// `GetCACert`, the DER encoded CA certificate.
    pub fn get_ca_cert(&self) -> Result<Vec<u8>> {
        self.ca.to_certificate_der().context(EncodeSnafu)
    }

    /// `PKIOperation`, signs the DER encoded CSR in `body` and returns the DER
    /// encoded certificate.
    #[instrument(name = "pki_operation", skip_all, fields(request.size = body.len()))]
    pub async fn pki_operation(&self, body: &[u8]) -> Result<Vec<u8>> {
        let csr = CertificateSigningRequest::from_der(body).context(ParseRequestSnafu)?;
        let certificate = self.signer.sign(&csr).await.context(SignSnafu)?;

        certificate.to_der().context(EncodeSnafu)
    }
}
