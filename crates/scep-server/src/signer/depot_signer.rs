use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use const_oid::db::rfc4519::COMMON_NAME;
use scep_certs::{CertificateAuthority, CertificateBuilder, CertificateSigningRequest};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use x509_cert::{Certificate, name::Name};

use crate::{
    depot::Depot,
    secret::Secret,
    signer::{
        CsrSigner, DepotSnafu, IssueCertificateSnafu, LoadCaSnafu, MissingCaCertificateSnafu,
        RenewalNotAllowedSnafu, SignError,
    },
};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Used for the file name when the subject has no usable common name.
const UNKNOWN_NAME: &str = "unknown";

/// Issues certificates with the CA stored in a [`Depot`] and records them
/// there.
///
/// The CA is loaded for every request. A client which already holds a valid
/// certificate only gets a new one within the renewal window. The renewal
/// check and storing the new certificate happen under one lock, so concurrent
/// requests for the same subject cannot both pass the check.
pub struct DepotSigner {
    depot: Arc<dyn Depot>,

    /// Number of days before expiry from which on a certificate may be
    /// renewed. `0` allows renewal at any time.
    allow_renewal_days: u32,
    validity_days: u32,
    ca_passphrase: Secret,

    /// Held from the renewal check until the certificate is stored.
    issuance: Mutex<()>,
}

impl DepotSigner {
    pub fn new(
        depot: Arc<dyn Depot>,
        allow_renewal_days: u32,
        validity_days: u32,
        ca_passphrase: Secret,
    ) -> Self {
        Self {
            depot,
            allow_renewal_days,
            validity_days,
            ca_passphrase,
            issuance: Mutex::new(()),
        }
    }

    async fn load_ca(&self) -> Result<CertificateAuthority, SignError> {
        let (certificates, signing_key) = self
            .depot
            .ca(self.ca_passphrase.as_bytes())
            .await
            .context(LoadCaSnafu)?;
        let certificate = certificates
            .into_iter()
            .next()
            .context(MissingCaCertificateSnafu)?;

        Ok(CertificateAuthority::new(certificate, signing_key))
    }
}

#[async_trait]
impl CsrSigner for DepotSigner {
    #[instrument(name = "sign_with_depot", skip_all, fields(csr.subject = %csr.subject()))]
    async fn sign(&self, csr: &CertificateSigningRequest) -> Result<Certificate, SignError> {
        let ca = self.load_ca().await?;
        let _issuance = self.issuance.lock().await;

        let existing = self
            .depot
            .find_valid(csr.subject())
            .await
            .context(DepotSnafu)?;
        if let Some(existing) = existing {
            ensure!(
                self.supports_renewal(&existing),
                RenewalNotAllowedSnafu {
                    subject: csr.subject().to_string()
                }
            );
            debug!("renewing certificate");
        }

        let serial = self.depot.serial().await.context(DepotSnafu)?;
        let certificate = CertificateBuilder::builder()
            .csr(csr)
            .serial_number(serial)
            .validity_days(self.validity_days)
            .signed_by(&ca)
            .build()
            .context(IssueCertificateSnafu)?;

        self.depot
            .put(&file_name(csr.subject()), &certificate)
            .await
            .context(DepotSnafu)?;

        Ok(certificate)
    }

    fn supports_renewal(&self, existing: &Certificate) -> bool {
        if self.allow_renewal_days == 0 {
            return true;
        }

        let not_after = existing.tbs_certificate.validity.not_after.to_system_time();
        let window = Duration::from_secs(u64::from(self.allow_renewal_days) * SECONDS_PER_DAY);

        // Expired certificates fail the subtraction and can always be renewed
        match not_after.duration_since(SystemTime::now()) {
            Ok(remaining) => remaining <= window,
            Err(_) => true,
        }
    }
}

/// Derives a file system safe name from the common name of `subject`.
fn file_name(subject: &Name) -> String {
    let common_name = subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|attribute| attribute.oid == COMMON_NAME)
        .and_then(|attribute| std::str::from_utf8(attribute.value.value()).ok())
        .unwrap_or_default();

    let name: String = common_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() {
        UNKNOWN_NAME.to_owned()
    } else {
        name
    }
}
