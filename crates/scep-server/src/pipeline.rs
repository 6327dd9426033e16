//! Assembles the signer chain from the configured policies.
//!
//! The chain always starts with a [`DepotSigner`] and ends with the
//! [`LoggingMiddleware`]. In between, the optional layers are added in a
//! fixed order, so that a request passes them in this order:
//!
//! 1. logging
//! 2. CSR verification, if a verifier is configured
//! 3. challenge password check, if a challenge password is configured
//! 4. signing
use std::sync::Arc;

use bon::Builder;
use scep_certs::CertificateAuthority;
use snafu::{OptionExt, ResultExt, Snafu};
use strum::Display;
use tracing::{info, instrument};

use crate::{
    constants::{DEFAULT_ALLOW_RENEWAL_DAYS, DEFAULT_CERTIFICATE_VALIDITY_DAYS},
    depot::{self, Depot},
    secret::Secret,
    signer::{
        ChallengeMiddleware, CsrSigner, CsrVerifier, CsrVerifierMiddleware, DepotSigner,
        LoggingMiddleware,
    },
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load the CA from the depot"))]
    LoadCa { source: depot::Error },

    #[snafu(display("the depot contains no CA certificate"))]
    MissingCaCertificate,
}

/// A decorator around the [`DepotSigner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Layer {
    Challenge,
    CsrVerifier,
    Logging,
}

/// The assembled signer chain together with the CA it signs with.
pub struct Pipeline {
    signer: Arc<dyn CsrSigner>,

    /// Innermost first.
    layers: Vec<Layer>,
    ca: CertificateAuthority,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilderBuilder {
        PipelineBuilder::start_builder()
    }

    /// The outermost signer of the chain.
    pub fn signer(&self) -> Arc<dyn CsrSigner> {
        self.signer.clone()
    }

    /// The decorators around the [`DepotSigner`], innermost first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of decorators around the [`DepotSigner`].
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn ca(&self) -> &CertificateAuthority {
        &self.ca
    }

    pub fn into_parts(self) -> (Arc<dyn CsrSigner>, CertificateAuthority) {
        (self.signer, self.ca)
    }
}

/// Configures the signer chain. An empty `challenge` leaves out the challenge
/// layer, a missing `verifier` the CSR verification layer.
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct PipelineBuilder {
    depot: Arc<dyn Depot>,

    /// `0` allows renewal at any time.
    #[builder(default = DEFAULT_ALLOW_RENEWAL_DAYS)]
    allow_renewal_days: u32,

    #[builder(default = DEFAULT_CERTIFICATE_VALIDITY_DAYS)]
    validity_days: u32,

    #[builder(default)]
    ca_passphrase: Secret,

    #[builder(default)]
    challenge: Secret,

    verifier: Option<Arc<dyn CsrVerifier>>,
}

impl<S> PipelineBuilderBuilder<S>
where
    S: pipeline_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub async fn build(self) -> Result<Pipeline> {
        self.finish_builder().build().await
    }
}

impl PipelineBuilder {
    /// Loads the CA, which must be present and decryptable, and assembles
    /// the chain.
    #[instrument(name = "build_signer_pipeline", skip(self), fields(
        allow_renewal_days = self.allow_renewal_days,
        validity_days = self.validity_days,
    ))]
    pub async fn build(self) -> Result<Pipeline> {
        let (certificates, signing_key) = self
            .depot
            .ca(self.ca_passphrase.as_bytes())
            .await
            .context(LoadCaSnafu)?;
        let certificate = certificates
            .into_iter()
            .next()
            .context(MissingCaCertificateSnafu)?;
        let ca = CertificateAuthority::new(certificate, signing_key);

        let mut layers = Vec::new();
        let mut signer: Arc<dyn CsrSigner> = Arc::new(DepotSigner::new(
            self.depot,
            self.allow_renewal_days,
            self.validity_days,
            self.ca_passphrase,
        ));

        if !self.challenge.is_empty() {
            signer = Arc::new(ChallengeMiddleware::new(self.challenge, signer));
            layers.push(Layer::Challenge);
        }

        if let Some(verifier) = self.verifier {
            signer = Arc::new(CsrVerifierMiddleware::new(verifier, signer));
            layers.push(Layer::CsrVerifier);
        }

        signer = Arc::new(LoggingMiddleware::new(signer));
        layers.push(Layer::Logging);

        info!(
            ca.subject = %ca.subject_name(),
            pipeline.layers = ?layers,
            "assembled signer pipeline"
        );

        Ok(Pipeline { signer, layers, ca })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use scep_certs::{bootstrap, ca::CaSubject};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        depot::FileDepot,
        signer::{SignError, Verdict, tests::request, verifier::tests::FixedVerifier},
    };

    const PASSPHRASE: &str = "ca-secret";

    fn bootstrapped_depot() -> (TempDir, Arc<dyn Depot>) {
        let dir = TempDir::new().unwrap();
        bootstrap::init(
            dir.path(),
            1024,
            PASSPHRASE.as_bytes(),
            1,
            &CaSubject::default(),
        )
        .unwrap();
        let depot: Arc<dyn Depot> = Arc::new(FileDepot::new(dir.path()));

        (dir, depot)
    }

    #[tokio::test]
    async fn bare_chain_only_logs() {
        let (_dir, depot) = bootstrapped_depot();
        let pipeline = Pipeline::builder()
            .depot(depot)
            .ca_passphrase(Secret::new(PASSPHRASE))
            .build()
            .await
            .unwrap();

        assert_eq!(pipeline.depth(), 1);
        assert_eq!(pipeline.layers(), [Layer::Logging]);

        pipeline
            .signer()
            .sign(&request("device-1", None))
            .await
            .unwrap();
    }

    #[rstest]
    #[case(false, None, &[Layer::Logging])]
    #[case(true, None, &[Layer::Challenge, Layer::Logging])]
    #[case(false, Some(Verdict::Accepted), &[Layer::CsrVerifier, Layer::Logging])]
    #[case(true, Some(Verdict::Accepted), &[Layer::Challenge, Layer::CsrVerifier, Layer::Logging])]
    #[tokio::test]
    async fn layers_follow_configuration(
        #[case] with_challenge: bool,
        #[case] verdict: Option<Verdict>,
        #[case] expected: &[Layer],
    ) {
        let (_dir, depot) = bootstrapped_depot();
        let challenge = if with_challenge {
            Secret::new("challenge")
        } else {
            Secret::default()
        };
        let verifier =
            verdict.map(|verdict| Arc::new(FixedVerifier(Some(verdict))) as Arc<dyn CsrVerifier>);

        let pipeline = Pipeline::builder()
            .depot(depot)
            .ca_passphrase(Secret::new(PASSPHRASE))
            .challenge(challenge)
            .maybe_verifier(verifier)
            .build()
            .await
            .unwrap();

        assert_eq!(pipeline.layers(), expected);
    }

    #[rstest]
    #[case::matching_challenge(Some("challenge"))]
    #[case::wrong_challenge(Some("wrong"))]
    #[case::no_challenge(None)]
    #[tokio::test]
    async fn verifier_runs_before_challenge(#[case] presented: Option<&str>) {
        let (_dir, depot) = bootstrapped_depot();
        let pipeline = Pipeline::builder()
            .depot(depot)
            .ca_passphrase(Secret::new(PASSPHRASE))
            .challenge(Secret::new("challenge"))
            .verifier(Arc::new(FixedVerifier(Some(Verdict::Rejected))))
            .build()
            .await
            .unwrap();

        let err = pipeline
            .signer()
            .sign(&request("device-1", presented))
            .await
            .expect_err("the verifier rejects everything");
        assert!(matches!(err, SignError::CsrRejected));
    }

    #[rstest]
    #[case::matching_challenge(Some("challenge"), true)]
    #[case::wrong_challenge(Some("wrong"), false)]
    #[case::no_challenge(None, false)]
    #[tokio::test]
    async fn challenge_is_enforced(#[case] presented: Option<&str>, #[case] signed: bool) {
        let (_dir, depot) = bootstrapped_depot();
        let pipeline = Pipeline::builder()
            .depot(depot)
            .ca_passphrase(Secret::new(PASSPHRASE))
            .challenge(Secret::new("challenge"))
            .verifier(Arc::new(FixedVerifier(Some(Verdict::Accepted))))
            .build()
            .await
            .unwrap();

        let result = pipeline
            .signer()
            .sign(&request("device-1", presented))
            .await;
        match result {
            Ok(_) => assert!(signed),
            Err(err) => {
                assert!(!signed);
                assert!(matches!(err, SignError::ChallengeMismatch));
            }
        }
    }

    #[tokio::test]
    async fn empty_depot_is_fatal() {
        let dir = TempDir::new().unwrap();
        let result = Pipeline::builder()
            .depot(Arc::new(FileDepot::new(dir.path())))
            .build()
            .await;

        assert!(matches!(result, Err(Error::LoadCa { .. })));
    }

    #[tokio::test]
    async fn wrong_passphrase_is_fatal() {
        let (_dir, depot) = bootstrapped_depot();
        let result = Pipeline::builder()
            .depot(depot)
            .ca_passphrase(Secret::new("wrong"))
            .build()
            .await;

        assert!(matches!(result, Err(Error::LoadCa { .. })));
    }

    #[tokio::test]
    async fn ca_without_certificates_is_fatal() {
        let (dir, depot) = bootstrapped_depot();
        let ca_pem = dir.path().join(bootstrap::CA_CERTIFICATE_FILE_NAME);
        std::fs::remove_file(&ca_pem).unwrap();
        std::fs::write(&ca_pem, "\n").unwrap();

        let result = Pipeline::builder()
            .depot(depot)
            .ca_passphrase(Secret::new(PASSPHRASE))
            .build()
            .await;

        assert!(matches!(result, Err(Error::MissingCaCertificate)));
    }
}
