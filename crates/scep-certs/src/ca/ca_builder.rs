use std::time::SystemTime;

use bon::Builder;
use rsa::pkcs8::EncodePublicKey;
use snafu::{OptionExt, ResultExt, Snafu};
use time::{Date, Month, OffsetDateTime};
use tracing::{debug, instrument};
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{DecodePem, referenced::OwnedToRef},
    ext::pkix::AuthorityKeyIdentifier,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::{Time, Validity},
};

use super::{CaSubject, CertificateAuthority};
use crate::{
    ca::{CA_SERIAL_NUMBER, DEFAULT_CA_VALIDITY_YEARS, PEM_LINE_ENDING},
    keys::rsa::{DEFAULT_KEY_SIZE, SigningKey},
};

/// Defines all error variants which can occur when creating a CA
#[derive(Debug, Snafu)]
pub enum CreateCertificateAuthorityError {
    #[snafu(display("a validity of {years} years is out of range"))]
    ValidityOutOfRange { years: u32 },

    #[snafu(display("failed to calculate the validity end date"))]
    CalculateValidityEnd { source: time::error::ComponentRange },

    #[snafu(display("failed to parse validity"))]
    ParseValidity { source: x509_cert::der::Error },

    #[snafu(display("failed to build subject from {subject:?}"))]
    BuildSubject {
        source: x509_cert::der::Error,
        subject: String,
    },

    #[snafu(display("failed to create signing key pair"))]
    CreateSigningKeyPair { source: crate::keys::rsa::Error },

    #[snafu(display("failed to serialize public key as PEM"))]
    SerializePublicKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to decode SPKI from PEM"))]
    DecodeSpkiFromPem { source: x509_cert::der::Error },

    #[snafu(display("failed to parse AuthorityKeyIdentifier"))]
    ParseAuthorityKeyIdentifier { source: x509_cert::der::Error },

    #[snafu(display("failed to create certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add certificate extension"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },
}

/// This builder builds self-signed certificate authorities of type
/// [`CertificateAuthority`].
///
/// It has many default values, notably;
///
/// - A default validity of [`DEFAULT_CA_VALIDITY_YEARS`] calendar years
/// - A default subject, see [`CaSubject::default`]
/// - The serial number [`CA_SERIAL_NUMBER`]
/// - In case no `signing_key_pair` was provided, a fresh RSA keypair of
///   `key_size` bits (default [`DEFAULT_KEY_SIZE`]) will be created.
///
/// The CA contains the public half of the signing key pair and is signed by
/// the private half of said key.
///
/// ```no_run
/// use scep_certs::ca::{CaSubject, CertificateAuthority};
///
/// let ca = CertificateAuthority::builder()
///     .subject(CaSubject {
///         organization: "Example Inc.",
///         ..CaSubject::default()
///     })
///     .years(5)
///     .build()
///     .expect("failed to build CA");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateAuthorityBuilder<'a> {
    /// Subject of the certificate authority.
    #[builder(default)]
    subject: CaSubject<'a>,

    /// Validity/lifetime of the certificate in calendar years.
    ///
    /// If not specified the default of [`DEFAULT_CA_VALIDITY_YEARS`] will be used.
    #[builder(default = DEFAULT_CA_VALIDITY_YEARS)]
    years: u32,

    /// Size of the generated RSA key in bits, unused when a
    /// `signing_key_pair` is provided.
    #[builder(default = DEFAULT_KEY_SIZE)]
    key_size: usize,

    /// Cryptographic keypair used to sign the CA and all issued certificates.
    ///
    /// If not specified a random keypair will be generated.
    signing_key_pair: Option<SigningKey>,
}

impl<S> CertificateAuthorityBuilderBuilder<'_, S>
where
    S: certificate_authority_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<CertificateAuthority, CreateCertificateAuthorityError> {
        self.finish_builder().build()
    }
}

impl CertificateAuthorityBuilder<'_> {
    #[instrument(
        name = "build_certificate_authority",
        skip(self),
        fields(organization = self.subject.organization, years = self.years),
    )]
    pub fn build(self) -> Result<CertificateAuthority, CreateCertificateAuthorityError> {
        let now = OffsetDateTime::now_utc();
        let not_after = add_years(now, self.years)?;
        let validity = Validity {
            not_before: Time::try_from(SystemTime::from(now)).context(ParseValiditySnafu)?,
            not_after: Time::try_from(SystemTime::from(not_after)).context(ParseValiditySnafu)?,
        };

        let subject = self.subject.to_name().with_context(|_| BuildSubjectSnafu {
            subject: format!("{:?}", self.subject),
        })?;
        let signing_key_pair = match self.signing_key_pair {
            Some(signing_key_pair) => signing_key_pair,
            None => SigningKey::new(self.key_size).context(CreateSigningKeyPairSnafu)?,
        };

        let serial_number = SerialNumber::from(CA_SERIAL_NUMBER);

        let spki_pem = signing_key_pair
            .verifying_key()
            .to_public_key_pem(PEM_LINE_ENDING)
            .context(SerializePublicKeySnafu)?;

        let spki = SubjectPublicKeyInfoOwned::from_pem(spki_pem.as_bytes())
            .context(DecodeSpkiFromPemSnafu)?;

        // The root profile includes BasicConstraints (critical, CA = true),
        // the SubjectKeyIdentifier and KeyUsage with the KeyCertSign and
        // CRLSign bits. The AuthorityKeyIdentifier is added manually, using
        // the same 160-bit SHA-1 hash of the subject public key (RFC 5280,
        // section 4.2.1.2).
        let aki = AuthorityKeyIdentifier::try_from(spki.owned_to_ref())
            .context(ParseAuthorityKeyIdentifierSnafu)?;

        debug!(
            ca.subject = %subject,
            ca.not_after = %validity.not_after,
            ca.not_before = %validity.not_before,
            ca.serial = ?serial_number,
            ca.public_key.algorithm = "rsa",
            ca.public_key.size = signing_key_pair.key_size(),
            "creating certificate authority"
        );
        let signer = signing_key_pair.signing_key();
        let mut builder = CertificateBuilder::new(
            Profile::Root,
            serial_number,
            validity,
            subject,
            spki,
            signer,
        )
        .context(CreateCertificateBuilderSnafu)?;

        builder
            .add_extension(&aki)
            .context(AddCertificateExtensionSnafu)?;
        let certificate = builder
            .build::<rsa::pkcs1v15::Signature>()
            .context(BuildCertificateSnafu)?;

        Ok(CertificateAuthority::new(certificate, signing_key_pair))
    }
}

/// Adds calendar years to `start`. A start date of February 29 that lands in
/// a non-leap year rolls over to March 1.
fn add_years(
    start: OffsetDateTime,
    years: u32,
) -> Result<OffsetDateTime, CreateCertificateAuthorityError> {
    let date = start.date();
    let year = i32::try_from(years)
        .ok()
        .and_then(|years| date.year().checked_add(years))
        .context(ValidityOutOfRangeSnafu { years })?;

    let end = Date::from_calendar_date(year, date.month(), date.day())
        .or_else(|_| Date::from_calendar_date(year, Month::March, 1))
        .context(CalculateValidityEndSnafu)?;

    Ok(start.replace_date(end))
}
