use std::time::{Duration, SystemTime};

use bon::Builder;
use const_oid::db::rfc5280::ID_KP_CLIENT_AUTH;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::{
    Certificate,
    builder::{Builder, Profile},
    ext::pkix::ExtendedKeyUsage,
    serial_number::SerialNumber,
    time::{Time, Validity},
};

use crate::{
    ca::{CERTIFICATE_BACKDATE_SECONDS, CertificateAuthority, DEFAULT_CERTIFICATE_VALIDITY_DAYS},
    csr::{self, CertificateSigningRequest},
};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Defines all error variants which can occur when creating a certificate
#[derive(Debug, Snafu)]
pub enum CreateCertificateError {
    #[snafu(display("a validity of {days} days is out of range"))]
    ValidityOutOfRange { days: u32 },

    #[snafu(display("failed to parse validity"))]
    ParseValidity { source: x509_cert::der::Error },

    #[snafu(display("failed to read the requested SubjectAltName"))]
    ReadSubjectAltName { source: csr::Error },

    #[snafu(display("failed to create certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add certificate extension"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },

    #[snafu(display(
        "the generated certificate would outlive the CA, subject {subject:?}, \
        CA notAfter {ca_not_after:?}, CA notBefore {ca_not_before:?}, \
        cert notAfter {cert_not_after:?}, cert notBefore {cert_not_before:?}"
    ))]
    CertOutlivesCa {
        subject: String,
        ca_not_after: SystemTime,
        ca_not_before: SystemTime,
        cert_not_after: SystemTime,
        cert_not_before: SystemTime,
    },
}

/// This builder issues client certificates for a [`CertificateSigningRequest`],
/// signed by a [`CertificateAuthority`].
///
/// The subject and the public key are taken from the request, as is the
/// SubjectAltName if the client asked for one. The certificates can be used
/// for client authentication, because they include [`ID_KP_CLIENT_AUTH`] in the
/// extended key usage extension, and their key usage is limited to
/// digitalSignature.
///
/// The validity starts [`CERTIFICATE_BACKDATE_SECONDS`] in the past and lasts
/// `validity_days` (default [`DEFAULT_CERTIFICATE_VALIDITY_DAYS`]) from now.
///
/// ```no_run
/// use scep_certs::{
///     CertificateBuilder, CertificateSigningRequest, ca::CertificateAuthority,
///     keys::rsa::SigningKey,
/// };
///
/// let ca = CertificateAuthority::builder()
///     .build()
///     .expect("failed to build CA");
///
/// let client_key = SigningKey::new(2048).unwrap();
/// let csr = CertificateSigningRequest::builder()
///     .subject("CN=device-1".parse().unwrap())
///     .signing_key(&client_key)
///     .build()
///     .unwrap();
///
/// let certificate = CertificateBuilder::builder()
///     .csr(&csr)
///     .serial_number(2)
///     .signed_by(&ca)
///     .build()
///     .expect("failed to build certificate");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateBuilder<'a> {
    /// The request to issue a certificate for.
    csr: &'a CertificateSigningRequest,

    /// Serial numbers are handed out by the depot, they must be unique per CA.
    serial_number: u64,

    /// Validity/lifetime of the certificate in days.
    #[builder(default = DEFAULT_CERTIFICATE_VALIDITY_DAYS)]
    validity_days: u32,

    /// Mandatorily sign the certificate using the provided [`CertificateAuthority`].
    signed_by: &'a CertificateAuthority,
}

impl<S> CertificateBuilderBuilder<'_, S>
where
    S: certificate_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<Certificate, CreateCertificateError> {
        self.finish_builder().build()
    }
}

impl<'a> CertificateBuilder<'a> {
    pub fn builder() -> CertificateBuilderBuilder<'a> {
        Self::start_builder()
    }

    #[instrument(
        name = "build_certificate",
        skip(self),
        fields(subject = %self.csr.subject(), serial = self.serial_number),
    )]
    pub fn build(self) -> Result<Certificate, CreateCertificateError> {
        let now = SystemTime::now();
        let lifetime = Duration::from_secs(u64::from(self.validity_days) * SECONDS_PER_DAY);
        let cert_not_before = now
            .checked_sub(Duration::from_secs(CERTIFICATE_BACKDATE_SECONDS))
            .context(ValidityOutOfRangeSnafu {
                days: self.validity_days,
            })?;
        let cert_not_after = now.checked_add(lifetime).context(ValidityOutOfRangeSnafu {
            days: self.validity_days,
        })?;

        let ca_validity = self.signed_by.ca_cert().tbs_certificate.validity;
        let ca_not_after = ca_validity.not_after.to_system_time();
        let ca_not_before = ca_validity.not_before.to_system_time();

        let subject = self.csr.subject().clone();
        ensure!(ca_not_after >= cert_not_after, CertOutlivesCaSnafu {
            subject: subject.to_string(),
            ca_not_after,
            ca_not_before,
            cert_not_after,
            cert_not_before,
        });

        let validity = Validity {
            not_before: Time::try_from(cert_not_before).context(ParseValiditySnafu)?,
            not_after: Time::try_from(cert_not_after).context(ParseValiditySnafu)?,
        };
        let serial_number = SerialNumber::from(self.serial_number);
        let san = self
            .csr
            .subject_alt_name()
            .context(ReadSubjectAltNameSnafu)?
            .filter(|san| !san.0.is_empty());

        debug!(
            certificate.subject = %subject,
            certificate.not_after = %validity.not_after,
            certificate.not_before = %validity.not_before,
            certificate.serial = %serial_number,
            certificate.san = ?san,
            certificate.signed_by.issuer = %self.signed_by.subject_name(),
            "creating and signing certificate"
        );
        let signing_key = self.signed_by.signing_key().signing_key();
        let mut builder = x509_cert::builder::CertificateBuilder::new(
            Profile::Leaf {
                issuer: self.signed_by.subject_name().clone(),
                enable_key_agreement: false,
                enable_key_encipherment: false,
            },
            serial_number,
            validity,
            subject,
            self.csr.public_key().clone(),
            signing_key,
        )
        .context(CreateCertificateBuilderSnafu)?;

        builder
            .add_extension(&ExtendedKeyUsage(vec![ID_KP_CLIENT_AUTH]))
            .context(AddCertificateExtensionSnafu)?;

        if let Some(san) = san {
            builder
                .add_extension(&san)
                .context(AddCertificateExtensionSnafu)?;
        }

        builder
            .build::<rsa::pkcs1v15::Signature>()
            .context(BuildCertificateSnafu)
    }
}

#[cfg(test)]
mod tests {
    use const_oid::db::rfc5280::{ID_CE_EXT_KEY_USAGE, ID_CE_SUBJECT_ALT_NAME};
    use x509_cert::{
        certificate::TbsCertificateInner,
        der::Decode,
        ext::pkix::{SubjectAltName, name::GeneralName},
    };

    use super::*;
    use crate::{csr::tests::request, keys::rsa::SigningKey};

    fn ca(years: u32) -> CertificateAuthority {
        CertificateAuthority::builder()
            .key_size(1024)
            .years(years)
            .build()
            .expect("failed to build CA")
    }

    #[test]
    fn minimal_certificate() {
        let ca = ca(10);
        let key = SigningKey::new(1024).unwrap();
        let csr = request(&key, "device-1", None, &[]);

        let certificate = CertificateBuilder::builder()
            .csr(&csr)
            .serial_number(2)
            .signed_by(&ca)
            .build()
            .expect("failed to build certificate");

        let tbs = &certificate.tbs_certificate;
        assert_certificate_attributes(tbs, &csr, DEFAULT_CERTIFICATE_VALIDITY_DAYS);
        assert_eq!(&tbs.issuer, ca.subject_name());
        assert_eq!(tbs.serial_number, SerialNumber::from(2u64));
        assert!(extension_value(tbs, ID_CE_SUBJECT_ALT_NAME).is_none());
    }

    #[test]
    fn copies_requested_subject_alt_names() {
        let ca = ca(10);
        let key = SigningKey::new(1024).unwrap();
        let csr = request(&key, "device-2", Some("pw"), &["device-2.example.com"]);

        let certificate = CertificateBuilder::builder()
            .csr(&csr)
            .serial_number(7)
            .validity_days(30)
            .signed_by(&ca)
            .build()
            .expect("failed to build certificate");

        let tbs = &certificate.tbs_certificate;
        assert_certificate_attributes(tbs, &csr, 30);

        let san = SubjectAltName::from_der(
            extension_value(tbs, ID_CE_SUBJECT_ALT_NAME).expect("cert had no SAN extension"),
        )
        .expect("failed to parse SAN");
        let dns_names = san
            .0
            .iter()
            .filter_map(|name| match name {
                GeneralName::DnsName(dns_name) => Some(dns_name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(dns_names, ["device-2.example.com"]);
    }

    #[test]
    fn cert_outlives_ca() {
        let ca = ca(1);
        let key = SigningKey::new(1024).unwrap();
        let csr = request(&key, "device-3", None, &[]);

        let err = CertificateBuilder::builder()
            .csr(&csr)
            .serial_number(2)
            .validity_days(400)
            .signed_by(&ca)
            .build()
            .err()
            .expect("Certificate creation must error");
        assert!(matches!(err, CreateCertificateError::CertOutlivesCa { .. }));
    }

    fn extension_value<'a>(
        certificate: &'a TbsCertificateInner,
        oid: const_oid::ObjectIdentifier,
    ) -> Option<&'a [u8]> {
        certificate
            .extensions
            .as_ref()?
            .iter()
            .find(|ext| ext.extn_id == oid)
            .map(|ext| ext.extn_value.as_bytes())
    }

    fn assert_certificate_attributes(
        certificate: &TbsCertificateInner,
        csr: &CertificateSigningRequest,
        validity_days: u32,
    ) {
        assert_eq!(&certificate.subject, csr.subject());
        assert_eq!(&certificate.subject_public_key_info, csr.public_key());

        let eku = ExtendedKeyUsage::from_der(
            extension_value(certificate, ID_CE_EXT_KEY_USAGE).expect("cert had no EKU extension"),
        )
        .expect("failed to parse EKU");
        assert_eq!(eku.0, [ID_KP_CLIENT_AUTH]);

        let not_before = certificate.validity.not_before.to_system_time();
        let not_after = certificate.validity.not_after.to_system_time();
        assert_eq!(
            not_after
                .duration_since(not_before)
                .expect("Failed to calculate duration between notBefore and notAfter"),
            Duration::from_secs(
                u64::from(validity_days) * SECONDS_PER_DAY + CERTIFICATE_BACKDATE_SECONDS
            )
        );
    }
}
