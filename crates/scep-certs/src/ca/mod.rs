//! Contains types and functions to generate self-signed certificate
//! authorities (CAs) and to work with their certificate and signing key.
use std::time::SystemTime;

use const_oid::{
    ObjectIdentifier,
    db::rfc4519::{COMMON_NAME, COUNTRY_NAME, ORGANIZATION_NAME, ORGANIZATIONAL_UNIT_NAME},
};
use rsa::pkcs1::EncodeRsaPublicKey;
use x509_cert::{
    Certificate,
    attr::AttributeTypeAndValue,
    der::{Any, Encode, EncodePem, Tag, asn1::SetOfVec},
    name::{Name, RdnSequence, RelativeDistinguishedName},
};

use crate::keys::rsa::SigningKey;

mod ca_builder;
mod consts;
pub use ca_builder::*;
pub use consts::*;

/// The subject fields of a CA certificate.
///
/// Empty fields are left out of the resulting [`Name`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaSubject<'a> {
    pub organization: &'a str,
    pub organizational_unit: &'a str,
    pub country: &'a str,
    pub common_name: Option<&'a str>,
}

impl Default for CaSubject<'_> {
    fn default() -> Self {
        Self {
            organization: DEFAULT_CA_ORGANIZATION,
            organizational_unit: DEFAULT_CA_ORGANIZATIONAL_UNIT,
            country: DEFAULT_CA_COUNTRY,
            common_name: None,
        }
    }
}

impl CaSubject<'_> {
    /// Builds the distinguished name `C=<country>, O=<organization>,
    /// OU=<organizational unit>, CN=<common name>`.
    ///
    /// The country is encoded as `PrintableString`, all other attributes as
    /// `UTF8String`.
    pub fn to_name(&self) -> Result<Name, x509_cert::der::Error> {
        let attributes: [(ObjectIdentifier, Tag, &str); 4] = [
            (COUNTRY_NAME, Tag::PrintableString, self.country),
            (ORGANIZATION_NAME, Tag::Utf8String, self.organization),
            (
                ORGANIZATIONAL_UNIT_NAME,
                Tag::Utf8String,
                self.organizational_unit,
            ),
            (COMMON_NAME, Tag::Utf8String, self.common_name.unwrap_or("")),
        ];

        let mut rdns = Vec::with_capacity(attributes.len());
        for (oid, tag, value) in attributes {
            if value.is_empty() {
                continue;
            }

            let attribute = AttributeTypeAndValue {
                oid,
                value: Any::new(tag, value.as_bytes())?,
            };
            rdns.push(RelativeDistinguishedName(SetOfVec::try_from(vec![
                attribute,
            ])?));
        }

        Ok(RdnSequence(rdns))
    }
}

/// A certificate authority (CA) which is used to sign client certificates.
///
/// Use [`CertificateAuthorityBuilder`] to create new CAs, or
/// [`CertificateAuthority::new`] to assemble one from existing material.
#[derive(Debug)]
pub struct CertificateAuthority {
    certificate: Certificate,
    signing_key: SigningKey,
}

impl CertificateAuthority {
    pub fn new(certificate: Certificate, signing_key: SigningKey) -> Self {
        Self {
            certificate,
            signing_key,
        }
    }

    /// Use this function in combination with [`CertificateAuthorityBuilder`] to create new CAs.
    pub fn builder<'a>() -> CertificateAuthorityBuilderBuilder<'a> {
        CertificateAuthorityBuilder::start_builder()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn ca_cert(&self) -> &Certificate {
        &self.certificate
    }

    /// The subject of the CA, which is the issuer of every certificate it signs.
    pub fn subject_name(&self) -> &Name {
        &self.ca_cert().tbs_certificate.subject
    }

    pub fn not_after(&self) -> SystemTime {
        self.ca_cert()
            .tbs_certificate
            .validity
            .not_after
            .to_system_time()
    }

    pub fn to_certificate_der(&self) -> Result<Vec<u8>, x509_cert::der::Error> {
        self.certificate.to_der()
    }

    pub fn to_certificate_pem(&self) -> Result<String, x509_cert::der::Error> {
        self.certificate.to_pem(PEM_LINE_ENDING)
    }

    /// Returns `true` if the public key in the certificate belongs to the
    /// signing key.
    pub fn key_matches_certificate(&self) -> bool {
        let Ok(public_key) = self.signing_key.verifying_key().as_ref().to_pkcs1_der() else {
            return false;
        };

        self.certificate
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes()
            == public_key.as_bytes()
    }

    pub fn into_parts(self) -> (Certificate, SigningKey) {
        (self.certificate, self.signing_key)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns the raw value of the first attribute with the given `oid`.
    pub(crate) fn attribute_value(name: &Name, oid: ObjectIdentifier) -> Option<&[u8]> {
        name.0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .find(|attribute| attribute.oid == oid)
            .map(|attribute| attribute.value.value())
    }

    #[test]
    fn default_subject() {
        let name = CaSubject::default().to_name().expect("failed to build name");

        assert_eq!(name.0.len(), 3);
        assert_eq!(attribute_value(&name, COUNTRY_NAME), Some(&b"US"[..]));
        assert_eq!(attribute_value(&name, ORGANIZATION_NAME), Some(&b"scep-ca"[..]));
        assert_eq!(
            attribute_value(&name, ORGANIZATIONAL_UNIT_NAME),
            Some(&b"SCEP CA"[..])
        );
        assert_eq!(attribute_value(&name, COMMON_NAME), None);
    }

    #[test]
    fn detects_foreign_keys() {
        let ca = CertificateAuthority::builder()
            .key_size(1024)
            .build()
            .expect("failed to build CA");
        assert!(ca.key_matches_certificate());

        let (certificate, _) = ca.into_parts();
        let foreign_key = SigningKey::new(1024).expect("failed to create key");
        let mismatched = CertificateAuthority::new(certificate, foreign_key);
        assert!(!mismatched.key_matches_certificate());
    }

    #[test]
    fn subject_skips_empty_fields() {
        let subject = CaSubject {
            organization: "Test",
            organizational_unit: "",
            country: "",
            common_name: Some("Test Root"),
        };
        let name = subject.to_name().expect("failed to build name");

        assert_eq!(name.0.len(), 2);
        assert_eq!(attribute_value(&name, ORGANIZATION_NAME), Some(&b"Test"[..]));
        assert_eq!(attribute_value(&name, COMMON_NAME), Some(&b"Test Root"[..]));
        assert_eq!(attribute_value(&name, COUNTRY_NAME), None);
    }
}
