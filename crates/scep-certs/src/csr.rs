//! PKCS#10 certificate signing requests (RFC 2986), as they are sent by SCEP
//! clients.
//!
//! Two PKCS#9 attributes (RFC 2985) are of interest to the CA:
//!
//! - `challengePassword`, the shared secret a client presents to be eligible
//!   for signing.
//! - `extensionRequest`, which carries the extensions the client wants in its
//!   certificate. Only the SubjectAltName is honored.
//!
//! Parsed requests always carry a valid self-signature, which proves that the
//! client holds the private key of the requested public key.
use bon::Builder;
use const_oid::{
    AssociatedOid, ObjectIdentifier,
    db::{
        rfc5280::ID_CE_SUBJECT_ALT_NAME,
        rfc5912::{
            SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION, SHA_512_WITH_RSA_ENCRYPTION,
        },
    },
};
use pem::{EncodeConfig, LineEnding, Pem};
use rsa::{
    RsaPublicKey,
    pkcs1v15::{Signature, VerifyingKey},
    pkcs8::{DecodePublicKey, EncodePublicKey},
};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer, Verifier};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::{
    attr::Attribute,
    der::{
        Any, Decode, DecodePem, Encode, Tag, Tagged,
        asn1::{BitString, Ia5String, OctetString, SetOfVec},
    },
    ext::{Extension, pkix::SubjectAltName, pkix::name::GeneralName},
    name::Name,
    request::{CertReq, CertReqInfo, Version},
    spki::{DynSignatureAlgorithmIdentifier, SubjectPublicKeyInfoOwned},
};

use crate::{ca::PEM_LINE_ENDING, keys::rsa::SigningKey};

/// PKCS#9 `challengePassword` attribute (1.2.840.113549.1.9.7).
pub const CHALLENGE_PASSWORD_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.7");

/// PKCS#9 `extensionRequest` attribute (1.2.840.113549.1.9.14).
pub const EXTENSION_REQUEST_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// The PEM tag of PKCS#10 requests. Some tools still write the older
/// `NEW CERTIFICATE REQUEST` tag, which is accepted as well.
pub const CSR_PEM_TAG: &str = "CERTIFICATE REQUEST";
const LEGACY_CSR_PEM_TAG: &str = "NEW CERTIFICATE REQUEST";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode the certificate signing request from DER"))]
    DecodeRequest { source: x509_cert::der::Error },

    #[snafu(display("failed to parse the certificate signing request PEM block"))]
    ParsePem { source: pem::PemError },

    #[snafu(display("expected a PEM block of type {CSR_PEM_TAG:?}, got {tag:?}"))]
    UnexpectedPemTag { tag: String },

    #[snafu(display("the request is signed with the unsupported algorithm {oid}"))]
    UnsupportedSignatureAlgorithm { oid: ObjectIdentifier },

    #[snafu(display("failed to decode the RSA public key of the request"))]
    DecodePublicKey { source: rsa::pkcs8::spki::Error },

    #[snafu(display("the signature of the request does not match its public key"))]
    InvalidSignature { source: signature::Error },

    #[snafu(display("the challengePassword attribute has no value"))]
    MissingChallengePassword,

    #[snafu(display("the challengePassword attribute uses the unsupported string type {tag}"))]
    UnsupportedChallengePasswordType { tag: Tag },

    #[snafu(display("the challengePassword attribute is not valid UTF-8"))]
    InvalidChallengePassword { source: std::str::Utf8Error },

    #[snafu(display("failed to decode the requested extensions"))]
    DecodeExtensionRequest { source: x509_cert::der::Error },

    #[snafu(display("failed to decode the requested SubjectAltName"))]
    DecodeSubjectAltName { source: x509_cert::der::Error },

    #[snafu(display("failed to parse subject alternative DNS name {dns_name:?} as a Ia5 string"))]
    ParseSubjectAlternativeDnsName {
        source: x509_cert::der::Error,
        dns_name: String,
    },

    #[snafu(display("failed to serialize public key as PEM"))]
    SerializePublicKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to decode SPKI from PEM"))]
    DecodeSpkiFromPem { source: x509_cert::der::Error },

    #[snafu(display("failed to determine the signature algorithm"))]
    SignatureAlgorithm { source: x509_cert::spki::Error },

    #[snafu(display("failed to sign the certificate signing request"))]
    SignRequest { source: signature::Error },

    #[snafu(display("failed to encode the certificate signing request"))]
    EncodeRequest { source: x509_cert::der::Error },
}

/// A parsed PKCS#10 request, together with the DER bytes it was parsed from.
#[derive(Clone, Debug)]
pub struct CertificateSigningRequest {
    request: CertReq,
    raw: Vec<u8>,
}

impl CertificateSigningRequest {
    /// Use this function in combination with [`CertificateSigningRequestBuilder`]
    /// to create new requests.
    pub fn builder<'a>() -> CertificateSigningRequestBuilderBuilder<'a> {
        CertificateSigningRequestBuilder::start_builder()
    }

    /// Parses a DER encoded request and verifies its self-signature.
    #[instrument(name = "parse_certificate_signing_request", skip_all, fields(len = der.len()))]
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let request = CertReq::from_der(der).context(DecodeRequestSnafu)?;
        verify_signature(&request)?;

        Ok(Self {
            request,
            raw: der.to_vec(),
        })
    }

    pub fn from_pem(input: &[u8]) -> Result<Self> {
        let block = pem::parse(input).context(ParsePemSnafu)?;
        ensure!(
            block.tag() == CSR_PEM_TAG || block.tag() == LEGACY_CSR_PEM_TAG,
            UnexpectedPemTagSnafu { tag: block.tag() }
        );

        Self::from_der(block.contents())
    }

    pub fn to_pem(&self) -> String {
        let block = Pem::new(CSR_PEM_TAG, self.raw.clone());
        pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
    }

    /// The DER encoding of the request.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn subject(&self) -> &Name {
        &self.request.info.subject
    }

    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.request.info.public_key
    }

    /// Returns the PKCS#9 challenge password, or [`None`] if the client did
    /// not send one.
    pub fn challenge_password(&self) -> Result<Option<String>> {
        let Some(attribute) = self.attribute(CHALLENGE_PASSWORD_OID) else {
            return Ok(None);
        };

        // challengePassword is a DirectoryString, of which only the variants
        // compatible with UTF-8 are supported.
        let value = attribute
            .values
            .iter()
            .next()
            .context(MissingChallengePasswordSnafu)?;
        let tag = value.tag();
        ensure!(
            matches!(
                tag,
                Tag::PrintableString | Tag::Utf8String | Tag::Ia5String | Tag::TeletexString
            ),
            UnsupportedChallengePasswordTypeSnafu { tag }
        );

        let password = std::str::from_utf8(value.value()).context(InvalidChallengePasswordSnafu)?;
        Ok(Some(password.to_owned()))
    }

    /// Returns the SubjectAltName the client asked for in its
    /// `extensionRequest` attribute, if any.
    pub fn subject_alt_name(&self) -> Result<Option<SubjectAltName>> {
        let Some(attribute) = self.attribute(EXTENSION_REQUEST_OID) else {
            return Ok(None);
        };

        for value in attribute.values.iter() {
            let der = value.to_der().context(DecodeExtensionRequestSnafu)?;
            let extensions = Vec::<Extension>::from_der(&der).context(DecodeExtensionRequestSnafu)?;

            if let Some(extension) = extensions
                .iter()
                .find(|extension| extension.extn_id == ID_CE_SUBJECT_ALT_NAME)
            {
                let san = SubjectAltName::from_der(extension.extn_value.as_bytes())
                    .context(DecodeSubjectAltNameSnafu)?;
                return Ok(Some(san));
            }
        }

        Ok(None)
    }

    fn attribute(&self, oid: ObjectIdentifier) -> Option<&Attribute> {
        self.request
            .info
            .attributes
            .iter()
            .find(|attribute| attribute.oid == oid)
    }
}

fn verify_signature(request: &CertReq) -> Result<()> {
    let oid = request.algorithm.oid;
    let spki = request.info.public_key.to_der().context(EncodeRequestSnafu)?;
    let public_key = RsaPublicKey::from_public_key_der(&spki).context(DecodePublicKeySnafu)?;
    let tbs = request.info.to_der().context(EncodeRequestSnafu)?;
    let signature = request.signature.raw_bytes();

    match oid {
        SHA_256_WITH_RSA_ENCRYPTION => verify_with::<Sha256>(public_key, &tbs, signature),
        SHA_384_WITH_RSA_ENCRYPTION => verify_with::<Sha384>(public_key, &tbs, signature),
        SHA_512_WITH_RSA_ENCRYPTION => verify_with::<Sha512>(public_key, &tbs, signature),
        oid => UnsupportedSignatureAlgorithmSnafu { oid }.fail(),
    }
}

fn verify_with<D>(public_key: RsaPublicKey, message: &[u8], signature: &[u8]) -> Result<()>
where
    D: Digest + AssociatedOid,
{
    let signature = Signature::try_from(signature).context(InvalidSignatureSnafu)?;
    VerifyingKey::<D>::new(public_key)
        .verify(message, &signature)
        .context(InvalidSignatureSnafu)
}

/// Builds and signs PKCS#10 requests, the way SCEP clients do. Used by
/// tooling and tests, the CA itself only parses requests.
///
/// ```no_run
/// use scep_certs::{CertificateSigningRequest, keys::rsa::SigningKey};
///
/// let key = SigningKey::new(2048).unwrap();
/// let csr = CertificateSigningRequest::builder()
///     .subject("CN=device-1".parse().unwrap())
///     .signing_key(&key)
///     .challenge_password("secret")
///     .dns_names(&["device-1.example.com"])
///     .build()
///     .unwrap();
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateSigningRequestBuilder<'a> {
    subject: Name,

    /// The key of the requesting client, its public half ends up in the
    /// request.
    signing_key: &'a SigningKey,

    challenge_password: Option<&'a str>,

    /// DNS names requested as SubjectAltName through an `extensionRequest`.
    #[builder(default)]
    dns_names: &'a [&'a str],
}

impl<S> CertificateSigningRequestBuilderBuilder<'_, S>
where
    S: certificate_signing_request_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<CertificateSigningRequest> {
        self.finish_builder().build()
    }
}

impl CertificateSigningRequestBuilder<'_> {
    #[instrument(name = "build_certificate_signing_request", skip(self), fields(subject = %self.subject))]
    pub fn build(self) -> Result<CertificateSigningRequest> {
        let spki_pem = self
            .signing_key
            .verifying_key()
            .to_public_key_pem(PEM_LINE_ENDING)
            .context(SerializePublicKeySnafu)?;
        let public_key = SubjectPublicKeyInfoOwned::from_pem(spki_pem.as_bytes())
            .context(DecodeSpkiFromPemSnafu)?;

        let mut attributes = Vec::new();
        if let Some(challenge_password) = self.challenge_password {
            let value = Any::new(Tag::Utf8String, challenge_password.as_bytes())
                .context(EncodeRequestSnafu)?;
            attributes.push(Attribute {
                oid: CHALLENGE_PASSWORD_OID,
                values: SetOfVec::try_from(vec![value]).context(EncodeRequestSnafu)?,
            });
        }

        if !self.dns_names.is_empty() {
            let names = self
                .dns_names
                .iter()
                .map(|dns_name| {
                    Ia5String::new(dns_name)
                        .map(GeneralName::DnsName)
                        .with_context(|_| ParseSubjectAlternativeDnsNameSnafu {
                            dns_name: dns_name.to_string(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            let san = SubjectAltName(names).to_der().context(EncodeRequestSnafu)?;
            let extensions = vec![Extension {
                extn_id: ID_CE_SUBJECT_ALT_NAME,
                critical: false,
                extn_value: OctetString::new(san).context(EncodeRequestSnafu)?,
            }];
            let value = Any::from_der(&extensions.to_der().context(EncodeRequestSnafu)?)
                .context(EncodeRequestSnafu)?;
            attributes.push(Attribute {
                oid: EXTENSION_REQUEST_OID,
                values: SetOfVec::try_from(vec![value]).context(EncodeRequestSnafu)?,
            });
        }

        let info = CertReqInfo {
            version: Version::V1,
            subject: self.subject,
            public_key,
            attributes: SetOfVec::try_from(attributes).context(EncodeRequestSnafu)?,
        };

        let signer = self.signing_key.signing_key();
        let tbs = info.to_der().context(EncodeRequestSnafu)?;
        let signature: Signature = signer.try_sign(&tbs).context(SignRequestSnafu)?;
        let request = CertReq {
            info,
            algorithm: signer
                .signature_algorithm_identifier()
                .context(SignatureAlgorithmSnafu)?,
            signature: BitString::from_bytes(&signature.to_vec()).context(EncodeRequestSnafu)?,
        };

        let raw = request.to_der().context(EncodeRequestSnafu)?;
        Ok(CertificateSigningRequest { request, raw })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use const_oid::db::rfc4519::COMMON_NAME;

    use super::*;
    use crate::ca::tests::attribute_value;

    /// Creates a signed request for `CN=<common_name>`.
    pub(crate) fn request(
        key: &SigningKey,
        common_name: &str,
        challenge_password: Option<&str>,
        dns_names: &[&str],
    ) -> CertificateSigningRequest {
        CertificateSigningRequest::builder()
            .subject(format!("CN={common_name}").parse().unwrap())
            .signing_key(key)
            .maybe_challenge_password(challenge_password)
            .dns_names(dns_names)
            .build()
            .expect("failed to build CSR")
    }

    fn dns_names(san: &SubjectAltName) -> Vec<&str> {
        san.0
            .iter()
            .filter_map(|name| match name {
                GeneralName::DnsName(dns_name) => Some(dns_name.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn parses_what_clients_send() {
        let key = SigningKey::new(1024).unwrap();
        let csr = request(
            &key,
            "device-1",
            Some("s3cr3t"),
            &["device-1.example.com", "device-1.local"],
        );

        let parsed = CertificateSigningRequest::from_der(csr.raw()).expect("failed to parse CSR");
        assert_eq!(
            attribute_value(parsed.subject(), COMMON_NAME),
            Some(&b"device-1"[..])
        );
        assert_eq!(parsed.challenge_password().unwrap().as_deref(), Some("s3cr3t"));

        let san = parsed.subject_alt_name().unwrap().expect("CSR had no SAN");
        assert_eq!(dns_names(&san), ["device-1.example.com", "device-1.local"]);
    }

    #[test]
    fn attributes_are_optional() {
        let key = SigningKey::new(1024).unwrap();
        let csr = request(&key, "device-2", None, &[]);

        assert_eq!(csr.challenge_password().unwrap(), None);
        assert!(csr.subject_alt_name().unwrap().is_none());
    }

    #[test]
    fn pem_round_trip() {
        let key = SigningKey::new(1024).unwrap();
        let csr = request(&key, "device-3", Some("pw"), &[]);

        let pem = csr.to_pem();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----\n"));

        let parsed = CertificateSigningRequest::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(parsed.raw(), csr.raw());
        assert_eq!(parsed.public_key(), csr.public_key());
    }

    #[test]
    fn refuses_tampered_signature() {
        let key = SigningKey::new(1024).unwrap();
        let csr = request(&key, "device-4", Some("pw"), &[]);

        let mut der = csr.raw().to_vec();
        let last = der.len() - 1;
        der[last] ^= 0x01;

        assert!(matches!(
            CertificateSigningRequest::from_der(&der),
            Err(Error::InvalidSignature { .. })
        ));
    }

    #[test]
    fn refuses_foreign_public_key() {
        let key = SigningKey::new(1024).unwrap();
        let victim = request(&SigningKey::new(1024).unwrap(), "victim", None, &[]);

        let mut forged = request(&key, "victim", None, &[]).request;
        forged.info.public_key = victim.public_key().clone();
        let der = forged.to_der().unwrap();

        assert!(matches!(
            CertificateSigningRequest::from_der(&der),
            Err(Error::InvalidSignature { .. })
        ));
    }

    #[test]
    fn refuses_unsupported_signature_algorithms() {
        let key = SigningKey::new(1024).unwrap();
        let mut request = request(&key, "device-5", None, &[]).request;
        request.algorithm.oid = const_oid::db::rfc5912::SHA_1_WITH_RSA_ENCRYPTION;
        let der = request.to_der().unwrap();

        assert!(matches!(
            CertificateSigningRequest::from_der(&der),
            Err(Error::UnsupportedSignatureAlgorithm { .. })
        ));
    }

    #[test]
    fn refuses_garbage() {
        assert!(matches!(
            CertificateSigningRequest::from_der(b"definitely not DER"),
            Err(Error::DecodeRequest { .. })
        ));

        let pem = pem::encode(&Pem::new("CERTIFICATE", vec![0u8; 4]));
        assert!(matches!(
            CertificateSigningRequest::from_pem(pem.as_bytes()),
            Err(Error::UnexpectedPemTag { .. })
        ));
    }
}
