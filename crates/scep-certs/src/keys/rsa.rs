//! Abstraction layer around the [`rsa`] crate. This module provides types
//! which abstract away the generation, serialization and loading of the RSA
//! key used to sign the CA and all issued client certificates.
use rand_core::{CryptoRngCore, OsRng};
use rsa::{
    RsaPrivateKey,
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    traits::PublicKeyParts,
};
use signature::Keypair;
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;
use zeroize::Zeroizing;

use crate::keys::legacy_pem::{self, RSA_PRIVATE_KEY_PEM_TAG};

/// The default modulus size in bits of newly created CA keys.
pub const DEFAULT_KEY_SIZE: usize = 4096;

/// Keys smaller than this are refused.
pub const MIN_KEY_SIZE: usize = 1024;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("RSA key size of {bits} bits is below the minimum of {MIN_KEY_SIZE} bits"))]
    KeySizeTooSmall { bits: usize },

    #[snafu(display("failed to create RSA key"))]
    CreateKey { source: rsa::Error },

    #[snafu(display("failed to serialize the signing (private) key as PKCS#1 DER"))]
    SerializeSigningKey { source: rsa::pkcs1::Error },

    #[snafu(display("failed to deserialize the signing (private) key from PKCS#1 DER"))]
    DeserializeSigningKey { source: rsa::pkcs1::Error },

    #[snafu(display("failed to parse the signing (private) key PEM block"))]
    ParsePem { source: pem::PemError },

    #[snafu(display("expected a PEM block of type {RSA_PRIVATE_KEY_PEM_TAG:?}, got {tag:?}"))]
    UnexpectedPemTag { tag: String },

    #[snafu(display("failed to decrypt the signing (private) key"))]
    DecryptSigningKey { source: legacy_pem::Error },

    #[snafu(display("failed to encrypt the signing (private) key"))]
    EncryptSigningKey { source: legacy_pem::Error },
}

#[derive(Debug)]
pub struct SigningKey(rsa::pkcs1v15::SigningKey<sha2::Sha256>);

impl SigningKey {
    /// Generates a new RSA key of `bits` modulus size with the default
    /// random-number generator [`OsRng`].
    ///
    /// It should be noted that the generation of the key takes longer for
    /// larger key sizes. The generation of an RSA key with a key size of
    /// `4096` (the default) can take up to multiple seconds.
    #[instrument(name = "create_rsa_signing_key")]
    pub fn new(bits: usize) -> Result<Self> {
        let mut csprng = OsRng;
        Self::new_with_rng(&mut csprng, bits)
    }

    /// Generates a new RSA key with a custom random-number generator.
    #[instrument(name = "create_rsa_signing_key_custom_rng", skip(rng))]
    pub fn new_with_rng<Rng>(rng: &mut Rng, bits: usize) -> Result<Self>
    where
        Rng: CryptoRngCore + ?Sized,
    {
        ensure!(bits >= MIN_KEY_SIZE, KeySizeTooSmallSnafu { bits });

        let private_key = RsaPrivateKey::new(rng, bits).context(CreateKeySnafu)?;
        Ok(Self::from(private_key))
    }

    /// Creates a signing key from the PKCS#1 DER-encoded private key.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs1_der(der).context(DeserializeSigningKeySnafu)?;
        Ok(Self::from(private_key))
    }

    /// Creates a signing key from a PEM-encoded `RSA PRIVATE KEY` block.
    ///
    /// Encrypted blocks (`Proc-Type: 4,ENCRYPTED`) are decrypted with the
    /// `passphrase`, plain blocks are parsed as they are and the passphrase
    /// is ignored.
    #[instrument(name = "create_rsa_signing_key_from_pem", skip_all)]
    pub fn from_pem(input: &[u8], passphrase: &[u8]) -> Result<Self> {
        let block = pem::parse(input).context(ParsePemSnafu)?;
        ensure!(
            block.tag() == RSA_PRIVATE_KEY_PEM_TAG,
            UnexpectedPemTagSnafu { tag: block.tag() }
        );

        if legacy_pem::is_encrypted(&block) {
            let der = legacy_pem::decrypt(&block, passphrase).context(DecryptSigningKeySnafu)?;
            Self::from_pkcs1_der(&der)
        } else {
            Self::from_pkcs1_der(block.contents())
        }
    }

    /// Serializes the private key as PKCS#1 DER.
    pub fn to_pkcs1_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let document = self
            .private_key()
            .to_pkcs1_der()
            .context(SerializeSigningKeySnafu)?;

        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// Serializes the private key as an encrypted `RSA PRIVATE KEY` PEM
    /// block. An empty `passphrase` still produces an encrypted block.
    pub fn to_encrypted_pem(&self, passphrase: &[u8]) -> Result<String> {
        let der = self.to_pkcs1_der()?;
        let block = legacy_pem::encrypt(RSA_PRIVATE_KEY_PEM_TAG, &der, passphrase)
            .context(EncryptSigningKeySnafu)?;

        Ok(legacy_pem::encode(&block))
    }

    /// Returns the signing key used for PKCS#1 v1.5 signatures with SHA-256.
    pub fn signing_key(&self) -> &rsa::pkcs1v15::SigningKey<sha2::Sha256> {
        &self.0
    }

    /// Returns the verifying (public) half of the keypair.
    pub fn verifying_key(&self) -> rsa::pkcs1v15::VerifyingKey<sha2::Sha256> {
        self.0.verifying_key()
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        self.0.as_ref()
    }

    /// The key length in bits
    pub fn key_size(&self) -> usize {
        self.private_key().size() * 8
    }
}

impl From<RsaPrivateKey> for SigningKey {
    fn from(private_key: RsaPrivateKey) -> Self {
        Self(rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(private_key))
    }
}
